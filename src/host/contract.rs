//! Versioned host command/event envelopes for the browser shell.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Command set understood by the host bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "tab.updated")]
    TabUpdated,
    #[serde(rename = "tab.removed")]
    TabRemoved,
    #[serde(rename = "tab.activated")]
    TabActivated,
    #[serde(rename = "window.focus_changed")]
    WindowFocusChanged,
    #[serde(rename = "action.clicked")]
    ActionClicked,
    #[serde(rename = "prefill.take")]
    PrefillTake,
    #[serde(rename = "rules.list")]
    RulesList,
    #[serde(rename = "rules.save")]
    RulesSave,
    #[serde(rename = "rules.delete")]
    RulesDelete,
    #[serde(rename = "rules.import")]
    RulesImport,
    #[serde(rename = "rules.changed")]
    RulesChanged,
    #[serde(rename = "backup.run")]
    BackupRun,
    #[serde(rename = "restore.run")]
    RestoreRun,
    #[serde(rename = "auth.login")]
    AuthLogin,
    #[serde(rename = "auth.logout")]
    AuthLogout,
    #[serde(rename = "auth.status")]
    AuthStatus,
    #[serde(rename = "auto_backup.set")]
    AutoBackupSet,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    /// Every command, in wire order.
    pub const ALL: [Self; 20] = [
        Self::HostPing,
        Self::HostVersion,
        Self::TabUpdated,
        Self::TabRemoved,
        Self::TabActivated,
        Self::WindowFocusChanged,
        Self::ActionClicked,
        Self::PrefillTake,
        Self::RulesList,
        Self::RulesSave,
        Self::RulesDelete,
        Self::RulesImport,
        Self::RulesChanged,
        Self::BackupRun,
        Self::RestoreRun,
        Self::AuthLogin,
        Self::AuthLogout,
        Self::AuthStatus,
        Self::AutoBackupSet,
        Self::RuntimeStop,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::TabUpdated => "tab.updated",
            Self::TabRemoved => "tab.removed",
            Self::TabActivated => "tab.activated",
            Self::WindowFocusChanged => "window.focus_changed",
            Self::ActionClicked => "action.clicked",
            Self::PrefillTake => "prefill.take",
            Self::RulesList => "rules.list",
            Self::RulesSave => "rules.save",
            Self::RulesDelete => "rules.delete",
            Self::RulesImport => "rules.import",
            Self::RulesChanged => "rules.changed",
            Self::BackupRun => "backup.run",
            Self::RestoreRun => "restore.run",
            Self::AuthLogin => "auth.login",
            Self::AuthLogout => "auth.logout",
            Self::AuthStatus => "auth.status",
            Self::AutoBackupSet => "auto_backup.set",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }

    /// Commands that talk to the bookmark service and may take seconds.
    #[must_use]
    pub fn is_long_running(self) -> bool {
        matches!(self, Self::BackupRun | Self::RestoreRun)
    }
}

/// A versioned response envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from frontend -> backend host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }

    /// Build an event envelope with a fresh random id.
    #[must_use]
    pub fn fresh(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), event, payload)
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}
