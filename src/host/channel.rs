//! Host command channel and router for the browser shell.

use crate::error::{ReloaderError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::host::registry::TabRegistry;
use crate::platform::TabId;
use crate::rules::Rule;
use crate::service::ReloaderService;
use crate::store::MergeReport;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            ReloaderError::Host(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| {
                ReloaderError::Channel(format!("failed to send host command request: {e}"))
            })?;

        response_rx
            .await
            .map_err(|e| ReloaderError::Channel(format!("host command response dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

/// Dispatches command envelopes to the service.
#[derive(Clone)]
pub struct CommandRouter {
    service: Arc<ReloaderService>,
    registry: Arc<TabRegistry>,
}

pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    router: CommandRouter,
}

/// Create the event broadcast channel shared by the router, the tab
/// registry and the badge surface.
#[must_use]
pub fn host_event_channel(capacity: usize) -> broadcast::Sender<EventEnvelope> {
    let (event_tx, _event_rx) = broadcast::channel(capacity.max(1));
    event_tx
}

/// Create a command channel whose events go out on `event_tx`.
///
/// `registry` must be the same [`TabRegistry`] the service was started
/// with, so tab reports reach the engines.
#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    service: Arc<ReloaderService>,
    registry: Arc<TabRegistry>,
) -> (HostCommandClient, HostCommandServer) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx,
        },
        HostCommandServer {
            request_rx,
            router: CommandRouter { service, registry },
        },
    )
}

impl HostCommandServer {
    /// Serve requests until every client is dropped.
    ///
    /// Backup and restore run on their own task so tab reports keep
    /// flowing while the bookmark service is slow.
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            if request.envelope.command.is_long_running() {
                let router = self.router.clone();
                tokio::spawn(async move { router.respond(request).await });
            } else {
                self.router.respond(request).await;
            }
        }
        debug!("host command channel closed");
    }

    #[must_use]
    pub fn router(&self) -> &CommandRouter {
        &self.router
    }
}

impl CommandRouter {
    async fn respond(&self, request: HostCommandRequest) {
        let request_id = request.envelope.request_id.clone();
        let response = match self.route(&request.envelope).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    command = request.envelope.command.as_str(),
                    request_id = %request_id,
                    "host command failed: {e}"
                );
                ResponseEnvelope::error(request_id, e.to_string())
            }
        };
        let _ = request.response_tx.send(response);
    }

    /// Route a command envelope to the service.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let payload = match envelope.command {
            CommandName::HostPing => json!({"pong": true}),
            CommandName::HostVersion => json!({
                "contract_version": crate::host::contract::EVENT_VERSION,
                "package_version": env!("CARGO_PKG_VERSION"),
            }),
            CommandName::TabUpdated => self.handle_tab_updated(&envelope.payload)?,
            CommandName::TabRemoved => self.handle_tab_removed(&envelope.payload)?,
            CommandName::TabActivated => {
                let tab_id = required_tab_id(&envelope.payload, "tab.activated")?;
                self.focus(Some(tab_id))?
            }
            CommandName::WindowFocusChanged => {
                let tab_id = envelope.payload.get("tab_id").and_then(Value::as_i64);
                self.focus(tab_id)?
            }
            CommandName::ActionClicked => {
                let url = required_str(&envelope.payload, "url", "action.clicked")?;
                json!({"accepted": self.service.action_clicked(url)})
            }
            CommandName::PrefillTake => json!({"url": self.service.take_prefill()}),
            CommandName::RulesList => json!({"rules": self.service.rules().await}),
            CommandName::RulesSave => self.handle_rules_save(&envelope.payload).await?,
            CommandName::RulesDelete => {
                let pattern = required_str(&envelope.payload, "url_pattern", "rules.delete")?;
                json!({"removed": self.service.delete_rule(pattern).await?})
            }
            CommandName::RulesImport => self.handle_rules_import(&envelope.payload).await?,
            CommandName::RulesChanged => {
                let trigger = envelope
                    .payload
                    .get("trigger_auto_backup")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let reason = envelope.payload.get("reason").and_then(Value::as_str);
                self.service.rules_changed(trigger, reason).await?;
                json!({"accepted": true})
            }
            CommandName::BackupRun => to_payload(&self.service.backup_now().await)?,
            CommandName::RestoreRun => to_payload(&self.service.restore_now().await)?,
            CommandName::AuthLogin => {
                let p = &envelope.payload;
                let access = p.get("access_token").and_then(Value::as_str).unwrap_or("");
                let refresh = p.get("refresh_token").and_then(Value::as_str).unwrap_or("");
                let expires_in = p.get("expires_in").and_then(Value::as_u64).unwrap_or(0);
                self.service.login(access, refresh, expires_in).await?;
                json!({"logged_in": true})
            }
            CommandName::AuthLogout => {
                self.service.logout().await?;
                json!({"logged_in": false})
            }
            CommandName::AuthStatus => to_payload(&self.service.auth_status().await)?,
            CommandName::AutoBackupSet => {
                let enabled = envelope
                    .payload
                    .get("enabled")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| {
                        ReloaderError::Host("auto_backup.set requires payload.enabled".to_owned())
                    })?;
                self.service.set_auto_backup(enabled).await?;
                json!({"enabled": enabled})
            }
            CommandName::RuntimeStop => {
                self.service.shutdown();
                json!({"stopping": true})
            }
        };
        Ok(ResponseEnvelope::ok(envelope.request_id.clone(), payload))
    }

    fn handle_tab_updated(&self, payload: &Value) -> Result<Value> {
        let tab_id = required_tab_id(payload, "tab.updated")?;
        let url = payload.get("url").and_then(Value::as_str);
        self.registry.upsert(tab_id, url.map(str::to_owned))?;
        if payload.get("active").and_then(Value::as_bool) == Some(true) {
            self.registry.set_active(Some(tab_id))?;
            self.service.active_tab_changed();
        }
        if let Some(url) = url {
            self.service.tab_updated(tab_id, url)?;
        }
        Ok(json!({"accepted": true}))
    }

    fn handle_tab_removed(&self, payload: &Value) -> Result<Value> {
        let tab_id = required_tab_id(payload, "tab.removed")?;
        let known = self.registry.remove(tab_id)?;
        self.service.tab_removed(tab_id)?;
        Ok(json!({"accepted": true, "known": known}))
    }

    fn focus(&self, tab_id: Option<TabId>) -> Result<Value> {
        self.registry.set_active(tab_id)?;
        self.service.active_tab_changed();
        Ok(json!({"accepted": true, "tab_id": tab_id}))
    }

    async fn handle_rules_save(&self, payload: &Value) -> Result<Value> {
        let pattern = required_str(payload, "url_pattern", "rules.save")?;
        let minutes = payload
            .get("interval_minutes")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ReloaderError::Host("rules.save requires payload.interval_minutes".to_owned())
            })?;
        let minutes = u32::try_from(minutes)
            .map_err(|_| ReloaderError::Host(format!("interval out of range: {minutes}")))?;
        let original = payload.get("original_pattern").and_then(Value::as_str);

        let rule = Rule::new(pattern, minutes)?;
        self.service.save_rule(original, rule.clone()).await?;
        Ok(json!({"saved": true, "rule": rule}))
    }

    async fn handle_rules_import(&self, payload: &Value) -> Result<Value> {
        let Some(entries) = payload.get("rules").and_then(Value::as_array) else {
            return Err(ReloaderError::Host(
                "rules.import requires payload.rules (array)".to_owned(),
            ));
        };

        let mut undecodable = 0;
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<Rule>(entry.clone()) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    debug!("skipping undecodable import entry: {e}");
                    undecodable += 1;
                }
            }
        }

        let mut report: MergeReport = self.service.import_rules(rules).await?;
        report.invalid += undecodable;
        to_payload(&report)
    }
}

fn to_payload(value: &impl serde::Serialize) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| ReloaderError::Host(format!("failed to serialize response payload: {e}")))
}

fn required_str<'a>(payload: &'a Value, field: &str, command: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ReloaderError::Host(format!("{command} requires payload.{field}")))
}

fn required_tab_id(payload: &Value, command: &str) -> Result<TabId> {
    payload
        .get("tab_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ReloaderError::Host(format!("{command} requires payload.tab_id (integer)")))
}
