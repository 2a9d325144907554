//! Configuration types for the reload manager.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloaderConfig {
    /// Remote bookmark service settings.
    pub remote: RemoteConfig,
    /// Auto-backup settings.
    pub backup: BackupConfig,
    /// Toolbar badge settings.
    pub badge: BadgeConfig,
    /// Persisted store settings.
    pub store: StoreConfig,
}

/// Remote bookmark service (REST) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// REST API base URL, without a trailing slash.
    pub base_url: String,
    /// Identity provider endpoint used to exchange a refresh token.
    pub refresh_url: String,
    /// Title of the single collection that holds backed-up rules.
    pub collection_name: String,
    /// Items requested per page when listing a collection.
    pub page_size: usize,
    /// Pause between consecutive write or pagination requests (ms).
    pub request_pause_ms: u64,
    /// Retries after a rate-limited (HTTP 429) response.
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry (ms).
    pub initial_backoff_ms: u64,
    /// Refresh the access token when it expires within this window (secs).
    pub token_expiry_buffer_secs: u64,
    /// Per-request timeout (secs). Zero disables the timeout.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.raindrop.io/rest/v1".to_owned(),
            refresh_url: "https://ohauth.vercel.app/oauth/raindrop/refresh".to_owned(),
            collection_name: "Reloader Bear".to_owned(),
            page_size: 50,
            request_pause_ms: 100,
            max_retries: 5,
            initial_backoff_ms: 1000,
            token_expiry_buffer_secs: 600,
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// Create a config pointing at a different API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Override the token refresh endpoint.
    pub fn with_refresh_url(mut self, refresh_url: impl Into<String>) -> Self {
        self.refresh_url = refresh_url.into();
        self
    }

    /// Override the initial rate-limit backoff in milliseconds.
    pub fn with_initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Override the inter-request pause in milliseconds.
    pub fn with_request_pause_ms(mut self, ms: u64) -> Self {
        self.request_pause_ms = ms;
        self
    }

    /// Override the page size used for collection listing.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Pause between requests as a [`Duration`].
    #[must_use]
    pub fn request_pause(&self) -> Duration {
        Duration::from_millis(self.request_pause_ms)
    }

    /// Token expiry buffer in milliseconds.
    #[must_use]
    pub fn token_expiry_buffer_ms(&self) -> u64 {
        self.token_expiry_buffer_secs.saturating_mul(1000)
    }
}

/// Auto-backup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Quiet period after the last rule edit before a backup runs (ms).
    pub debounce_ms: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { debounce_ms: 5000 }
    }
}

impl BackupConfig {
    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Toolbar badge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeConfig {
    /// Countdown refresh cadence (ms).
    pub tick_ms: u64,
    /// How long the success marker stays up (ms).
    pub success_clear_ms: u64,
    /// How long the failure marker stays up (ms).
    pub failure_clear_ms: u64,
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            success_clear_ms: 3000,
            failure_clear_ms: 5000,
        }
    }
}

/// Persisted store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store file location (None = `<data_dir>/store.json`).
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolved store file path.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::reloader_dirs::data_dir().join("store.json"))
    }
}

impl ReloaderConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ReloaderError::Config(e.to_string()))
    }

    /// Load the config at `path`, or defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        match Self::from_file(path) {
            Ok(config) => Ok(config),
            Err(crate::error::ReloaderError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ReloaderError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config_dir>/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::reloader_dirs::config_dir().join("config.toml")
    }
}
