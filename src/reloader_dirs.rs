//! Centralized application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Environment Overrides
//!
//! - `RELOADER_DATA_DIR` overrides [`data_dir`]
//! - `RELOADER_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the persisted store (`store.json`). Resolves to
/// `dirs::data_dir()/reloader/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("RELOADER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("reloader"))
        .unwrap_or_else(|| PathBuf::from("/tmp/reloader-data"))
}

/// Application config directory.
///
/// Holds `config.toml`. Resolves to `dirs::config_dir()/reloader/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("RELOADER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("reloader"))
        .unwrap_or_else(|| PathBuf::from("/tmp/reloader-config"))
}
