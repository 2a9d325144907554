//! Reloader: per-tab auto-reload timers with cloud backup of reload rules.
//!
//! The user keeps an ordered list of rules mapping a URL substring to a
//! reload interval. Every open tab whose URL matches a rule is reloaded on
//! that interval, and the toolbar badge shows a countdown for the active
//! tab. Rules can be backed up to, and restored from, a collection on the
//! Raindrop.io bookmark service.
//!
//! # Architecture
//!
//! - **Rules and store**: [`rules`] and [`store`] hold the persisted state
//! - **Timers**: [`timers::TabTimerScheduler`] arms one alarm per matching tab
//! - **Badge**: [`badge::BadgePresenter`] renders countdowns and sync status
//! - **Remote**: [`remote::RemoteClient`] talks to the bookmark API
//! - **Sync**: [`sync::Reconciler`] backs up and restores rules
//! - **Auto-backup**: [`backup::AutoBackupScheduler`] debounces rule edits
//! - **Service**: [`service::ReloaderService`] wires everything together
//! - **Host bridge**: [`host`] exposes the service to a browser shell

pub mod backup;
pub mod badge;
pub mod config;
pub mod error;
pub mod host;
pub mod platform;
pub mod reloader_dirs;
pub mod remote;
pub mod rules;
pub mod runtime;
pub mod service;
pub mod store;
pub mod sync;
pub mod timers;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::ReloaderConfig;
pub use error::{ReloaderError, Result};
pub use rules::Rule;
pub use runtime::RuntimeEvent;
pub use service::ReloaderService;
