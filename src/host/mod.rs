//! Host-facing bridge for the browser shell.
//!
//! The shell drives the service with versioned JSON commands and receives
//! reload requests and badge updates as events.

pub mod channel;
pub mod contract;
pub mod registry;
pub mod stdio;
