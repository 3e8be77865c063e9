//! Service pieces of the `cosmos-watchdog` binary

pub mod api;
pub mod config;
pub mod scheduler;
