//! handlers/mod.rs
pub mod email_handler;
pub mod prefs_handler;
pub mod stats_handler;
pub mod webhook_handler;
