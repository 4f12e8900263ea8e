//! config/mod.rs
//! Process configuration, built once at startup and passed down explicitly.

pub mod app_config;
