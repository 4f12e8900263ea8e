//! models/mod.rs
//! Shared data structures: requests, queue jobs and stored records.

pub mod mail_model;
pub mod preference_model;
pub mod relay_model;
pub mod stats_model;
