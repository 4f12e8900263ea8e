//! services/mod.rs
//! Business layer: the relay, its consumers, the stores and the two pipelines.

pub mod consumer_service;
pub mod ingest_service;
pub mod mailer_service;
pub mod preference_service;
pub mod queue_transport;
pub mod relay_service;
pub mod send_service;
pub mod tracking_service;
