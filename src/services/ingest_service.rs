//! services/ingest_service.rs
//! Inbound pipeline: provider event batches onto the `stats` queue, and the
//! consumer that applies them to tracking records.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PreferenceError, TrackerError};
use crate::models::relay_model::QueueName;
use crate::models::stats_model::{LifecycleEvent, StatsJob};
use crate::services::preference_service::PreferenceService;
use crate::services::relay_service::{JobHandler, QueueRelay};
use crate::services::tracking_service::TrackingService;

/// Per-batch tally. One bad event never stops the rest of its batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    /// From environments other than production and staging.
    pub dropped: usize,
    pub invalid: usize,
    /// Could not be handed to the relay.
    pub failed: usize,
}

#[derive(Clone)]
pub struct IngestService {
    relay: Arc<QueueRelay>,
}

impl IngestService {
    pub fn new(relay: Arc<QueueRelay>) -> Self {
        Self { relay }
    }

    /// Takes the batch as raw JSON so that one event of the wrong shape only
    /// costs itself.
    pub async fn ingest(&self, events: Vec<Value>) -> IngestReport {
        let mut report = IngestReport::default();

        for raw in events {
            let mut event: StatsJob = match serde_json::from_value(raw) {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("Couldn't decode webhook event: {}", e);
                    report.invalid += 1;
                    continue;
                }
            };
            log::debug!("Processing webhook event {:?}", event);
            event.normalize();

            if !event.environment_accepted() {
                log::info!(
                    "Dropping event from environment '{}' for id={}",
                    event.environment,
                    event.stats_id
                );
                report.dropped += 1;
                continue;
            }

            if let Err(e) = event.validate() {
                log::warn!("Event failed validation ({}): {:?}", e, event);
                report.invalid += 1;
                continue;
            }

            let contents = match serde_json::to_string(&event) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("Couldn't encode event id={}: {}", event.stats_id, e);
                    report.failed += 1;
                    continue;
                }
            };

            match self.relay.submit(QueueName::Stats, contents).await {
                Ok(()) => report.accepted += 1,
                Err(e) => {
                    log::error!("Couldn't store stats job id={}: {}", event.stats_id, e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// Consumer side of the `stats` queue.
pub struct StatsJobHandler {
    tracking: TrackingService,
    preferences: PreferenceService,
}

impl StatsJobHandler {
    pub fn new(tracking: TrackingService, preferences: PreferenceService) -> Self {
        Self {
            tracking,
            preferences,
        }
    }

    pub async fn process(&self, job: &StatsJob) -> Result<()> {
        log::info!(
            "Processing stats job id={} type={} email={} reason={}",
            job.stats_id,
            job.event,
            job.email,
            job.reason
        );

        let Some(event) = LifecycleEvent::parse(&job.event) else {
            log::warn!("Received unknown stats job type '{}'", job.event);
            return Ok(());
        };

        let marked = match self.tracking.mark(&job.stats_id, event, &job.reason).await {
            // Nothing to update without a store.
            Err(TrackerError::StoreUnavailable) => Ok(()),
            Err(e) => {
                log::error!("Error marking email id={} as {:?}: {}", job.stats_id, event, e);
                Err(e)
            }
            ok => ok,
        };

        let history = match event {
            LifecycleEvent::Bounced => Some(self.preferences.record_bounce(&job.email).await),
            LifecycleEvent::SpamReported => Some(self.preferences.record_spam(&job.email).await),
            _ => None,
        };
        match history {
            Some(Err(PreferenceError::StoreUnavailable)) | Some(Ok(())) | None => {}
            Some(Err(e)) => log::error!("Error storing {:?} for {}: {}", event, job.email, e),
        }

        marked.map_err(Into::into)
    }
}

#[async_trait]
impl JobHandler for StatsJobHandler {
    async fn handle(&self, payload: &str) -> Result<()> {
        let job: StatsJob = match serde_json::from_str(payload) {
            Ok(job) => job,
            Err(e) => {
                log::error!("Error decoding stats job {}: {}", payload, e);
                return Err(e.into());
            }
        };
        self.process(&job).await
    }
}
