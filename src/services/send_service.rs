//! services/send_service.rs
//! Outbound pipeline: consent check and enqueue on the API side, tracking and
//! provider dispatch on the consumer side.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{RelayError, ValidationError};
use crate::models::mail_model::{Mail, ENV_ID_ARG, STATS_ID_ARG};
use crate::models::relay_model::QueueName;
use crate::services::mailer_service::Mailer;
use crate::services::preference_service::PreferenceService;
use crate::services::relay_service::{JobHandler, QueueRelay};
use crate::services::tracking_service::TrackingService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted for delivery (queued, or already dispatched in direct mode).
    Accepted,
    /// The recipient opted out of one of the mail's categories. Not an error.
    Blocked,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("failed to encode send job: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct SendService {
    preferences: PreferenceService,
    relay: Arc<QueueRelay>,
}

impl SendService {
    pub fn new(preferences: PreferenceService, relay: Arc<QueueRelay>) -> Self {
        Self { preferences, relay }
    }

    pub async fn enqueue(&self, mail: Mail) -> Result<SendOutcome, SendError> {
        if let Err(e) = mail.validate() {
            log::warn!("Badly formed enqueue request for {}: {}", mail.to, e);
            return Err(e.into());
        }

        if !self.preferences.is_allowed(&mail.to, mail.flags).await {
            log::warn!(
                "Cannot send email to {} due to flags {:b}",
                mail.to,
                mail.flags
            );
            return Ok(SendOutcome::Blocked);
        }

        let contents = serde_json::to_string(&mail)?;
        self.relay.submit(QueueName::Send, contents).await?;
        Ok(SendOutcome::Accepted)
    }
}

/// Consumer side of the `send` queue.
pub struct SendJobHandler {
    tracking: TrackingService,
    mailer: Arc<dyn Mailer>,
    environment: String,
}

impl SendJobHandler {
    pub fn new(tracking: TrackingService, mailer: Arc<dyn Mailer>, environment: String) -> Self {
        Self {
            tracking,
            mailer,
            environment,
        }
    }

    /// Tracks and dispatches one mail; removes the tracking record again if
    /// the provider refused it.
    pub async fn process(&self, mut mail: Mail) -> Result<Option<String>> {
        let id = self
            .tracking
            .create(&mail.to, mail.flags, mail.correlation_id())
            .await;

        if let Some(id) = &id {
            mail.unique_args.insert(STATS_ID_ARG.to_string(), id.clone());
            mail.unique_args
                .insert(ENV_ID_ARG.to_string(), self.environment.clone());
        }

        log::info!(
            "Processing send job id={} recipient={}",
            id.as_deref().unwrap_or("-"),
            mail.to
        );

        if let Err(e) = self.mailer.send(&mail).await {
            if let Some(id) = &id {
                if let Err(rerr) = self.tracking.delete(id).await {
                    log::error!("Error deleting failed tracking id {}: {}", id, rerr);
                }
            }
            log::error!(
                "Error sending mail id={} recipient={}: {:?}",
                id.as_deref().unwrap_or("-"),
                mail.to,
                e
            );
            return Err(e.context("Failed to send email"));
        }
        Ok(id)
    }
}

#[async_trait]
impl JobHandler for SendJobHandler {
    async fn handle(&self, payload: &str) -> Result<()> {
        let mail: Mail = match serde_json::from_str(payload) {
            Ok(mail) => mail,
            Err(e) => {
                // Unprocessable; the consumer drops it either way.
                log::error!("Error decoding send job {}: {}", payload, e);
                return Err(e.into());
            }
        };
        self.process(mail).await.map(|_| ())
    }
}
