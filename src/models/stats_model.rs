//! models/stats_model.rs
//! Tracking records and the provider lifecycle events that update them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;
use crate::models::mail_model::{is_valid_address, max_len};

pub const SENT: i64 = 1 << 0;
pub const DELIVERED: i64 = 1 << 1;
pub const SPAM_REPORTED: i64 = 1 << 2;
pub const BOUNCED: i64 = 1 << 3;
pub const DROPPED: i64 = 1 << 4;
pub const OPENED: i64 = 1 << 5;

const MAX_REASON_LEN: usize = 1024;

/// Environments whose events are applied; everything else is dropped.
pub const ACCEPTED_ENVIRONMENTS: [&str; 2] = ["production", "staging"];
/// Events from before environments were stamped came from production.
pub const PRIMARY_ENVIRONMENT: &str = "production";

/// One logical send attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub id: String,
    pub recipient: String,
    /// Category flags the mail was sent with.
    pub send_flags: i64,
    /// OR-accumulated lifecycle bits.
    pub state_flags: i64,
    #[serde(rename = "uniqueID")]
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "error")]
    pub failure_reason: Option<String>,
}

/// Provider event types this service knows how to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Delivered,
    Opened,
    Bounced,
    SpamReported,
    Dropped,
}

impl LifecycleEvent {
    pub fn parse(event: &str) -> Option<Self> {
        match event {
            "delivered" => Some(Self::Delivered),
            "open" => Some(Self::Opened),
            "bounce" => Some(Self::Bounced),
            "spamreport" => Some(Self::SpamReported),
            "dropped" => Some(Self::Dropped),
            _ => None,
        }
    }

    pub fn flag(self) -> i64 {
        match self {
            Self::Delivered => DELIVERED,
            Self::Opened => OPENED,
            Self::Bounced => BOUNCED,
            Self::SpamReported => SPAM_REPORTED,
            Self::Dropped => DROPPED,
        }
    }

    /// Only bounces and drops record why they happened.
    pub fn keeps_reason(self) -> bool {
        matches!(self, Self::Bounced | Self::Dropped)
    }
}

/// A provider-reported event, as received on the webhook and carried on the
/// `stats` queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsJob {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub event: String,

    #[serde(rename = "pmStatsID", default, deserialize_with = "null_as_empty")]
    pub stats_id: String,

    /// Name of the tracking id field before it was renamed to `pmStatsID`.
    #[serde(
        rename = "stats_id",
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub legacy_stats_id: String,

    #[serde(rename = "pmEnvID", default, deserialize_with = "null_as_empty")]
    pub environment: String,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "String::is_empty"
    )]
    pub reason: String,
}

/// Providers send `null` for fields they have nothing to say about.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl StatsJob {
    /// Applies the defaults the webhook fills in before validating.
    pub fn normalize(&mut self) {
        if self.environment.is_empty() {
            self.environment = PRIMARY_ENVIRONMENT.to_string();
        }
        if self.stats_id.is_empty() && !self.legacy_stats_id.is_empty() {
            self.stats_id = self.legacy_stats_id.clone();
        }
    }

    pub fn environment_accepted(&self) -> bool {
        ACCEPTED_ENVIRONMENTS.contains(&self.environment.as_str())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.is_empty() {
            return Err(ValidationError::new("email is required"));
        }
        if !is_valid_address(&self.email) {
            return Err(ValidationError::new("email is not a valid email address"));
        }
        if self.event.is_empty() {
            return Err(ValidationError::new("event is required"));
        }
        if self.stats_id.is_empty() {
            return Err(ValidationError::new("pmStatsID is required"));
        }
        if self.environment.is_empty() {
            return Err(ValidationError::new("pmEnvID is required"));
        }
        max_len("reason", &self.reason, MAX_REASON_LEN)
    }
}
