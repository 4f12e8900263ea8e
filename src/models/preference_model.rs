//! models/preference_model.rs
//! Per-recipient consent record and the requests that read or change it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::mail_model::validate_address;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub email: String,
    /// Categories the recipient opted out of.
    pub blocked_flags: i64,
    pub bounce_history: Vec<DateTime<Utc>>,
    pub spam_history: Vec<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePrefsRequest {
    pub email: String,
    pub flags: i64,
}

impl UpdatePrefsRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_address("email", &self.email)?;
        if self.flags < 0 {
            return Err(ValidationError::new("flags cannot be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovePrefsRequest {
    pub from: String,
    pub to: String,
}

impl MovePrefsRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_address("from", &self.from)?;
        validate_address("to", &self.to)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrefsResponse {
    pub email: String,
    pub flags: i64,
}
