//! models/mail_model.rs
//! The outbound send request, as accepted by the API and carried on the `send` queue.

use std::collections::HashMap;

use lettre::Address;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const MAX_ADDRESS_LEN: usize = 256;
/// RFC 5322 line limit.
const MAX_SUBJECT_LEN: usize = 998;
const MAX_BODY_LEN: usize = 2 * 1024 * 1024;
const MAX_ARG_LEN: usize = 256;
/// Largest JSON body a valid `Mail` can need: both bodies at their limit,
/// four bytes per char, plus room for escaping and the other fields.
pub const MAX_REQUEST_BYTES: usize = 2 * 4 * MAX_BODY_LEN + 4 * 1024 * 1024;

/// Key in `unique_args` that carries the tracking id back on provider events.
pub const STATS_ID_ARG: &str = "pmStatsID";
/// Key in `unique_args` that carries the sending environment.
pub const ENV_ID_ARG: &str = "pmEnvID";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mail {
    pub to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_name: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_name: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub html: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply_to: String,
    /// Passed through to the provider and returned on its events.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub unique_args: HashMap<String, String>,
    /// Category flags, checked against the recipient's blocked flags.
    #[serde(default)]
    pub flags: i64,
    /// Optional correlation id for "last email of this kind" lookups.
    #[serde(rename = "uniqueID", default, skip_serializing_if = "String::is_empty")]
    pub unique_id: String,
}

impl Mail {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_address("to", &self.to)?;
        if self.to.ends_with("@test") {
            return Err(ValidationError::new("to address cannot end in @test"));
        }
        validate_address("from", &self.from)?;
        if !self.reply_to.is_empty() {
            validate_address("replyTo", &self.reply_to)?;
        }
        max_len("toName", &self.to_name, MAX_ADDRESS_LEN)?;
        max_len("fromName", &self.from_name, MAX_ADDRESS_LEN)?;

        if self.subject.is_empty() {
            return Err(ValidationError::new("subject is required"));
        }
        max_len("subject", &self.subject, MAX_SUBJECT_LEN)?;

        if self.html.is_empty() && self.text.is_empty() {
            return Err(ValidationError::new("you must send either html or text"));
        }
        max_len("html", &self.html, MAX_BODY_LEN)?;
        max_len("text", &self.text, MAX_BODY_LEN)?;

        for (k, v) in &self.unique_args {
            max_len("uniqueArgs key", k, MAX_ARG_LEN)?;
            max_len(&format!("uniqueArgs[{k}]"), v, MAX_ARG_LEN)?;
        }
        max_len("uniqueID", &self.unique_id, MAX_ARG_LEN)?;
        Ok(())
    }

    /// Correlation id as stored on the tracking record.
    pub fn correlation_id(&self) -> Option<&str> {
        Some(self.unique_id.as_str()).filter(|s| !s.is_empty())
    }
}

pub fn is_valid_address(addr: &str) -> bool {
    addr.parse::<Address>().is_ok()
}

pub(crate) fn validate_address(field: &str, addr: &str) -> Result<(), ValidationError> {
    if addr.is_empty() {
        return Err(ValidationError::new(format!("{field} is required")));
    }
    max_len(field, addr, MAX_ADDRESS_LEN)?;
    if !is_valid_address(addr) {
        return Err(ValidationError::new(format!(
            "{field} is not a valid email address"
        )));
    }
    Ok(())
}

pub(crate) fn max_len(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::new(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}
