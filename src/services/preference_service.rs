//! services/preference_service.rs
//! Consent gate: which categories of mail each recipient has opted out of.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Pool, Row, Sqlite};

use crate::error::PreferenceError;
use crate::models::preference_model::PreferenceRecord;

#[derive(Clone, Debug)]
pub struct PreferenceService {
    db_pool: Option<Pool<Sqlite>>,
}

#[derive(Debug, Clone, Copy)]
enum History {
    Bounce,
    Spam,
}

impl History {
    fn column(self) -> &'static str {
        match self {
            History::Bounce => "bounce_history",
            History::Spam => "spam_history",
        }
    }
}

impl PreferenceService {
    pub fn new(db_pool: Option<Pool<Sqlite>>) -> Self {
        PreferenceService { db_pool }
    }

    fn pool(&self) -> Result<&Pool<Sqlite>, PreferenceError> {
        self.db_pool.as_ref().ok_or(PreferenceError::StoreUnavailable)
    }

    /// True unless the recipient blocked any of `flags`. Without a store
    /// every send is allowed; a failing store blocks.
    pub async fn is_allowed(&self, recipient: &str, flags: i64) -> bool {
        let Some(pool) = self.db_pool.as_ref() else {
            return true;
        };
        let row = sqlx::query("SELECT blocked_flags FROM preferences WHERE recipient = ?1")
            .bind(recipient)
            .fetch_optional(pool)
            .await;

        match row {
            Ok(None) => true,
            Ok(Some(row)) => match row.try_get::<i64, _>("blocked_flags") {
                Ok(blocked) => blocked & flags == 0,
                Err(e) => {
                    log::error!("Error reading preferences for {}: {}", recipient, e);
                    false
                }
            },
            Err(e) => {
                log::error!("Error looking up preferences for {}: {}", recipient, e);
                false
            }
        }
    }

    /// Blocked flags for `recipient`, 0 when there is no record.
    pub async fn get_flags(&self, recipient: &str) -> Result<i64, PreferenceError> {
        let pool = self.pool()?;
        let flags: Option<i64> =
            sqlx::query_scalar("SELECT blocked_flags FROM preferences WHERE recipient = ?1")
                .bind(recipient)
                .fetch_optional(pool)
                .await?;
        Ok(flags.unwrap_or(0))
    }

    pub async fn get_record(
        &self,
        recipient: &str,
    ) -> Result<Option<PreferenceRecord>, PreferenceError> {
        let pool = self.pool()?;
        let row = sqlx::query(
            r#"
            SELECT recipient, blocked_flags, bounce_history, spam_history, updated_at
            FROM preferences
            WHERE recipient = ?1
            "#,
        )
        .bind(recipient)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let bounce: String = row.try_get("bounce_history")?;
        let spam: String = row.try_get("spam_history")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Some(PreferenceRecord {
            email: row.try_get("recipient")?,
            blocked_flags: row.try_get("blocked_flags")?,
            bounce_history: serde_json::from_str(&bounce)?,
            spam_history: serde_json::from_str(&spam)?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        }))
    }

    // ======================================================
    // Escrituras (una sola sentencia cada una)
    // ======================================================

    /// Replaces the blocked flags wholesale. Last writer wins.
    pub async fn set_flags(&self, recipient: &str, flags: i64) -> Result<(), PreferenceError> {
        let pool = self.pool()?;
        sqlx::query(
            r#"
            INSERT INTO preferences (recipient, blocked_flags, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(recipient) DO UPDATE
            SET blocked_flags = excluded.blocked_flags,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(recipient)
        .bind(flags)
        .bind(now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record_bounce(&self, recipient: &str) -> Result<(), PreferenceError> {
        self.append_history(recipient, History::Bounce).await
    }

    pub async fn record_spam(&self, recipient: &str) -> Result<(), PreferenceError> {
        self.append_history(recipient, History::Spam).await
    }

    async fn append_history(
        &self,
        recipient: &str,
        history: History,
    ) -> Result<(), PreferenceError> {
        let pool = self.pool()?;
        let col = history.column();
        let sql = format!(
            r#"
            INSERT INTO preferences (recipient, blocked_flags, {col}, updated_at)
            VALUES (?1, 0, json_array(?2), ?2)
            ON CONFLICT(recipient) DO UPDATE
            SET {col} = json_insert({col}, '$[#]', ?2),
                updated_at = ?2
            "#
        );
        sqlx::query(&sql)
            .bind(recipient)
            .bind(now())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Copies the blocked flags of `old` onto `new`. `old` is left as is;
    /// nothing happens when `old` has no record.
    pub async fn move_record(&self, old: &str, new: &str) -> Result<(), PreferenceError> {
        let pool = self.pool()?;
        let result = sqlx::query(
            r#"
            INSERT INTO preferences (recipient, blocked_flags, updated_at)
            SELECT ?2, blocked_flags, ?3 FROM preferences WHERE recipient = ?1
            ON CONFLICT(recipient) DO UPDATE
            SET blocked_flags = excluded.blocked_flags,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(old)
        .bind(new)
        .bind(now())
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            log::debug!("No preferences to move from {} to {}", old, new);
        }
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
