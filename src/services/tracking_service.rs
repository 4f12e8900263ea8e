//! services/tracking_service.rs
//! Lifecycle tracker: one record per send, state bits OR-ed in as provider
//! events arrive.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::models::stats_model::{LifecycleEvent, TrackingRecord};

const SELECT_COLUMNS: &str = "id, recipient, send_flags, state_flags, correlation_id, \
     created_at, updated_at, failure_reason";

#[derive(Clone, Debug)]
pub struct TrackingService {
    /// `None` when no store is configured; tracking is then skipped.
    db_pool: Option<Pool<Sqlite>>,
}

impl TrackingService {
    pub fn new(db_pool: Option<Pool<Sqlite>>) -> Self {
        TrackingService { db_pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        if let Some(pool) = &self.db_pool {
            sqlx::migrate!("./migrations")
                .run(pool)
                .await
                .context("Failed to run tracking migrations")?;
        }
        Ok(())
    }

    fn pool(&self) -> Result<&Pool<Sqlite>, TrackerError> {
        self.db_pool.as_ref().ok_or(TrackerError::StoreUnavailable)
    }

    /// Stores a fresh record and returns its id. `None` when the store is
    /// missing or the insert failed; sending goes ahead untracked.
    pub async fn create(
        &self,
        recipient: &str,
        send_flags: i64,
        correlation_id: Option<&str>,
    ) -> Option<String> {
        let pool = self.db_pool.as_ref()?;
        let id = Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());

        let inserted = sqlx::query(
            r#"
            INSERT INTO tracking_records (
                id, recipient, send_flags, state_flags, correlation_id,
                created_at, updated_at, failure_reason
            )
            VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5, NULL)
            "#,
        )
        .bind(&id)
        .bind(recipient)
        .bind(send_flags)
        .bind(correlation_id)
        .bind(&now)
        .execute(pool)
        .await;

        match inserted {
            Ok(_) => Some(id),
            Err(e) => {
                log::error!(
                    "Error inserting tracking record for {}: {}",
                    recipient,
                    e
                );
                None
            }
        }
    }

    /// Compensating removal for a send that never reached the provider.
    pub async fn delete(&self, id: &str) -> Result<(), TrackerError> {
        let id = parse_id(id)?;
        let pool = self.pool()?;
        sqlx::query("DELETE FROM tracking_records WHERE id = ?1")
            .bind(&id)
            .execute(pool)
            .await?;
        Ok(())
    }

    // ----------------------------------------------------------------
    // Actualización de estado: solo OR, nunca se borran bits
    // ----------------------------------------------------------------

    /// Sets `bit` in the record's state. Applying the same bit twice is a no-op.
    /// `reason` is only written when non-empty.
    pub async fn apply_state(&self, id: &str, bit: i64, reason: &str) -> Result<(), TrackerError> {
        let id = match parse_id(id) {
            Ok(id) => id,
            Err(e) => {
                log::warn!(
                    "Invalid id sent to apply_state: id={} flag={} reason={}",
                    id,
                    bit,
                    reason
                );
                return Err(e);
            }
        };
        let pool = self.pool()?;
        let now = timestamp(Utc::now());
        let reason = Some(reason).filter(|r| !r.is_empty());

        let result = sqlx::query(
            r#"
            UPDATE tracking_records
            SET state_flags = state_flags | ?1,
                updated_at = ?2,
                failure_reason = COALESCE(?3, failure_reason)
            WHERE id = ?4
            "#,
        )
        .bind(bit)
        .bind(&now)
        .bind(reason)
        .bind(&id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound(id));
        }
        Ok(())
    }

    pub async fn mark(
        &self,
        id: &str,
        event: LifecycleEvent,
        reason: &str,
    ) -> Result<(), TrackerError> {
        let reason = if event.keeps_reason() { reason } else { "" };
        self.apply_state(id, event.flag(), reason).await
    }

    // ----------------------------------------------------------------
    // Consultas
    // ----------------------------------------------------------------

    pub async fn get(&self, id: &str) -> Result<Option<TrackingRecord>, TrackerError> {
        let id = parse_id(id)?;
        let pool = self.pool()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM tracking_records WHERE id = ?1");
        let row = sqlx::query(&sql).bind(&id).fetch_optional(pool).await?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Newest record sent to `recipient` with this correlation id.
    pub async fn get_latest_by_correlation(
        &self,
        recipient: &str,
        correlation_id: &str,
    ) -> Result<Option<TrackingRecord>, TrackerError> {
        let pool = self.pool()?;
        // rowid breaks ties between records created within the same microsecond
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM tracking_records \
             WHERE correlation_id = ?1 AND recipient = ?2 \
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(correlation_id)
            .bind(recipient)
            .fetch_optional(pool)
            .await?;
        row.map(|r| record_from_row(&r)).transpose()
    }
}

/// Canonical form of a tracking id, or `InvalidId`.
fn parse_id(id: &str) -> Result<String, TrackerError> {
    Uuid::parse_str(id)
        .map(|u| u.to_string())
        .map_err(|_| TrackerError::InvalidId(id.to_string()))
}

/// Fixed-width so that string order is time order.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TrackerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TrackerError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn record_from_row(row: &SqliteRow) -> Result<TrackingRecord, TrackerError> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(TrackingRecord {
        id: row.try_get("id")?,
        recipient: row.try_get("recipient")?,
        send_flags: row.try_get("send_flags")?,
        state_flags: row.try_get("state_flags")?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        failure_reason: row.try_get("failure_reason")?,
    })
}
