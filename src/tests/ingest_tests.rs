//! tests/ingest_tests.rs

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::models::relay_model::QueueName;
use crate::models::stats_model::{StatsJob, BOUNCED, DELIVERED};
use crate::services::ingest_service::{IngestReport, IngestService, StatsJobHandler};
use crate::services::preference_service::PreferenceService;
use crate::services::relay_service::{HandlerMap, QueueRelay};
use crate::services::tracking_service::TrackingService;
use crate::tests::support::{memory_pool, MemoryQueue};

struct Harness {
    ingest: IngestService,
    tracking: TrackingService,
    preferences: PreferenceService,
}

async fn direct_harness() -> Harness {
    let pool = memory_pool().await;
    let tracking = TrackingService::new(Some(pool.clone()));
    let preferences = PreferenceService::new(Some(pool));

    let mut handlers: HandlerMap = HashMap::new();
    handlers.insert(
        QueueName::Stats,
        Arc::new(StatsJobHandler::new(tracking.clone(), preferences.clone())),
    );

    Harness {
        ingest: IngestService::new(Arc::new(QueueRelay::direct(handlers))),
        tracking,
        preferences,
    }
}

fn batch(events: Vec<StatsJob>) -> Vec<Value> {
    events
        .into_iter()
        .map(|e| serde_json::to_value(e).unwrap())
        .collect()
}

fn event(email: &str, kind: &str, id: &str) -> StatsJob {
    StatsJob {
        email: email.to_string(),
        event: kind.to_string(),
        stats_id: id.to_string(),
        ..Default::default()
    }
}

#[actix_rt::test]
async fn delivered_events_update_their_records() {
    let h = direct_harness().await;
    let first = h.tracking.create("a@example.com", 0, None).await.unwrap();
    let second = h.tracking.create("b@example.com", 0, None).await.unwrap();

    let report = h
        .ingest
        .ingest(batch(vec![
            event("a@example.com", "delivered", &first),
            event("b@example.com", "delivered", &second),
        ]))
        .await;
    assert_eq!(report.accepted, 2);

    for id in [&first, &second] {
        let doc = h.tracking.get(id).await.unwrap().unwrap();
        assert_eq!(doc.state_flags, DELIVERED);
    }
}

#[actix_rt::test]
async fn foreign_environment_is_dropped() {
    let h = direct_harness().await;
    let id = h.tracking.create("a@example.com", 0, None).await.unwrap();

    let mut dev = event("a@example.com", "delivered", &id);
    dev.environment = "dev".to_string();
    let report = h.ingest.ingest(batch(vec![dev])).await;

    assert_eq!(
        report,
        IngestReport {
            dropped: 1,
            ..Default::default()
        }
    );
    assert_eq!(h.tracking.get(&id).await.unwrap().unwrap().state_flags, 0);
}

#[actix_rt::test]
async fn staging_and_legacy_ids_are_accepted() {
    let h = direct_harness().await;
    let id = h.tracking.create("a@example.com", 0, None).await.unwrap();

    let legacy: StatsJob = serde_json::from_value(json!({
        "email": "a@example.com",
        "event": "open",
        "stats_id": id,
        "pmEnvID": "staging",
    }))
    .unwrap();
    let report = h.ingest.ingest(batch(vec![legacy])).await;

    assert_eq!(report.accepted, 1);
    assert_ne!(h.tracking.get(&id).await.unwrap().unwrap().state_flags, 0);
}

#[actix_rt::test]
async fn bad_events_do_not_stop_the_batch() {
    let h = direct_harness().await;
    let id = h.tracking.create("a@example.com", 0, None).await.unwrap();

    let report = h
        .ingest
        .ingest(batch(vec![
            event("not-an-email", "delivered", &id),
            event("a@example.com", "delivered", ""),
            event("a@example.com", "deferred", &id),
            event("a@example.com", "delivered", &id),
        ]))
        .await;

    assert_eq!(report.invalid, 2);
    // Unknown event types are accepted and ignored by the consumer.
    assert_eq!(report.accepted, 2);
    assert_eq!(
        h.tracking.get(&id).await.unwrap().unwrap().state_flags,
        DELIVERED
    );
}

#[actix_rt::test]
async fn bounce_records_reason_and_history() {
    let h = direct_harness().await;
    let id = h.tracking.create("a@example.com", 0, None).await.unwrap();

    let mut bounce = event("a@example.com", "bounce", &id);
    bounce.reason = "550 mailbox unavailable".to_string();
    let mut spam = event("a@example.com", "spamreport", &id);
    spam.reason = "ignored".to_string();
    h.ingest.ingest(batch(vec![bounce, spam])).await;

    let doc = h.tracking.get(&id).await.unwrap().unwrap();
    assert_eq!(doc.state_flags & BOUNCED, BOUNCED);
    assert_eq!(doc.failure_reason.as_deref(), Some("550 mailbox unavailable"));

    let prefs = h.preferences.get_record("a@example.com").await.unwrap().unwrap();
    assert_eq!(prefs.bounce_history.len(), 1);
    assert_eq!(prefs.spam_history.len(), 1);
    assert_eq!(prefs.blocked_flags, 0);
}

#[actix_rt::test]
async fn events_for_unknown_records_are_counted_once() {
    let h = direct_harness().await;
    // Direct mode surfaces the handler error, which counts as a failed event.
    let report = h
        .ingest
        .ingest(batch(vec![event(
            "a@example.com",
            "delivered",
            "6f1c1a7e-7d8e-4c43-9a3b-2d6f0c1e2a55",
        )]))
        .await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.accepted, 0);
}

#[actix_rt::test]
async fn queued_ingest_survives_push_failures() {
    let queue = Arc::new(MemoryQueue::default());
    let pool = memory_pool().await;
    let mut handlers: HandlerMap = HashMap::new();
    handlers.insert(
        QueueName::Stats,
        Arc::new(StatsJobHandler::new(
            TrackingService::new(Some(pool.clone())),
            PreferenceService::new(Some(pool)),
        )),
    );
    let ingest = IngestService::new(Arc::new(QueueRelay::queued(queue.clone(), handlers)));

    queue.failing_pushes.store(true, Ordering::SeqCst);
    let report = ingest
        .ingest(batch(vec![event("a@example.com", "open", "abc")]))
        .await;
    assert_eq!(report.failed, 1);

    queue.failing_pushes.store(false, Ordering::SeqCst);
    let report = ingest
        .ingest(batch(vec![
            event("a@example.com", "open", "abc"),
            event("b@example.com", "open", "def"),
        ]))
        .await;
    assert_eq!(report.accepted, 2);

    let pending = queue.pending(QueueName::Stats);
    assert_eq!(pending.len(), 2);
    let carried: StatsJob = serde_json::from_str(&pending[0]).unwrap();
    assert_eq!(carried.stats_id, "abc");
    assert_eq!(carried.environment, "production");
}

#[actix_rt::test]
async fn handler_tolerates_missing_store() {
    let handler = StatsJobHandler::new(TrackingService::new(None), PreferenceService::new(None));
    let mut job = event("a@example.com", "bounce", "abc");
    job.normalize();
    assert!(handler.process(&job).await.is_ok());
}

#[actix_rt::test]
async fn undecodable_events_only_cost_themselves() {
    let h = direct_harness().await;
    let id = h.tracking.create("a@example.com", 0, None).await.unwrap();

    let report = h
        .ingest
        .ingest(vec![
            json!({ "email": "a@example.com", "event": 7, "pmStatsID": id }),
            json!("not an event"),
            json!({ "email": "a@example.com", "event": "open", "timestamp": "soon", "pmStatsID": id }),
            json!({ "email": "a@example.com", "event": "delivered", "pmStatsID": id, "reason": null }),
        ])
        .await;

    assert_eq!(report.invalid, 3);
    assert_eq!(report.accepted, 1);
    assert_eq!(
        h.tracking.get(&id).await.unwrap().unwrap().state_flags,
        DELIVERED
    );
}
