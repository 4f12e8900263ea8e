//! tests/support.rs
//! Fakes for the store, the queue and the provider.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tokio::sync::Notify;

use crate::error::QueueError;
use crate::models::mail_model::Mail;
use crate::models::relay_model::QueueName;
use crate::services::mailer_service::Mailer;
use crate::services::queue_transport::{QueueItem, QueueTransport};
use crate::services::relay_service::{HandlerMap, JobHandler};

/// Single-connection in-memory database with the real migrations applied.
pub async fn memory_pool() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<QueueName, VecDeque<String>>>,
    in_flight: Mutex<HashMap<QueueName, Vec<String>>>,
    notify: Notify,
    /// Number of upcoming pulls that fail with a connection error.
    pub failing_pulls: AtomicUsize,
    pub failing_pushes: AtomicBool,
    pub pull_calls: AtomicUsize,
}

impl MemoryQueue {
    pub fn pending(&self, queue: QueueName) -> Vec<String> {
        self.queues
            .lock()
            .unwrap()
            .get(&queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn in_flight(&self, queue: QueueName) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .get(&queue)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn take(&self, queue: QueueName) -> Option<QueueItem> {
        let payload = self.queues.lock().unwrap().get_mut(&queue)?.pop_front()?;
        self.in_flight
            .lock()
            .unwrap()
            .entry(queue)
            .or_default()
            .push(payload.clone());
        Some(QueueItem { payload })
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn push(&self, queue: QueueName, payload: &str) -> Result<(), QueueError> {
        if self.failing_pushes.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("connection refused".to_string()));
        }
        self.queues
            .lock()
            .unwrap()
            .entry(queue)
            .or_default()
            .push_back(payload.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn pull(
        &self,
        queue: QueueName,
        wait: Duration,
    ) -> Result<Option<QueueItem>, QueueError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_pulls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(QueueError::Connection("connection reset".to_string()));
        }
        if let Some(item) = self.take(queue) {
            return Ok(Some(item));
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        Ok(self.take(queue))
    }

    async fn ack(&self, queue: QueueName, item: &QueueItem) -> Result<(), QueueError> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(items) = in_flight.get_mut(&queue) {
            if let Some(pos) = items.iter().position(|p| p == &item.payload) {
                items.remove(pos);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Mail>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &Mail) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("provider unavailable"));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Records every payload it is given; fails them all when `fail` is set.
#[derive(Default)]
pub struct CollectingHandler {
    pub seen: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl CollectingHandler {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobHandler for CollectingHandler {
    async fn handle(&self, payload: &str) -> Result<()> {
        self.seen.lock().unwrap().push(payload.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("handler failed"));
        }
        Ok(())
    }
}

pub fn handlers(send: Arc<dyn JobHandler>, stats: Arc<dyn JobHandler>) -> HandlerMap {
    let mut map: HandlerMap = HashMap::new();
    map.insert(QueueName::Send, send);
    map.insert(QueueName::Stats, stats);
    map
}

pub fn mail_to(to: &str) -> Mail {
    Mail {
        to: to.to_string(),
        from: "noreply@example.com".to_string(),
        subject: "Welcome".to_string(),
        text: "hello there".to_string(),
        ..Default::default()
    }
}
