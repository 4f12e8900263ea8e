//! services/queue_transport.rs
//! The durable queue behind the relay. Redis lists in production.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;

use crate::error::QueueError;
use crate::models::relay_model::QueueName;

const KEY_PREFIX: &str = "postmaster:queue";

/// An item pulled off a queue. Stays in flight until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub payload: String,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Returns once the queue has durably accepted the payload.
    async fn push(&self, queue: QueueName, payload: &str) -> Result<(), QueueError>;

    /// Waits up to `wait` for the next item. `Ok(None)` means nothing arrived.
    async fn pull(&self, queue: QueueName, wait: Duration)
        -> Result<Option<QueueItem>, QueueError>;

    /// Removes a pulled item for good.
    async fn ack(&self, queue: QueueName, item: &QueueItem) -> Result<(), QueueError>;
}

fn queue_key(queue: QueueName) -> String {
    format!("{KEY_PREFIX}:{queue}")
}

fn inflight_key(queue: QueueName) -> String {
    format!("{KEY_PREFIX}:{queue}:inflight")
}

/// Queue on Redis lists: `LPUSH` in, `BLMOVE` into an in-flight list out,
/// `LREM` from the in-flight list on acknowledgement.
pub struct RedisQueue {
    client: Client,
    manager: ConnectionManager,
    /// Blocking pulls get their own connection per queue so they never stall pushes.
    blocking: HashMap<QueueName, Mutex<Option<MultiplexedConnection>>>,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client =
            Client::open(redis_url).map_err(|e| QueueError::Connection(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let blocking = QueueName::ALL
            .into_iter()
            .map(|q| (q, Mutex::new(None)))
            .collect();

        log::info!("Connected to redis queue at {}", redacted(redis_url));
        Ok(Self {
            client,
            manager,
            blocking,
        })
    }

    /// Moves items left in flight by a previous process back onto their queue.
    pub async fn restore_in_flight(&self, queue: QueueName) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let mut restored = 0;
        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(inflight_key(queue))
                .arg(queue_key(queue))
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            restored += 1;
        }
        if restored > 0 {
            log::warn!(
                "Restored {} in-flight job(s) to queue '{}'",
                restored,
                queue
            );
        }
        Ok(restored)
    }

    async fn blocking_connection(
        &self,
        slot: &mut Option<MultiplexedConnection>,
    ) -> Result<MultiplexedConnection, QueueError> {
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl QueueTransport for RedisQueue {
    async fn push(&self, queue: QueueName, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.lpush(queue_key(queue), payload).await?;
        Ok(())
    }

    async fn pull(
        &self,
        queue: QueueName,
        wait: Duration,
    ) -> Result<Option<QueueItem>, QueueError> {
        let Some(slot) = self.blocking.get(&queue) else {
            return Err(QueueError::Command(format!("unknown queue '{queue}'")));
        };
        let mut slot = slot.lock().await;
        let mut conn = self.blocking_connection(&mut slot).await?;

        let result: redis::RedisResult<Option<String>> = redis::cmd("BLMOVE")
            .arg(queue_key(queue))
            .arg(inflight_key(queue))
            .arg("RIGHT")
            .arg("LEFT")
            .arg(wait.as_secs_f64())
            .query_async(&mut conn)
            .await;

        match result {
            Ok(payload) => Ok(payload.map(|payload| QueueItem { payload })),
            Err(e) => {
                // Reconnect on the next pull.
                *slot = None;
                Err(e.into())
            }
        }
    }

    async fn ack(&self, queue: QueueName, item: &QueueItem) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.lrem(inflight_key(queue), 1, &item.payload).await?;
        Ok(())
    }
}

/// Hides the password part of a redis URL for logging.
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
