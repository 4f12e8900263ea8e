//! services/relay_service.rs
//! Moves jobs from producers to the durable queue, or runs them inline when
//! no queue is configured.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{QueueError, RelayError};
use crate::models::relay_model::{PendingPush, QueueName, RelayJob};
use crate::services::queue_transport::QueueTransport;

/// Capacity of the channel feeding the dispatcher task.
const DISPATCH_BUFFER: usize = 256;

/// Processes one payload from a queue. Must tolerate redelivery.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &str) -> anyhow::Result<()>;
}

pub type HandlerMap = HashMap<QueueName, Arc<dyn JobHandler>>;

enum RelayMode {
    Queued { jobs: mpsc::Sender<PendingPush> },
    Direct,
}

/// Chosen once at startup and fixed for the life of the process.
pub struct QueueRelay {
    mode: RelayMode,
    handlers: HandlerMap,
}

impl QueueRelay {
    /// Pushes go through a single dispatcher task that owns the transport.
    /// Must be called from within a tokio runtime.
    pub fn queued(transport: Arc<dyn QueueTransport>, handlers: HandlerMap) -> Self {
        let (tx, rx) = mpsc::channel(DISPATCH_BUFFER);
        tokio::spawn(run_dispatcher(transport, rx));
        log::info!("Queue relay running in queued mode");
        Self {
            mode: RelayMode::Queued { jobs: tx },
            handlers,
        }
    }

    pub fn direct(handlers: HandlerMap) -> Self {
        log::info!("Queue relay running in direct mode (no queue configured)");
        Self {
            mode: RelayMode::Direct,
            handlers,
        }
    }

    pub fn handler(&self, queue: QueueName) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&queue).cloned()
    }

    /// Queued mode: resolves once the push is acknowledged by the queue, not
    /// once the job is processed. Direct mode: runs the handler and returns
    /// its result.
    pub async fn submit(&self, queue: QueueName, payload: String) -> Result<(), RelayError> {
        match &self.mode {
            RelayMode::Queued { jobs } => {
                let (reply, response) = oneshot::channel();
                let pending = PendingPush {
                    job: RelayJob { queue, payload },
                    reply,
                };
                jobs.send(pending)
                    .await
                    .map_err(|_| QueueError::DispatcherClosed)?;
                response.await.map_err(|_| QueueError::DispatcherClosed)??;
                Ok(())
            }
            RelayMode::Direct => {
                let handler = self
                    .handler(queue)
                    .ok_or_else(|| RelayError::NoHandler(queue.to_string()))?;
                handler.handle(&payload).await.map_err(RelayError::Handler)
            }
        }
    }
}

async fn run_dispatcher(transport: Arc<dyn QueueTransport>, mut rx: mpsc::Receiver<PendingPush>) {
    while let Some(PendingPush { job, reply }) = rx.recv().await {
        let result = transport.push(job.queue, &job.payload).await;
        if let Err(e) = &result {
            log::error!("Failed to push job onto queue '{}': {}", job.queue, e);
        }
        // The submitter may have gone away; nothing to report to then.
        let _ = reply.send(result);
    }
    log::info!("Queue dispatcher stopped");
}
