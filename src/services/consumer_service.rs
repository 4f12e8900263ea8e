//! services/consumer_service.rs
//! Long-running pull loops, one per queue, restarted after transport failures.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::QueueError;
use crate::models::relay_model::QueueName;
use crate::services::queue_transport::QueueTransport;
use crate::services::relay_service::{HandlerMap, JobHandler};

/// How long a single pull blocks before looping around.
const PULL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Running,
    BackingOff,
}

#[derive(Clone)]
pub struct ConsumerSupervisor {
    transport: Arc<dyn QueueTransport>,
    backoff: Duration,
    pull_wait: Duration,
}

impl ConsumerSupervisor {
    pub fn new(transport: Arc<dyn QueueTransport>, backoff: Duration) -> Self {
        Self {
            transport,
            backoff,
            pull_wait: PULL_WAIT,
        }
    }

    pub fn with_pull_wait(mut self, pull_wait: Duration) -> Self {
        self.pull_wait = pull_wait;
        self
    }

    /// Starts one loop per registered queue. The loops never return.
    pub fn spawn_all(&self, handlers: &HandlerMap) -> Vec<JoinHandle<()>> {
        handlers
            .iter()
            .map(|(queue, handler)| self.spawn(*queue, handler.clone()))
            .collect()
    }

    pub fn spawn(&self, queue: QueueName, handler: Arc<dyn JobHandler>) -> JoinHandle<()> {
        log::info!("Starting consumer for queue '{}'", queue);
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run(queue, handler).await })
    }

    async fn run(&self, queue: QueueName, handler: Arc<dyn JobHandler>) {
        let mut state = ConsumerState::Running;
        loop {
            state = match state {
                ConsumerState::Running => match self.consume_one(queue, handler.as_ref()).await {
                    Ok(_) => ConsumerState::Running,
                    Err(e) => {
                        log::error!(
                            "Consumer error on queue '{}': {}; retrying in {:?}",
                            queue,
                            e,
                            self.backoff
                        );
                        ConsumerState::BackingOff
                    }
                },
                ConsumerState::BackingOff => {
                    tokio::time::sleep(self.backoff).await;
                    ConsumerState::Running
                }
            };
        }
    }

    /// Pulls one item, hands it to the handler, and removes it whatever the
    /// handler reported. Returns whether an item was processed. Only transport
    /// failures are errors.
    pub async fn consume_one(
        &self,
        queue: QueueName,
        handler: &dyn JobHandler,
    ) -> Result<bool, QueueError> {
        let Some(item) = self.transport.pull(queue, self.pull_wait).await? else {
            return Ok(false);
        };

        if let Err(e) = handler.handle(&item.payload).await {
            log::warn!("Handler for queue '{}' reported failure: {:?}", queue, e);
        }

        self.transport.ack(queue, &item).await?;
        Ok(true)
    }
}
