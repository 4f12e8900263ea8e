//! models/relay_model.rs
//! Units of work moved through the queue relay.

use std::fmt;

use tokio::sync::oneshot;

use crate::error::QueueError;

/// Logical channels on the durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    /// Outbound send requests.
    Send,
    /// Inbound lifecycle events.
    Stats,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Send, QueueName::Stats];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Send => "send",
            QueueName::Stats => "stats",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serialized request for one of the queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayJob {
    pub queue: QueueName,
    pub payload: String,
}

/// A job handed to the dispatcher task together with where to report the push result.
#[derive(Debug)]
pub struct PendingPush {
    pub job: RelayJob,
    pub reply: oneshot::Sender<Result<(), QueueError>>,
}
