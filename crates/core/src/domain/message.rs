// Queue Message Model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{Job, JobId, Priority};

/// Store-assigned message identity. Stable across redeliveries.
pub type MessageId = i64;

/// Broker-assigned tag, unique per delivery (a redelivered message gets a
/// new tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryTag(pub u64);

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// JSON body published to the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_id: JobId,
    pub original_path: PathBuf,
    pub filename: String,
    pub timestamp: i64, // epoch ms
}

impl JobMessage {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            original_path: job.source_ref.clone(),
            filename: job.display_name.clone(),
            timestamp: job.enqueued_at,
        }
    }

    pub fn into_job(self, priority: Priority) -> Job {
        Job::new(
            self.job_id,
            self.timestamp,
            self.original_path,
            self.filename,
            priority,
        )
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let message: Self = serde_json::from_slice(bytes)
            .map_err(|e| DomainError::ValidationError(format!("malformed message: {}", e)))?;
        if message.job_id.is_empty() {
            return Err(DomainError::ValidationError(
                "message is missing jobId".to_string(),
            ));
        }
        Ok(message)
    }
}

/// Publish options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub priority: Priority,
    pub persistent: bool,
}

impl PublishOptions {
    pub fn persistent(priority: Priority) -> Self {
        Self {
            priority,
            persistent: true,
        }
    }
}

/// A message handed to a subscriber.
///
/// Owned by the consumer while it is processing; settling it with
/// `ack`/`nack`/`release` gives it back to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub message_id: MessageId,
    pub queue: String,
    pub job: Job,
    /// True when this message was handed out before
    pub redelivered: bool,
    /// Counted processing attempts, including this one
    pub delivery_count: u32,
}
