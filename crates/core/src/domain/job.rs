// Job Domain Model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::error::{DomainError, Result};

/// Job ID (UUID v4)
pub type JobId = String;

/// Priority class of a job.
///
/// On the wire the broker priority values are used: `1` marks a high
/// priority job and `2` a low priority one. Dequeue prefers `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    /// Files strictly larger than this are published as high priority
    pub const LARGE_FILE_THRESHOLD_BYTES: u64 = 1024 * 1024;

    /// Classify an upload by size
    pub fn for_size(size_bytes: u64) -> Self {
        if size_bytes > Self::LARGE_FILE_THRESHOLD_BYTES {
            Priority::High
        } else {
            Priority::Low
        }
    }

    /// Publish-option value (1 = high, 2 = low)
    pub fn wire_value(self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Low => 2,
        }
    }

    pub fn from_wire(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Low),
            other => Err(DomainError::InvalidPriority(other)),
        }
    }

    /// Dequeue rank, lower is served first
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

/// A unit of work: one uploaded image to extract, translate and render.
///
/// Immutable once enqueued. The redelivery counter lives on the broker's
/// `Delivery`, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_ref: PathBuf,
    pub display_name: String,
    pub enqueued_at: i64, // epoch ms
    pub priority: Priority,
}

impl Job {
    /// Create a new Job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `enqueued_at` - Timestamp in epoch ms (injected, not system time)
    /// * `source_ref` - Path of the uploaded image
    /// * `display_name` - Original file name shown to users
    /// * `priority` - Priority class
    pub fn new(
        id: impl Into<String>,
        enqueued_at: i64,
        source_ref: impl Into<PathBuf>,
        display_name: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            source_ref: source_ref.into(),
            display_name: display_name.into(),
            enqueued_at,
            priority,
        }
    }

    /// Create a test job with a deterministic ID (test-1, test-2, ...)
    ///
    /// **Note**: production code injects ids and time via providers.
    pub fn new_test(source_ref: impl Into<PathBuf>, priority: Priority) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let source_ref = source_ref.into();
        let display_name = source_ref
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("file-{}", counter));

        Self::new(
            format!("test-{}", counter),
            (counter * 1000) as i64,
            source_ref,
            display_name,
            priority,
        )
    }
}
