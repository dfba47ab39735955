//! RPC Request/Response Types
//!
//! JSON-RPC method parameters and results. Field names are camelCase on the
//! wire.

use leveler_core::application::{
    ConsumerStatsSnapshot, QueuedFile, RejectedFile, TokenBucketSnapshot,
};
use leveler_core::domain::QueueDepth;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// upload.v1 - Queue one stored file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub path: PathBuf,
    /// Defaults to the last component of `path`
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub file_id: String,
}

/// upload.batch.v1 - Queue many stored files in shaped batches
#[derive(Debug, Clone, Deserialize)]
pub struct UploadBatchRequest {
    pub files: Vec<UploadRequest>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatchResponse {
    pub message: String,
    pub batch_size: usize,
    pub files: Vec<QueuedFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedFile>,
}

/// status.v1 - Where is my output?
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl StatusResponse {
    pub fn processing() -> Self {
        Self {
            status: "processing".to_string(),
            output_path: None,
        }
    }

    pub fn done(path: PathBuf) -> Self {
        Self {
            status: "done".to_string(),
            output_path: Some(path),
        }
    }
}

/// admin.stats.v1 - Queue, admission and consumer counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub queue: String,
    pub depth: QueueDepth,
    pub admission: TokenBucketSnapshot,
    pub consumer: ConsumerStatsSnapshot,
    pub unsettled_deliveries: usize,
    pub direct_active: usize,
    pub direct_max_concurrent: usize,
    pub uptime_seconds: u64,
}
