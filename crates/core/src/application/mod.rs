// Application Layer - Use Cases and Business Logic

pub mod broker;
pub mod consumer;
pub mod direct;
pub mod pipeline;
pub mod producer;
pub mod recovery;
pub mod redelivery;
pub mod token_bucket;

// Re-exports
pub use broker::{Broker, Subscription};
pub use consumer::{
    shutdown_channel, Consumer, ConsumerConfig, ConsumerStats, ConsumerStatsSnapshot,
    DeliveryOutcome, ShutdownSender, ShutdownToken,
};
pub use direct::{DirectOutcome, DirectProcessor, DirectRequest};
pub use pipeline::{FanOut, Pipeline, PipelineResult, RoundRobinPool};
pub use producer::{
    BatchConfig, Batcher, DelayModel, QueuedFile, RejectedFile, SubmitReport, UploadedFile,
};
pub use recovery::RecoveryService;
pub use redelivery::{RedeliveryDecision, RedeliveryPolicy};
pub use token_bucket::{TokenBucket, TokenBucketSnapshot};
