// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod message;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, Priority};
pub use message::{Delivery, DeliveryTag, JobMessage, MessageId, PublishOptions};
pub use queue::{OverflowPolicy, QueueConfig, QueueDepth, QueueId};
