// Queue Domain Model

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::error::{DomainError, Result};

/// Queue identifier
pub type QueueId = String;

/// Message TTL default (x-message-ttl = 24h)
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_millis(24 * 60 * 60 * 1000);

/// Max length default (x-max-length)
pub const DEFAULT_MAX_LENGTH: usize = 10_000;

/// What happens to a publish when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Refuse the new message; existing messages are kept
    RejectPublish,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::RejectPublish => "reject-publish",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "reject-publish" => Ok(OverflowPolicy::RejectPublish),
            other => Err(DomainError::InvalidQueueConfig(format!(
                "unsupported overflow policy: {}",
                other
            ))),
        }
    }
}

/// Queue declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: QueueId,
    pub durable: bool,
    pub message_ttl: Duration,
    pub max_length: usize,
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    /// Durable queue with the standard arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            message_ttl: DEFAULT_MESSAGE_TTL,
            max_length: DEFAULT_MAX_LENGTH,
            overflow: OverflowPolicy::RejectPublish,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = ttl;
        self
    }

    /// Same arguments under a different name (used for dead-letter queues)
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn message_ttl_ms(&self) -> i64 {
        self.message_ttl.as_millis() as i64
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DomainError::InvalidQueueConfig(
                "queue name cannot be empty".to_string(),
            ));
        }
        if self.max_length == 0 {
            return Err(DomainError::InvalidQueueConfig(
                "max_length must be at least 1".to_string(),
            ));
        }
        if self.message_ttl.is_zero() {
            return Err(DomainError::InvalidQueueConfig(
                "message_ttl must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Message counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: u64,
    pub unacked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_declaration_arguments() {
        let config = QueueConfig::new("queue-based-load-leveling");
        assert!(config.durable);
        assert_eq!(config.message_ttl_ms(), 86_400_000);
        assert_eq!(config.max_length, 10_000);
        assert_eq!(config.overflow.as_str(), "reject-publish");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_length() {
        let config = QueueConfig::new("q").with_max_length(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!(
            OverflowPolicy::parse("reject-publish").unwrap(),
            OverflowPolicy::RejectPublish
        );
        assert!(OverflowPolicy::parse("drop-head").is_err());
    }
}
