// Redelivery policy
use serde::Serialize;
use tracing::warn;

/// What to do with a delivery before it is processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// Run it (admission control still applies)
    Process,
    /// Too many counted attempts: move it to the dead-letter queue
    DeadLetter { queue: String },
}

/// How often a failing message may come back.
///
/// `Unlimited` requeues failures forever with no backoff. `DeadLetter` caps
/// counted attempts; admission denials and shutdown hand-backs are released,
/// not nacked, so they never count.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RedeliveryPolicy {
    #[default]
    Unlimited,
    DeadLetter { max_deliveries: u32, queue: String },
}

impl RedeliveryPolicy {
    /// Dead-letter after `max_deliveries` counted attempts into `{source}.dead`
    pub fn dead_letter_for(source_queue: &str, max_deliveries: u32) -> Self {
        RedeliveryPolicy::DeadLetter {
            max_deliveries,
            queue: format!("{}.dead", source_queue),
        }
    }

    /// Decide for a delivery on its `delivery_count`-th counted attempt
    ///
    /// # Example
    /// With `max_deliveries = 3`, attempts 1-3 are processed and the fourth
    /// delivery is dead-lettered.
    pub fn decide(&self, delivery_count: u32) -> RedeliveryDecision {
        match self {
            RedeliveryPolicy::Unlimited => RedeliveryDecision::Process,
            RedeliveryPolicy::DeadLetter {
                max_deliveries,
                queue,
            } => {
                if delivery_count > *max_deliveries {
                    warn!(
                        delivery_count,
                        max_deliveries = *max_deliveries,
                        dead_letter_queue = %queue,
                        "Max deliveries exceeded"
                    );
                    RedeliveryDecision::DeadLetter {
                        queue: queue.clone(),
                    }
                } else {
                    RedeliveryDecision::Process
                }
            }
        }
    }

    pub fn dead_letter_queue(&self) -> Option<&str> {
        match self {
            RedeliveryPolicy::Unlimited => None,
            RedeliveryPolicy::DeadLetter { queue, .. } => Some(queue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_always_processes() {
        let policy = RedeliveryPolicy::default();
        assert_eq!(policy.decide(1), RedeliveryDecision::Process);
        assert_eq!(policy.decide(u32::MAX), RedeliveryDecision::Process);
        assert_eq!(policy.dead_letter_queue(), None);
    }

    #[test]
    fn test_dead_letter_after_cap() {
        let policy = RedeliveryPolicy::dead_letter_for("jobs", 3);
        assert_eq!(policy.dead_letter_queue(), Some("jobs.dead"));

        for attempt in 1..=3 {
            assert_eq!(policy.decide(attempt), RedeliveryDecision::Process);
        }
        assert_eq!(
            policy.decide(4),
            RedeliveryDecision::DeadLetter {
                queue: "jobs.dead".to_string()
            }
        );
    }
}
