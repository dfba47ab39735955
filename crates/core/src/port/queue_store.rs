// Queue Store Port (Interface)
// Storage half of the broker: ordering, TTL, max-length and message state.
// Subscription, prefetch and delivery tags live in application::broker.

use crate::domain::{JobMessage, MessageId, Priority, QueueConfig, QueueDepth};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Message about to be stored
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub body: JobMessage,
    pub priority: Priority,
    pub persistent: bool,
    pub enqueued_at: i64, // epoch ms
}

/// Message as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub queue: String,
    pub body: JobMessage,
    pub priority: Priority,
    pub persistent: bool,
    pub enqueued_at: i64,
    pub expires_at: i64,
    pub redelivered: bool,
    pub delivery_count: u32,
}

/// Outcome of startup recovery for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Unacked messages returned to the ready state
    pub requeued: u64,
    /// Non-persistent messages dropped
    pub dropped_transient: u64,
}

/// Store interface for queued messages
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Declare a queue. Idempotent for an identical config; a config that
    /// differs from the existing declaration is a `Conflict`.
    async fn declare(&self, config: &QueueConfig) -> Result<()>;

    /// Append a message. Fails with `QueueOverflow` when the ready count has
    /// reached the queue's max length.
    async fn push(&self, queue: &str, message: NewMessage) -> Result<MessageId>;

    /// Take the next ready message (high priority first, FIFO within a class),
    /// moving it to the unacked state and counting one delivery attempt.
    /// Ready messages whose TTL has passed are dropped on the way.
    async fn pop_next(&self, queue: &str, now_millis: i64) -> Result<Option<StoredMessage>>;

    /// Remove an unacked message for good
    async fn ack(&self, queue: &str, id: MessageId) -> Result<()>;

    /// Return an unacked message to its original position, marked
    /// redelivered. With `count_attempt = false` the delivery attempt taken
    /// by `pop_next` is given back.
    async fn requeue(&self, queue: &str, id: MessageId, count_attempt: bool) -> Result<()>;

    /// Drop an unacked message (nack without requeue)
    async fn discard(&self, queue: &str, id: MessageId) -> Result<()>;

    /// Ready / unacked counts
    async fn depth(&self, queue: &str) -> Result<QueueDepth>;

    /// Startup recovery: unacked messages become ready again, non-persistent
    /// messages are dropped.
    async fn recover(&self, queue: &str) -> Result<RecoveryReport>;
}

// ============================================================================
// In-memory implementation (tests, and LEVELER_DB_PATH=memory)
// ============================================================================

pub mod memory {
    use super::*;
    use crate::error::AppError;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicI64, Ordering};
    use tracing::{debug, warn};

    struct MemoryQueue {
        config: QueueConfig,
        // (priority rank, id): first entry is the next message to deliver
        ready: BTreeMap<(u8, MessageId), StoredMessage>,
        unacked: HashMap<MessageId, StoredMessage>,
    }

    /// Non-durable queue store held in process memory
    pub struct InMemoryQueueStore {
        queues: Mutex<HashMap<String, MemoryQueue>>,
        next_id: AtomicI64,
    }

    impl Default for InMemoryQueueStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryQueueStore {
        pub fn new() -> Self {
            Self {
                queues: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
            }
        }
    }

    fn not_declared(queue: &str) -> AppError {
        AppError::NotFound(format!("Queue {} is not declared", queue))
    }

    fn not_unacked(queue: &str, id: MessageId) -> AppError {
        AppError::NotFound(format!("Message {} is not unacked in queue {}", id, queue))
    }

    #[async_trait]
    impl QueueStore for InMemoryQueueStore {
        async fn declare(&self, config: &QueueConfig) -> Result<()> {
            config.validate()?;
            if config.durable {
                debug!(queue = %config.name, "Durable queue declared on the in-memory store");
            }

            let mut queues = self.queues.lock();
            match queues.get(&config.name) {
                Some(existing) if existing.config != *config => Err(AppError::Conflict(format!(
                    "Queue {} already declared with different arguments",
                    config.name
                ))),
                Some(_) => Ok(()),
                None => {
                    queues.insert(
                        config.name.clone(),
                        MemoryQueue {
                            config: config.clone(),
                            ready: BTreeMap::new(),
                            unacked: HashMap::new(),
                        },
                    );
                    Ok(())
                }
            }
        }

        async fn push(&self, queue: &str, message: NewMessage) -> Result<MessageId> {
            let mut queues = self.queues.lock();
            let q = queues.get_mut(queue).ok_or_else(|| not_declared(queue))?;

            if q.ready.len() >= q.config.max_length {
                return Err(AppError::QueueOverflow {
                    queue: queue.to_string(),
                    max_length: q.config.max_length,
                });
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let stored = StoredMessage {
                id,
                queue: queue.to_string(),
                expires_at: message.enqueued_at + q.config.message_ttl_ms(),
                body: message.body,
                priority: message.priority,
                persistent: message.persistent,
                enqueued_at: message.enqueued_at,
                redelivered: false,
                delivery_count: 0,
            };
            q.ready.insert((stored.priority.rank(), id), stored);
            Ok(id)
        }

        async fn pop_next(&self, queue: &str, now_millis: i64) -> Result<Option<StoredMessage>> {
            let mut queues = self.queues.lock();
            let q = queues.get_mut(queue).ok_or_else(|| not_declared(queue))?;

            while let Some((_, mut message)) = q.ready.pop_first() {
                if message.expires_at <= now_millis {
                    warn!(
                        queue = %queue,
                        job_id = %message.body.job_id,
                        "Message TTL expired, dropping"
                    );
                    continue;
                }
                message.delivery_count += 1;
                q.unacked.insert(message.id, message.clone());
                return Ok(Some(message));
            }
            Ok(None)
        }

        async fn ack(&self, queue: &str, id: MessageId) -> Result<()> {
            let mut queues = self.queues.lock();
            let q = queues.get_mut(queue).ok_or_else(|| not_declared(queue))?;
            q.unacked
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| not_unacked(queue, id))
        }

        async fn requeue(&self, queue: &str, id: MessageId, count_attempt: bool) -> Result<()> {
            let mut queues = self.queues.lock();
            let q = queues.get_mut(queue).ok_or_else(|| not_declared(queue))?;
            let mut message = q.unacked.remove(&id).ok_or_else(|| not_unacked(queue, id))?;

            message.redelivered = true;
            if !count_attempt {
                message.delivery_count = message.delivery_count.saturating_sub(1);
            }
            q.ready.insert((message.priority.rank(), message.id), message);
            Ok(())
        }

        async fn discard(&self, queue: &str, id: MessageId) -> Result<()> {
            self.ack(queue, id).await
        }

        async fn depth(&self, queue: &str) -> Result<QueueDepth> {
            let queues = self.queues.lock();
            let q = queues.get(queue).ok_or_else(|| not_declared(queue))?;
            Ok(QueueDepth {
                ready: q.ready.len() as u64,
                unacked: q.unacked.len() as u64,
            })
        }

        async fn recover(&self, queue: &str) -> Result<RecoveryReport> {
            let mut queues = self.queues.lock();
            let q = queues.get_mut(queue).ok_or_else(|| not_declared(queue))?;
            let mut report = RecoveryReport::default();

            for (_, mut message) in q.unacked.drain() {
                message.redelivered = true;
                q.ready.insert((message.priority.rank(), message.id), message);
                report.requeued += 1;
            }

            let before = q.ready.len();
            q.ready.retain(|_, m| m.persistent);
            report.dropped_transient = (before - q.ready.len()) as u64;

            Ok(report)
        }
    }

}

// ============================================================================
// Mock implementation for error paths
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Wraps another store and fails selected settlements on demand
    pub struct FlakyQueueStore {
        inner: Arc<dyn QueueStore>,
        fail_acks: AtomicBool,
        fail_requeues: AtomicBool,
    }

    impl FlakyQueueStore {
        pub fn new(inner: Arc<dyn QueueStore>) -> Self {
            Self {
                inner,
                fail_acks: AtomicBool::new(false),
                fail_requeues: AtomicBool::new(false),
            }
        }

        pub fn fail_acks(&self, fail: bool) {
            self.fail_acks.store(fail, Ordering::SeqCst);
        }

        pub fn fail_requeues(&self, fail: bool) {
            self.fail_requeues.store(fail, Ordering::SeqCst);
        }

        fn injected(op: &str) -> AppError {
            AppError::Database(format!("injected {} failure", op))
        }
    }

    #[async_trait]
    impl QueueStore for FlakyQueueStore {
        async fn declare(&self, config: &QueueConfig) -> Result<()> {
            self.inner.declare(config).await
        }

        async fn push(&self, queue: &str, message: NewMessage) -> Result<MessageId> {
            self.inner.push(queue, message).await
        }

        async fn pop_next(&self, queue: &str, now_millis: i64) -> Result<Option<StoredMessage>> {
            self.inner.pop_next(queue, now_millis).await
        }

        async fn ack(&self, queue: &str, id: MessageId) -> Result<()> {
            if self.fail_acks.load(Ordering::SeqCst) {
                return Err(Self::injected("ack"));
            }
            self.inner.ack(queue, id).await
        }

        async fn requeue(&self, queue: &str, id: MessageId, count_attempt: bool) -> Result<()> {
            if self.fail_requeues.load(Ordering::SeqCst) {
                return Err(Self::injected("requeue"));
            }
            self.inner.requeue(queue, id, count_attempt).await
        }

        async fn discard(&self, queue: &str, id: MessageId) -> Result<()> {
            self.inner.discard(queue, id).await
        }

        async fn depth(&self, queue: &str) -> Result<QueueDepth> {
            self.inner.depth(queue).await
        }

        async fn recover(&self, queue: &str) -> Result<RecoveryReport> {
            self.inner.recover(queue).await
        }
    }
}
