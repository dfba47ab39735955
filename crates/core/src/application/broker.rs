// Broker - Queue adapter over a QueueStore
//
// The store owns message state (ready / unacked, ordering, TTL, max length).
// The broker adds what a subscriber sees: delivery tags, prefetch and the
// push-style dispatch task per subscription.

use crate::application::consumer::constants::{ERROR_RECOVERY_SLEEP_DURATION, IDLE_POLL_INTERVAL};
use crate::domain::{
    Delivery, DeliveryTag, JobMessage, MessageId, PublishOptions, QueueConfig, QueueDepth,
};
use crate::error::{AppError, Result};
use crate::port::{NewMessage, QueueStore, StoredMessage, TimeProvider};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Bookkeeping for a delivery that has not been settled yet
struct InFlight {
    queue: String,
    message_id: MessageId,
    // Returned to the subscription's prefetch semaphore on drop
    _permit: OwnedSemaphorePermit,
}

enum Settlement {
    Ack,
    Requeue,
    Discard,
    Release,
}

struct BrokerInner {
    store: Arc<dyn QueueStore>,
    time_provider: Arc<dyn TimeProvider>,
    in_flight: Mutex<HashMap<DeliveryTag, InFlight>>,
    wakeups: Mutex<HashMap<String, Arc<Notify>>>,
    next_tag: AtomicU64,
}

/// Message broker handle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(store: Arc<dyn QueueStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                store,
                time_provider,
                in_flight: Mutex::new(HashMap::new()),
                wakeups: Mutex::new(HashMap::new()),
                next_tag: AtomicU64::new(1),
            }),
        }
    }

    /// Declare a queue (idempotent for identical arguments)
    pub async fn assert_queue(&self, config: &QueueConfig) -> Result<()> {
        self.inner.store.declare(config).await?;
        info!(
            queue = %config.name,
            durable = config.durable,
            max_length = config.max_length,
            message_ttl_ms = config.message_ttl_ms(),
            overflow = config.overflow.as_str(),
            "Queue asserted"
        );
        Ok(())
    }

    /// Publish a job message.
    ///
    /// Fails with `AppError::QueueOverflow` when the queue already holds
    /// `max_length` ready messages. The message is not stored in that case.
    pub async fn publish(
        &self,
        queue: &str,
        message: &JobMessage,
        options: PublishOptions,
    ) -> Result<MessageId> {
        if message.job_id.is_empty() {
            return Err(AppError::Validation("message is missing jobId".to_string()));
        }

        let id = self
            .inner
            .store
            .push(
                queue,
                NewMessage {
                    body: message.clone(),
                    priority: options.priority,
                    persistent: options.persistent,
                    enqueued_at: self.inner.time_provider.now_millis(),
                },
            )
            .await?;

        debug!(
            queue = %queue,
            job_id = %message.job_id,
            priority = %options.priority,
            message_id = id,
            "Message published"
        );
        self.inner.wake(queue);
        Ok(id)
    }

    /// Start consuming a queue with manual acknowledgement.
    ///
    /// At most `prefetch` deliveries are unsettled at any time; the next one
    /// is only dispatched after an earlier one is acked, nacked or released.
    pub async fn subscribe(&self, queue: &str, prefetch: usize) -> Result<Subscription> {
        if prefetch == 0 {
            return Err(AppError::Validation("prefetch must be at least 1".to_string()));
        }
        // Fails with NotFound for an undeclared queue
        self.inner.store.depth(queue).await?;

        let (tx, rx) = mpsc::channel(prefetch);
        let permits = Arc::new(Semaphore::new(prefetch));
        let inner = Arc::clone(&self.inner);
        let queue_name = queue.to_string();

        let task = tokio::spawn(dispatch_loop(inner, queue_name, permits, tx));
        info!(queue = %queue, prefetch, "Subscription started");

        Ok(Subscription {
            queue: queue.to_string(),
            broker: self.clone(),
            rx,
            task: Some(task),
        })
    }

    /// Acknowledge a delivery: the message is removed for good
    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery.tag, Settlement::Ack).await
    }

    /// Negative acknowledgement. With `requeue` the message returns to its
    /// original position and counts as a delivery attempt; without it the
    /// message is discarded.
    pub async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let settlement = if requeue {
            Settlement::Requeue
        } else {
            Settlement::Discard
        };
        self.settle(delivery.tag, settlement).await
    }

    /// Hand a delivery back without counting it as an attempt.
    /// Used for admission denials and shutdown.
    pub async fn release(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery.tag, Settlement::Release).await
    }

    pub async fn depth(&self, queue: &str) -> Result<QueueDepth> {
        self.inner.store.depth(queue).await
    }

    /// Deliveries handed out and not yet settled, across all subscriptions
    pub fn unsettled(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    async fn settle(&self, tag: DeliveryTag, settlement: Settlement) -> Result<()> {
        let entry = self
            .inner
            .in_flight
            .lock()
            .remove(&tag)
            .ok_or(AppError::UnknownDeliveryTag(tag.0))?;

        let store = &self.inner.store;
        let result = match settlement {
            Settlement::Ack => store.ack(&entry.queue, entry.message_id).await,
            Settlement::Discard => store.discard(&entry.queue, entry.message_id).await,
            Settlement::Requeue => store.requeue(&entry.queue, entry.message_id, true).await,
            Settlement::Release => store.requeue(&entry.queue, entry.message_id, false).await,
        };

        match &result {
            Err(e) => {
                error!(
                    delivery_tag = %tag,
                    queue = %entry.queue,
                    message_id = entry.message_id,
                    error = %e,
                    "Failed to settle delivery"
                );
                // Keep the tag live (and its prefetch slot taken) so the
                // caller can settle again
                self.inner.in_flight.lock().insert(tag, entry);
            }
            Ok(()) => {
                if matches!(settlement, Settlement::Requeue | Settlement::Release) {
                    self.inner.wake(&entry.queue);
                }
            }
        }
        result
    }
}

impl BrokerInner {
    fn wakeup(&self, queue: &str) -> Arc<Notify> {
        let mut wakeups = self.wakeups.lock();
        Arc::clone(
            wakeups
                .entry(queue.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    fn wake(&self, queue: &str) {
        self.wakeup(queue).notify_one();
    }

    fn register(&self, message: StoredMessage, permit: OwnedSemaphorePermit) -> Delivery {
        let tag = DeliveryTag(self.next_tag.fetch_add(1, Ordering::SeqCst));
        self.in_flight.lock().insert(
            tag,
            InFlight {
                queue: message.queue.clone(),
                message_id: message.id,
                _permit: permit,
            },
        );

        Delivery {
            tag,
            message_id: message.id,
            queue: message.queue,
            job: message.body.into_job(message.priority),
            redelivered: message.redelivered,
            delivery_count: message.delivery_count,
        }
    }
}

/// Push deliveries into the subscription channel, one prefetch permit each
async fn dispatch_loop(
    inner: Arc<BrokerInner>,
    queue: String,
    permits: Arc<Semaphore>,
    tx: mpsc::Sender<Delivery>,
) {
    let wakeup = inner.wakeup(&queue);

    'dispatch: loop {
        let permit = tokio::select! {
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = tx.closed() => break,
        };

        let message = loop {
            match inner.store.pop_next(&queue, inner.time_provider.now_millis()).await {
                Ok(Some(message)) => break message,
                Ok(None) => {
                    tokio::select! {
                        _ = wakeup.notified() => {},
                        _ = sleep(IDLE_POLL_INTERVAL) => {},
                        _ = tx.closed() => break 'dispatch,
                    }
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = tx.closed() => break 'dispatch,
                    }
                }
            }
        };

        let delivery = inner.register(message, permit);
        debug!(
            queue = %queue,
            delivery_tag = %delivery.tag,
            job_id = %delivery.job.id,
            redelivered = delivery.redelivered,
            "Dispatching delivery"
        );

        if let Err(mpsc::error::SendError(delivery)) = tx.send(delivery).await {
            // Subscriber went away between pop and send
            let broker = Broker { inner: Arc::clone(&inner) };
            if let Err(e) = broker.release(&delivery).await {
                warn!(delivery_tag = %delivery.tag, error = %e, "Could not release undelivered message");
            }
            break;
        }
    }

    debug!(queue = %queue, "Dispatch loop stopped");
}

/// Receiving end of `Broker::subscribe`
pub struct Subscription {
    queue: String,
    broker: Broker,
    rx: mpsc::Receiver<Delivery>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next delivery; `None` once the subscription is closed
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Stop dispatching and release deliveries that were buffered but never
    /// handed to the caller. Returns how many were released; a delivery that
    /// cannot be released stays unacked until startup recovery.
    pub async fn close(&mut self) -> usize {
        self.rx.close();

        let mut released = 0;
        while let Some(delivery) = self.rx.recv().await {
            match self.broker.release(&delivery).await {
                Ok(()) => released += 1,
                Err(e) => warn!(
                    queue = %self.queue,
                    delivery_tag = %delivery.tag,
                    error = %e,
                    "Could not release buffered delivery"
                ),
            }
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(queue = %self.queue, error = %e, "Dispatch task ended abnormally");
            }
        }

        info!(queue = %self.queue, released, "Subscription closed");
        released
    }
}
