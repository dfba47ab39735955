// SQLite QueueStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use leveler_core::domain::{
    JobMessage, MessageId, OverflowPolicy, Priority, QueueConfig, QueueDepth,
};
use leveler_core::error::{AppError, Result};
use leveler_core::port::{NewMessage, QueueStore, RecoveryReport, StoredMessage};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, warn};

const STATE_READY: &str = "READY";
const STATE_UNACKED: &str = "UNACKED";

/// Durable queue store. Message state survives restarts; `recover` brings
/// it back in line after a crash.
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_queue(&self, name: &str) -> Result<Option<QueueConfig>> {
        let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM queues WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(QueueRow::into_config).transpose()
    }

    async fn ensure_declared(&self, name: &str) -> Result<()> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queues WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if exists == 0 {
            return Err(not_declared(name));
        }
        Ok(())
    }
}

fn not_declared(queue: &str) -> AppError {
    AppError::NotFound(format!("Queue {} is not declared", queue))
}

fn not_unacked(queue: &str, id: MessageId) -> AppError {
    AppError::NotFound(format!("Message {} is not unacked in queue {}", id, queue))
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn declare(&self, config: &QueueConfig) -> Result<()> {
        config.validate()?;

        if let Some(existing) = self.find_queue(&config.name).await? {
            if existing != *config {
                return Err(AppError::Conflict(format!(
                    "Queue {} already declared with different arguments",
                    config.name
                )));
            }
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO queues (name, durable, message_ttl_ms, max_length, overflow)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&config.name)
        .bind(config.durable)
        .bind(config.message_ttl_ms())
        .bind(config.max_length as i64)
        .bind(config.overflow.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn push(&self, queue: &str, message: NewMessage) -> Result<MessageId> {
        let body = serde_json::to_string(&message.body)?;

        // Length check and insert in one statement so concurrent publishers
        // cannot both squeeze past max_length
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO messages (queue, body, priority, persistent, enqueued_at, expires_at, state)
            SELECT q.name, ?, ?, ?, ?, ? + q.message_ttl_ms, ?
            FROM queues q
            WHERE q.name = ?
              AND (SELECT COUNT(*) FROM messages m
                   WHERE m.queue = q.name AND m.state = ?) < q.max_length
            RETURNING id
            "#,
        )
        .bind(&body)
        .bind(message.priority.wire_value() as i64)
        .bind(message.persistent)
        .bind(message.enqueued_at)
        .bind(message.enqueued_at)
        .bind(STATE_READY)
        .bind(queue)
        .bind(STATE_READY)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match id {
            Some(id) => Ok(id),
            None => match self.find_queue(queue).await? {
                Some(config) => Err(AppError::QueueOverflow {
                    queue: queue.to_string(),
                    max_length: config.max_length,
                }),
                None => Err(not_declared(queue)),
            },
        }
    }

    async fn pop_next(&self, queue: &str, now_millis: i64) -> Result<Option<StoredMessage>> {
        self.ensure_declared(queue).await?;

        let expired = sqlx::query(
            "DELETE FROM messages WHERE queue = ? AND state = ? AND expires_at <= ?",
        )
        .bind(queue)
        .bind(STATE_READY)
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();
        if expired > 0 {
            warn!(queue = %queue, expired, "Message TTL expired, dropping");
        }

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages
            SET state = ?, delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id FROM messages
                WHERE queue = ? AND state = ?
                ORDER BY priority ASC, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(STATE_UNACKED)
        .bind(queue)
        .bind(STATE_READY)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(MessageRow::into_stored).transpose()
    }

    async fn ack(&self, queue: &str, id: MessageId) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM messages WHERE queue = ? AND id = ? AND state = ?")
            .bind(queue)
            .bind(id)
            .bind(STATE_UNACKED)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if deleted == 0 {
            return Err(not_unacked(queue, id));
        }
        Ok(())
    }

    async fn requeue(&self, queue: &str, id: MessageId, count_attempt: bool) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE messages
            SET state = ?,
                redelivered = 1,
                delivery_count = CASE WHEN ? THEN delivery_count
                                      ELSE MAX(delivery_count - 1, 0) END
            WHERE queue = ? AND id = ? AND state = ?
            "#,
        )
        .bind(STATE_READY)
        .bind(count_attempt)
        .bind(queue)
        .bind(id)
        .bind(STATE_UNACKED)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if updated == 0 {
            return Err(not_unacked(queue, id));
        }
        Ok(())
    }

    async fn discard(&self, queue: &str, id: MessageId) -> Result<()> {
        self.ack(queue, id).await
    }

    async fn depth(&self, queue: &str) -> Result<QueueDepth> {
        self.ensure_declared(queue).await?;

        let (ready, unacked): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(state = ?), 0), COALESCE(SUM(state = ?), 0)
            FROM messages WHERE queue = ?
            "#,
        )
        .bind(STATE_READY)
        .bind(STATE_UNACKED)
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(QueueDepth {
            ready: ready as u64,
            unacked: unacked as u64,
        })
    }

    async fn recover(&self, queue: &str) -> Result<RecoveryReport> {
        self.ensure_declared(queue).await?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let requeued = sqlx::query(
            "UPDATE messages SET state = ?, redelivered = 1 WHERE queue = ? AND state = ?",
        )
        .bind(STATE_READY)
        .bind(queue)
        .bind(STATE_UNACKED)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        let dropped_transient =
            sqlx::query("DELETE FROM messages WHERE queue = ? AND persistent = 0")
                .bind(queue)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(queue = %queue, requeued, dropped_transient, "SQLite queue recovered");

        Ok(RecoveryReport {
            requeued,
            dropped_transient,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    name: String,
    durable: bool,
    message_ttl_ms: i64,
    max_length: i64,
    overflow: String,
}

impl QueueRow {
    fn into_config(self) -> Result<QueueConfig> {
        Ok(QueueConfig {
            name: self.name,
            durable: self.durable,
            message_ttl: Duration::from_millis(self.message_ttl_ms.max(0) as u64),
            max_length: self.max_length.max(0) as usize,
            overflow: OverflowPolicy::parse(&self.overflow)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    queue: String,
    body: String,
    priority: i64,
    persistent: bool,
    enqueued_at: i64,
    expires_at: i64,
    redelivered: bool,
    delivery_count: i64,
}

impl MessageRow {
    fn into_stored(self) -> Result<StoredMessage> {
        Ok(StoredMessage {
            id: self.id,
            queue: self.queue,
            body: JobMessage::from_bytes(self.body.as_bytes())?,
            priority: Priority::from_wire(self.priority)?,
            persistent: self.persistent,
            enqueued_at: self.enqueued_at,
            expires_at: self.expires_at,
            redelivered: self.redelivered,
            delivery_count: self.delivery_count.max(0) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use leveler_core::domain::Job;

    async fn setup_store(config: QueueConfig) -> SqliteQueueStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SqliteQueueStore::new(pool);
        store.declare(&config).await.unwrap();
        store
    }

    fn message(priority: Priority, enqueued_at: i64) -> NewMessage {
        let job = Job::new_test("/up/in.png", priority);
        NewMessage {
            body: JobMessage::from_job(&job),
            priority,
            persistent: true,
            enqueued_at,
        }
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let store = setup_store(QueueConfig::new("q")).await;
        let low_1 = store.push("q", message(Priority::Low, 0)).await.unwrap();
        let low_2 = store.push("q", message(Priority::Low, 0)).await.unwrap();
        let high = store.push("q", message(Priority::High, 0)).await.unwrap();

        let mut order = Vec::new();
        while let Some(m) = store.pop_next("q", 1).await.unwrap() {
            order.push(m.id);
        }
        assert_eq!(order, vec![high, low_1, low_2]);
    }

    #[tokio::test]
    async fn test_body_round_trips_through_json_column() {
        let store = setup_store(QueueConfig::new("q")).await;
        let pushed = message(Priority::High, 42);
        let body = pushed.body.clone();
        store.push("q", pushed).await.unwrap();

        let popped = store.pop_next("q", 43).await.unwrap().unwrap();
        assert_eq!(popped.body, body);
        assert_eq!(popped.priority, Priority::High);
        assert_eq!(popped.delivery_count, 1);
        assert_eq!(popped.expires_at, 42 + QueueConfig::new("q").message_ttl_ms());
    }

    #[tokio::test]
    async fn test_overflow_counts_ready_only() {
        let store = setup_store(QueueConfig::new("q").with_max_length(2)).await;
        store.push("q", message(Priority::Low, 0)).await.unwrap();
        store.push("q", message(Priority::Low, 0)).await.unwrap();

        let err = store.push("q", message(Priority::Low, 0)).await.unwrap_err();
        assert!(matches!(err, AppError::QueueOverflow { max_length: 2, .. }));

        store.pop_next("q", 1).await.unwrap().unwrap();
        assert!(store.push("q", message(Priority::Low, 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_push_to_undeclared_queue() {
        let store = setup_store(QueueConfig::new("q")).await;
        let err = store.push("other", message(Priority::Low, 0)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ttl_expiry_at_dequeue() {
        let config = QueueConfig::new("q").with_message_ttl(Duration::from_millis(100));
        let store = setup_store(config).await;
        store.push("q", message(Priority::High, 0)).await.unwrap();
        let fresh = store.push("q", message(Priority::Low, 500)).await.unwrap();

        assert_eq!(store.pop_next("q", 150).await.unwrap().unwrap().id, fresh);
        assert_eq!(store.depth("q").await.unwrap(), QueueDepth { ready: 0, unacked: 1 });
    }

    #[tokio::test]
    async fn test_requeue_and_release_counting() {
        let store = setup_store(QueueConfig::new("q")).await;
        let id = store.push("q", message(Priority::Low, 0)).await.unwrap();

        let m = store.pop_next("q", 1).await.unwrap().unwrap();
        store.requeue("q", m.id, true).await.unwrap();
        let m = store.pop_next("q", 1).await.unwrap().unwrap();
        assert_eq!((m.id, m.delivery_count, m.redelivered), (id, 2, true));

        store.requeue("q", m.id, false).await.unwrap();
        let m = store.pop_next("q", 1).await.unwrap().unwrap();
        assert_eq!(m.delivery_count, 2);

        store.ack("q", m.id).await.unwrap();
        assert!(matches!(store.ack("q", m.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(store.requeue("q", m.id, true).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_redeclare() {
        let store = setup_store(QueueConfig::new("q")).await;
        assert!(store.declare(&QueueConfig::new("q")).await.is_ok());
        let err = store
            .declare(&QueueConfig::new("q").with_max_length(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_recover() {
        let store = setup_store(QueueConfig::new("q")).await;
        store.push("q", message(Priority::Low, 0)).await.unwrap();
        let mut transient = message(Priority::Low, 0);
        transient.persistent = false;
        store.push("q", transient).await.unwrap();
        store.pop_next("q", 1).await.unwrap().unwrap();

        let report = store.recover("q").await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                requeued: 1,
                dropped_transient: 1
            }
        );
        let m = store.pop_next("q", 1).await.unwrap().unwrap();
        assert!(m.redelivered);
        assert!(store.pop_next("q", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let path = std::env::temp_dir().join(format!("leveler-store-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());

        {
            let pool = create_pool(&url).await.unwrap();
            run_migrations(&pool).await.unwrap();
            let store = SqliteQueueStore::new(pool.clone());
            store.declare(&QueueConfig::new("q")).await.unwrap();
            store.push("q", message(Priority::Low, 0)).await.unwrap();
            store.push("q", message(Priority::Low, 0)).await.unwrap();
            store.pop_next("q", 1).await.unwrap().unwrap();
            pool.close().await;
        }

        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SqliteQueueStore::new(pool.clone());
        assert_eq!(store.depth("q").await.unwrap(), QueueDepth { ready: 1, unacked: 1 });

        store.recover("q").await.unwrap();
        assert_eq!(store.depth("q").await.unwrap(), QueueDepth { ready: 2, unacked: 0 });

        pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
