//! Durable queue behavior on the SQLite store

mod common;

use common::*;
use leveler_core::application::{
    BatchConfig, Batcher, Consumer, ConsumerConfig, DelayModel, RecoveryService, TokenBucket,
    UploadedFile,
};
use leveler_core::domain::{Priority, QueueConfig, QueueDepth};
use leveler_core::port::id_provider::SequentialIdProvider;
use leveler_core::port::time_provider::SystemTimeProvider;
use leveler_infra_system::LatencyModel;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const QUEUE: &str = "queue-based-load-leveling";

fn cleanup(dir: &Path) {
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_unacked_message_is_redelivered_after_restart() {
    let dir = temp_dir("leveler-restart");
    let db = dir.join("queue.db");
    let source = write_image(&dir, "a.png");

    let job_id = {
        let store = sqlite_store(&db).await;
        let broker = broker_on(store);
        broker.assert_queue(&QueueConfig::new(QUEUE)).await.unwrap();
        let job_id = publish_file(&broker, QUEUE, &source, Priority::Low).await;

        // Taken by a consumer that then crashes without settling
        let mut subscription = broker.subscribe(QUEUE, 1).await.unwrap();
        let delivery = subscription.next().await.unwrap();
        assert!(!delivery.redelivered);
        subscription.close().await;
        assert_eq!(
            broker.depth(QUEUE).await.unwrap(),
            QueueDepth { ready: 0, unacked: 1 }
        );
        job_id
    };

    let store = sqlite_store(&db).await;
    let report = RecoveryService::new(store.clone())
        .recover_queue(QUEUE)
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);

    let broker = broker_on(store);
    let mut subscription = broker.subscribe(QUEUE, 1).await.unwrap();
    let delivery = subscription.next().await.unwrap();
    assert_eq!(delivery.job.id, job_id);
    assert!(delivery.redelivered);
    broker.ack(&delivery).await.unwrap();
    subscription.close().await;

    cleanup(&dir);
}

#[tokio::test]
async fn test_consumer_drains_sqlite_queue() {
    let dir = temp_dir("leveler-sqlite-e2e");
    let broker = broker_on(sqlite_store(&dir.join("queue.db")).await);
    broker.assert_queue(&QueueConfig::new(QUEUE)).await.unwrap();
    for i in 0..5 {
        let source = write_image(&dir, &format!("s{}.png", i));
        publish_file(&broker, QUEUE, &source, Priority::Low).await;
    }

    let consumer = Consumer::new(
        broker.clone(),
        Arc::new(TokenBucket::new(10.0, 20.0)),
        real_pipeline(LatencyModel::none(), &dir.join("output")),
        ConsumerConfig::new(QUEUE),
    );
    let (tx, handle) = start(&consumer);
    let stats = consumer.stats();
    wait_until(|| stats.snapshot().acked == 5).await;
    tx.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(broker.depth(QUEUE).await.unwrap(), QueueDepth::default());
    let rendered = std::fs::read_dir(dir.join("output")).unwrap().count();
    assert_eq!(rendered, 5);

    cleanup(&dir);
}

#[tokio::test]
async fn test_large_upload_is_served_first() {
    let dir = temp_dir("leveler-priority");
    let broker = broker_on(sqlite_store(&dir.join("queue.db")).await);
    broker.assert_queue(&QueueConfig::new(QUEUE)).await.unwrap();

    let small = write_image(&dir, "small.png");
    let large = dir.join("large.png");
    std::fs::write(&large, vec![b'x'; 2 * 1024 * 1024]).unwrap();

    let batcher = Batcher::new(
        broker.clone(),
        BatchConfig::new(QUEUE)
            .with_sizes(vec![10])
            .with_delay(DelayModel::Fixed(Duration::ZERO)),
        Arc::new(SequentialIdProvider::new("job")),
        Arc::new(SystemTimeProvider),
    )
    .unwrap();

    let uploaded = |path: &Path| UploadedFile {
        path: path.to_path_buf(),
        filename: path.file_name().unwrap().to_string_lossy().into_owned(),
        size_bytes: std::fs::metadata(path).unwrap().len(),
    };
    let report = batcher
        .submit(vec![uploaded(&small), uploaded(&small), uploaded(&large)])
        .await
        .unwrap();
    assert_eq!(report.queued[2].priority, Priority::High);

    let mut subscription = broker.subscribe(QUEUE, 1).await.unwrap();
    let first = subscription.next().await.unwrap();
    assert_eq!(first.job.display_name, "large.png");
    assert_eq!(first.job.priority, Priority::High);
    broker.ack(&first).await.unwrap();
    subscription.close().await;

    cleanup(&dir);
}
