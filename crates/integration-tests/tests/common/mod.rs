//! Shared fixtures for the scenario tests
#![allow(dead_code)]

use leveler_core::application::{
    shutdown_channel, Broker, Consumer, Pipeline, ShutdownSender,
};
use leveler_core::domain::{Job, JobMessage, Priority, PublishOptions};
use leveler_core::port::time_provider::SystemTimeProvider;
use leveler_core::port::QueueStore;
use leveler_infra_sqlite::{create_pool, run_migrations, SqliteQueueStore};
use leveler_infra_system::{
    ArtifactLocator, DocumentRenderer, FileTextExtractor, GlossaryTranslator, LatencyModel,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fresh directory under the system temp dir
pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// An "image" whose printable runs read as English words
pub fn write_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"\x89PNG\r\n\x1a\nhello world\x00\x00image text\x01").unwrap();
    path
}

pub fn broker_on(store: Arc<dyn QueueStore>) -> Broker {
    Broker::new(store, Arc::new(SystemTimeProvider))
}

pub async fn sqlite_store(db_path: &Path) -> Arc<dyn QueueStore> {
    let pool = create_pool(&format!("sqlite://{}", db_path.display()))
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteQueueStore::new(pool))
}

/// extract -> translate -> render with the filesystem stages
pub fn real_pipeline(extract_latency: LatencyModel, output_dir: &Path) -> Arc<Pipeline> {
    Arc::new(
        Pipeline::builder()
            .filter(Arc::new(FileTextExtractor::new(0, extract_latency)))
            .filter(Arc::new(GlossaryTranslator::default()))
            .filter(Arc::new(DocumentRenderer::new(ArtifactLocator::new(output_dir))))
            .build()
            .unwrap(),
    )
}

pub async fn publish_file(broker: &Broker, queue: &str, source: &Path, priority: Priority) -> String {
    let job = Job::new_test(source, priority);
    broker
        .publish(queue, &JobMessage::from_job(&job), PublishOptions::persistent(priority))
        .await
        .unwrap();
    job.id
}

pub fn start(consumer: &Consumer) -> (ShutdownSender, JoinHandle<leveler_core::Result<()>>) {
    let (tx, token) = shutdown_channel();
    let consumer = consumer.clone();
    (tx, tokio::spawn(async move { consumer.run(token).await }))
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
