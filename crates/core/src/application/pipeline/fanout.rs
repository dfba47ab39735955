// Fan-out: k parallel instances of one stage, assigned round-robin

use super::{Pipeline, PipelineResult};
use crate::domain::Job;
use crate::error::{AppError, Result};
use crate::port::{Artifact, Filter, Stage, StageError};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct Instance {
    filter: Arc<dyn Filter>,
    // One input at a time per instance
    busy: Mutex<()>,
    assigned: AtomicU64,
}

/// Pool of `k` instances of the same stage.
///
/// Input `i` goes to instance `i mod k`; there is no load balancing. Each
/// instance handles one input at a time, so `n` inputs take at least
/// `ceil(n / k)` instance latencies.
pub struct RoundRobinPool {
    stage: Stage,
    instances: Vec<Instance>,
    cursor: AtomicUsize,
}

impl RoundRobinPool {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Result<Self> {
        let stage = filters
            .first()
            .map(|f| f.stage())
            .ok_or_else(|| AppError::Config("fan-out pool needs at least one instance".to_string()))?;
        if filters.iter().any(|f| f.stage() != stage) {
            return Err(AppError::Config(
                "fan-out instances must implement the same stage".to_string(),
            ));
        }

        Ok(Self {
            stage,
            instances: filters
                .into_iter()
                .map(|filter| Instance {
                    filter,
                    busy: Mutex::new(()),
                    assigned: AtomicU64::new(0),
                })
                .collect(),
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Inputs assigned to each instance so far
    pub fn assigned_counts(&self) -> Vec<u64> {
        self.instances
            .iter()
            .map(|i| i.assigned.load(Ordering::SeqCst))
            .collect()
    }

    /// Process input number `index` on instance `index mod k`
    pub async fn process_indexed(
        &self,
        index: usize,
        input: Artifact,
    ) -> std::result::Result<Artifact, StageError> {
        let slot = index % self.instances.len();
        let instance = &self.instances[slot];
        instance.assigned.fetch_add(1, Ordering::SeqCst);

        let _busy = instance.busy.lock().await;
        debug!(job_id = %input.job_id, stage = %self.stage, instance = slot, "Fan-out dispatch");
        instance.filter.process(input).await
    }
}

#[async_trait]
impl Filter for RoundRobinPool {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn process(&self, input: Artifact) -> std::result::Result<Artifact, StageError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.process_indexed(index, input).await
    }
}

/// Batch fan-out: the first stage runs on the pool, the rest of the chain
/// runs per item as soon as that item's first stage finishes.
pub struct FanOut {
    pool: Arc<RoundRobinPool>,
    downstream: Pipeline,
}

impl FanOut {
    pub fn new(pool: Arc<RoundRobinPool>, downstream: Pipeline) -> Self {
        Self { pool, downstream }
    }

    pub fn pool(&self) -> &RoundRobinPool {
        &self.pool
    }

    /// Process a batch; results come back in input order
    pub async fn process_batch(
        &self,
        jobs: &[Job],
    ) -> Vec<std::result::Result<PipelineResult, StageError>> {
        let items = jobs.iter().enumerate().map(|(index, job)| async move {
            let first = self.pool.process_indexed(index, Artifact::source(job)).await?;
            self.downstream.run_artifact(first).await
        });
        join_all(items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::port::filter::mocks::MockFilter;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time::Instant;

    const EXTRACT_LATENCY: Duration = Duration::from_secs(5);

    fn pool(k: usize) -> Arc<RoundRobinPool> {
        let filters: Vec<Arc<dyn Filter>> = (0..k)
            .map(|_| Arc::new(MockFilter::delayed(Stage::Extract, EXTRACT_LATENCY)) as Arc<dyn Filter>)
            .collect();
        Arc::new(RoundRobinPool::new(filters).unwrap())
    }

    fn downstream() -> Pipeline {
        Pipeline::builder()
            .filter(Arc::new(MockFilter::passing(Stage::Translate)))
            .filter(Arc::new(MockFilter::passing(Stage::Render)))
            .build()
            .unwrap()
    }

    fn jobs(n: usize) -> Vec<Job> {
        (0..n)
            .map(|_| Job::new_test("/up/a.png", Priority::Low))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_thirty_inputs_over_ten_instances() {
        let fan_out = FanOut::new(pool(10), downstream());
        let batch = jobs(30);

        let started = Instant::now();
        let results = fan_out.process_batch(&batch).await;
        let elapsed = started.elapsed();

        assert_eq!(fan_out.pool().assigned_counts(), vec![3; 10]);
        assert!(elapsed >= EXTRACT_LATENCY * 3, "elapsed {:?}", elapsed);
        assert!(elapsed < EXTRACT_LATENCY * 4, "elapsed {:?}", elapsed);

        for (job, result) in batch.iter().zip(results) {
            assert_eq!(result.unwrap().job_id, job.id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_uneven_batch_differs_by_at_most_one() {
        let fan_out = FanOut::new(pool(4), downstream());
        let started = Instant::now();
        fan_out.process_batch(&jobs(10)).await;

        let counts = fan_out.pool().assigned_counts();
        assert_eq!(counts, vec![3, 3, 2, 2]);
        assert!(started.elapsed() >= EXTRACT_LATENCY * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_as_filter_rotates() {
        let pool = pool(3);
        for job in jobs(7) {
            pool.process(Artifact::source(&job)).await.unwrap();
        }
        assert_eq!(pool.assigned_counts(), vec![3, 2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_downstream_runs_per_item_without_waiting_for_batch() {
        let gate = Arc::new(Semaphore::new(0));
        let slow = Arc::new(MockFilter::gated(Stage::Extract, gate.clone()));
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(MockFilter::delayed(Stage::Extract, Duration::from_secs(1))),
            slow.clone(),
        ];
        let render = Arc::new(MockFilter::passing(Stage::Render));
        let downstream = Pipeline::builder()
            .filter(Arc::new(MockFilter::passing(Stage::Translate)))
            .filter(render.clone())
            .build()
            .unwrap();
        let fan_out = Arc::new(FanOut::new(
            Arc::new(RoundRobinPool::new(filters).unwrap()),
            downstream,
        ));

        let batch = jobs(2);
        let running = Arc::clone(&fan_out);
        let handle = tokio::spawn(async move { running.process_batch(&batch).await });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(slow.call_count(), 1);
        assert_eq!(render.call_count(), 1, "fast item should be rendered already");
        assert!(!handle.is_finished());

        gate.add_permits(1);
        let results = handle.await.unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(render.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_stays_with_its_item() {
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(MockFilter::passing(Stage::Extract)),
            Arc::new(MockFilter::failing(Stage::Extract, "bad scan")),
        ];
        let fan_out = FanOut::new(Arc::new(RoundRobinPool::new(filters).unwrap()), downstream());

        let results = fan_out.process_batch(&jobs(4)).await;
        let ok: Vec<bool> = results.iter().map(|r| r.is_ok()).collect();
        assert_eq!(ok, vec![true, false, true, false]);
    }

    #[test]
    fn test_mixed_stages_rejected() {
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(MockFilter::passing(Stage::Extract)),
            Arc::new(MockFilter::passing(Stage::Render)),
        ];
        assert!(RoundRobinPool::new(filters).is_err());
        assert!(RoundRobinPool::new(Vec::new()).is_err());
    }
}
