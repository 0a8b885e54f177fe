//! Bounded worker pool for batches.
//!
//! Each submitted batch runs on its own tokio task, gated by a semaphore so
//! at most `max_workers` batches are in flight. Events inside a batch stay
//! sequential; batches have no ordering relative to each other, so two
//! batches for the same source may interleave.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::pipeline::{BatchReport, Pipeline};

#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    max_workers: usize,
}

impl Dispatcher {
    /// `max_workers` of zero is treated as one.
    pub fn new(pipeline: Arc<Pipeline>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_workers)),
            tasks: TaskTracker::new(),
            max_workers,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Batches currently holding a worker slot.
    pub fn busy_workers(&self) -> usize {
        self.max_workers - self.permits.available_permits()
    }

    /// Submitted batches not yet finished, running or waiting for a slot.
    pub fn pending_batches(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tasks.is_closed()
    }

    /// Queue a batch and return immediately. The outcome is only logged.
    ///
    /// Must be called from within a tokio runtime. Fails once the dispatcher
    /// is closed.
    pub fn submit(&self, events: Vec<Value>) -> Result<JoinHandle<()>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::ShuttingDown);
        }
        let this = self.clone();
        let size = events.len();
        debug!(events = size, "Batch submitted");
        Ok(self.tasks.spawn(async move {
            match this.run(events).await {
                Ok(report) => info!(
                    events = size,
                    processed = report.processed,
                    failed = report.failed,
                    malformed = report.malformed,
                    unpersisted = report.unpersisted,
                    "Batch processed"
                ),
                Err(e) => error!(events = size, error = %e, "Batch abandoned"),
            }
        }))
    }

    /// Run a batch on a worker slot and wait for its report.
    pub async fn process(&self, events: Vec<Value>) -> Result<BatchReport, EngineError> {
        if self.is_closed() {
            return Err(EngineError::ShuttingDown);
        }
        self.run(events).await
    }

    async fn run(&self, events: Vec<Value>) -> Result<BatchReport, EngineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::ShuttingDown)?;
        self.pipeline.process_events(events).await
    }

    /// Stop accepting batches. Batches already submitted still run to
    /// completion, including those waiting for a slot.
    pub fn close(&self) {
        self.tasks.close();
    }

    /// Close and wait until every submitted batch has finished.
    pub async fn shutdown(&self) {
        self.close();
        let pending = self.pending_batches();
        if pending > 0 {
            info!(pending, "Waiting for submitted batches to finish");
        }
        self.tasks.wait().await;
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_workers", &self.max_workers)
            .field("busy_workers", &self.busy_workers())
            .field("pending_batches", &self.pending_batches())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parley_core::types::{Actor, Request, Session};
    use parley_storage::{HistoryRepository, SqliteStore};
    use serde_json::json;

    use crate::error::SkillError;
    use crate::skill::{Skill, SkillReply};

    /// Blocks every turn until the test releases a permit on `gate`.
    struct GatedSkill {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Skill for GatedSkill {
        fn topic(&self) -> &str {
            "gated"
        }

        async fn handle(
            &self,
            _request: &Request,
            _actor: Option<&mut Actor>,
            _session: &mut Session,
        ) -> Result<SkillReply, SkillError> {
            let permit = self.gate.acquire().await.unwrap();
            permit.forget();
            Ok(SkillReply::Nothing)
        }
    }

    fn dispatcher(max_workers: usize) -> Dispatcher {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = Pipeline::builder(store).build().unwrap();
        Dispatcher::new(Arc::new(pipeline), max_workers)
    }

    fn gated_dispatcher(max_workers: usize) -> (Dispatcher, Arc<Semaphore>, SqliteStore) {
        let gate = Arc::new(Semaphore::new(0));
        let store = SqliteStore::in_memory().unwrap();
        let pipeline = Pipeline::builder(Arc::new(store.clone()))
            .skill(Arc::new(GatedSkill { gate: gate.clone() }))
            .build()
            .unwrap();
        (Dispatcher::new(Arc::new(pipeline), max_workers), gate, store)
    }

    fn gated_event(source_id: &str) -> Value {
        json!({"source_id": source_id, "intent": "gated"})
    }

    async fn wait_for_busy(d: &Dispatcher, expected: usize) {
        for _ in 0..200 {
            if d.busy_workers() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} busy workers, saw {}", expected, d.busy_workers());
    }

    #[test]
    fn test_zero_workers_clamped() {
        let d = dispatcher(0);
        assert_eq!(d.max_workers(), 1);
        assert_eq!(d.busy_workers(), 0);
    }

    #[tokio::test]
    async fn test_process_returns_report() {
        let d = dispatcher(2);
        let report = d
            .process(vec![json!({"source_id": "u1"}), json!({"bad": true})])
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(d.busy_workers(), 0);
    }

    #[tokio::test]
    async fn test_submit_runs_in_background() {
        let d = dispatcher(1);
        let handle = d.submit(vec![json!({"source_id": "u1"})]).unwrap();
        handle.await.unwrap();
        assert_eq!(d.busy_workers(), 0);
        assert_eq!(d.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_rejects_new_batches() {
        let d = dispatcher(1);
        d.close();
        assert!(d.is_closed());
        let result = d.process(vec![json!({"source_id": "u1"})]).await;
        assert!(matches!(result, Err(EngineError::ShuttingDown)));
        assert!(matches!(
            d.submit(vec![json!({"source_id": "u1"})]),
            Err(EngineError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_pool_holds_at_most_max_workers() {
        let (d, gate, store) = gated_dispatcher(2);
        for source in ["u1", "u2", "u3"] {
            d.submit(vec![gated_event(source)]).unwrap();
        }

        wait_for_busy(&d, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(d.busy_workers(), 2);
        assert_eq!(d.pending_batches(), 3);

        gate.add_permits(3);
        d.shutdown().await;
        assert_eq!(d.busy_workers(), 0);
        assert_eq!(HistoryRepository::new(store.database()).count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_batches() {
        let (d, gate, store) = gated_dispatcher(1);
        d.submit(vec![gated_event("u1")]).unwrap();
        d.submit(vec![gated_event("u2"), gated_event("u3")]).unwrap();
        wait_for_busy(&d, 1).await;

        d.close();
        assert!(d.submit(vec![gated_event("u4")]).is_err());
        gate.add_permits(3);
        d.shutdown().await;

        assert_eq!(d.pending_batches(), 0);
        assert_eq!(HistoryRepository::new(store.database()).count().unwrap(), 3);
    }
}
