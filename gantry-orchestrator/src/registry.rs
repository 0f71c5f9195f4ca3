//! In-memory run registry
//!
//! Keeps the most recent runs, oldest evicted first. Each run record is
//! shared with the task executing it, which publishes every stage
//! transition under the record's lock.

use gantry_core::domain::run::PipelineRun;
use gantry_core::dto::run::RunSummary;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub type RunRecord = Arc<RwLock<PipelineRun>>;

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, RunRecord>,
    order: VecDeque<Uuid>,
}

pub struct RunRegistry {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl RunRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Registers a new run and returns its shared record
    pub async fn insert(&self, run: PipelineRun) -> RunRecord {
        let id = run.id;
        let record = Arc::new(RwLock::new(run));

        let mut inner = self.inner.write().await;
        inner.runs.insert(id, record.clone());
        inner.order.push_back(id);

        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                debug!("Evicting run {} from history", evicted);
                inner.runs.remove(&evicted);
            }
        }

        record
    }

    /// Snapshot of a run
    pub async fn get(&self, id: Uuid) -> Option<PipelineRun> {
        let record = self.inner.read().await.runs.get(&id).cloned()?;
        let run = record.read().await.clone();
        Some(run)
    }

    /// Summaries of every known run, newest first
    pub async fn list(&self) -> Vec<RunSummary> {
        let records: Vec<RunRecord> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .rev()
                .filter_map(|id| inner.runs.get(id).cloned())
                .collect()
        };

        let mut summaries = Vec::with_capacity(records.len());
        for record in records {
            summaries.push(RunSummary::from(&*record.read().await));
        }
        summaries
    }
}
