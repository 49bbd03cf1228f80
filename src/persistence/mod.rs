//! Persistence layer for deployment run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{RunContext, RunStatus, StepOutcome, StepResult, TargetIdentity};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Audit record of one deployment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Plan name
    pub plan_name: String,

    pub target: TargetIdentity,

    pub status: RunStatus,

    /// Discovered public address, if any
    pub endpoint: Option<String>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    /// The run's step log, in order
    pub steps: Vec<StepResult>,
}

impl RunSummary {
    /// Number of steps with the given outcome
    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.steps.iter().filter(|r| r.outcome == outcome).count()
    }
}

impl From<&RunContext> for RunSummary {
    fn from(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id,
            plan_name: ctx.plan_name.clone(),
            target: ctx.target.clone(),
            status: ctx.status,
            endpoint: ctx.endpoint().map(str::to_string),
            started_at: ctx.started_at.unwrap_or_else(Utc::now),
            completed_at: ctx.finished_at,
            steps: ctx.log().to_vec(),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run record
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a plan, most recent first
    async fn list_runs(&self, plan_name: &str) -> Result<Vec<RunSummary>>;

    /// List all plan names with recorded runs
    async fn list_plans(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, plan_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|r| r.plan_name == plan_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_plans(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.plan_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn finished_context(plan: &str) -> RunContext {
        let mut ctx = RunContext::new(plan, TargetIdentity::new("prod", "eu-west-1", "three-tier"));
        ctx.start();
        ctx.record(StepResult::succeeded("namespace", 1, Utc::now(), Duration::from_millis(5)));
        ctx.record(
            StepResult::succeeded("endpoint", 1, Utc::now(), Duration::from_millis(5))
                .with_output("endpoint", "lb.example.com"),
        );
        ctx.finish(RunStatus::Completed);
        ctx
    }

    #[test]
    fn test_summary_from_context() {
        let ctx = finished_context("three-tier");
        let summary = RunSummary::from(&ctx);

        assert_eq!(summary.run_id, ctx.run_id);
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.endpoint.as_deref(), Some("lb.example.com"));
        assert_eq!(summary.count(StepOutcome::Succeeded), 2);
        assert!(summary.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_in_memory_persistence() {
        let store = InMemoryPersistence::new();
        let first = RunSummary::from(&finished_context("three-tier"));
        let second = RunSummary::from(&finished_context("other"));

        store.save_run(&first).await.unwrap();
        store.save_run(&second).await.unwrap();

        let loaded = store.load_run(first.run_id).await.unwrap().unwrap();
        assert_eq!(loaded, first);
        assert_eq!(store.list_runs("three-tier").await.unwrap().len(), 1);
        assert_eq!(store.list_plans().await.unwrap(), vec!["other", "three-tier"]);
    }

    #[tokio::test]
    async fn test_save_replaces_existing_run() {
        let store = InMemoryPersistence::new();
        let mut run = RunSummary::from(&finished_context("three-tier"));
        store.save_run(&run).await.unwrap();

        run.status = RunStatus::Aborted;
        store.save_run(&run).await.unwrap();

        let runs = store.list_runs("three-tier").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Aborted);
    }
}
