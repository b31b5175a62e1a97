// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::app::errors::AppResult;
use crate::app::ports::JobObserverPort;
use crate::app::services::job_batch::{JobUpdateBatch, JobUpdateBatchResults};
use crate::app::services::job_store::JobStore;

/// Periodically compares what the batch system reports against the tracked
/// jobs and pushes the differences upstream.
pub struct Reconciler {
    store: Arc<JobStore>,
    observer: Arc<dyn JobObserverPort>,
}

impl Reconciler {
    pub fn new(store: Arc<JobStore>, observer: Arc<dyn JobObserverPort>) -> Self {
        Self { store, observer }
    }

    /// One pass. Nothing is terminated when the batch system cannot be
    /// observed.
    pub async fn pass(&self) -> AppResult<JobUpdateBatchResults> {
        let observed = self.observer.observe().await?;

        let mut batch = JobUpdateBatch::begin(self.store.clone());
        for job in observed {
            batch.track_state(&job.job_id, job.state, job.status).await;
            if !job.nodes.is_empty() {
                batch.track_assigned_nodes(&job.job_id, &job.nodes);
            }
        }
        let results = batch.end().await;

        tracing::debug!(
            started = results.normal_start.len(),
            terminated = results.normal_termination.len(),
            suspended = results.normal_suspension.len(),
            orphaned = results.terminated_due_to_unknown_state.len(),
            "reconciliation pass finished"
        );
        Ok(results)
    }

    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.pass().await {
                        tracing::warn!("reconciliation pass skipped: {err}");
                    }
                }
            }
        }
        tracing::info!("reconciliation loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::app::errors::AppError;
    use crate::app::test_support::{job, FakeOrchestrator, FixedClock, MemoryMirror};
    use crate::app::types::{Job, JobState, ObservedJob};
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_700_000_000_000;

    struct ScriptedObserver {
        passes: Mutex<Vec<AppResult<Vec<ObservedJob>>>>,
    }

    #[async_trait]
    impl JobObserverPort for ScriptedObserver {
        async fn observe(&self) -> AppResult<Vec<ObservedJob>> {
            let mut passes = self.passes.lock().unwrap();
            if passes.is_empty() {
                Ok(Vec::new())
            } else {
                passes.remove(0)
            }
        }
    }

    async fn store_with(jobs: Vec<Job>) -> Arc<JobStore> {
        let store = Arc::new(JobStore::new(
            Arc::new(MemoryMirror::default()),
            Arc::new(FakeOrchestrator::default()),
            Arc::new(FixedClock::at_millis(NOW)),
        ));
        for j in jobs {
            store.track_new(j).await.unwrap();
        }
        store
    }

    fn observed(id: &str, state: JobState, nodes: &[&str]) -> ObservedJob {
        ObservedJob {
            job_id: id.into(),
            state,
            status: None,
            nodes: nodes.iter().map(|n| (*n).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn pass_applies_observed_states_and_orphans_the_rest() {
        let store = store_with(vec![
            job("a", JobState::InQueue, NOW - 600_000),
            job("b", JobState::Running, NOW - 600_000),
        ])
        .await;
        let observer = Arc::new(ScriptedObserver {
            passes: Mutex::new(vec![Ok(vec![observed("a", JobState::Running, &["n1"])])]),
        });

        let results = Reconciler::new(store.clone(), observer).pass().await.unwrap();

        assert_eq!(results.normal_start, vec!["a".to_string()]);
        assert_eq!(results.terminated_due_to_unknown_state, vec!["b".to_string()]);
        assert_eq!(store.current_state("a").await, Some(JobState::Running));
        assert_eq!(store.current_state("b").await, Some(JobState::Success));
        assert_eq!(store.allocated_nodes("a").await.unwrap(), vec!["n1".to_string()]);
    }

    #[tokio::test]
    async fn observer_failure_terminates_nothing() {
        let store = store_with(vec![job("b", JobState::Running, NOW - 600_000)]).await;
        let observer = Arc::new(ScriptedObserver {
            passes: Mutex::new(vec![Err(AppError::internal("squeue unavailable"))]),
        });

        assert!(Reconciler::new(store.clone(), observer).pass().await.is_err());
        assert_eq!(store.current_state("b").await, Some(JobState::Running));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let store = store_with(vec![]).await;
        let observer = Arc::new(ScriptedObserver {
            passes: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Reconciler::new(store, observer).run(Duration::from_millis(5), cancel.clone()),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
