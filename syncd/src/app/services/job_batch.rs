// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use time::Duration;

use crate::app::ports::TelemetryEvent;
use crate::app::services::job_store::JobStore;
use crate::app::types::{JobState, JobUpdate, JobUpdateEntry, Timestamp};

/// Pending entries that trigger an automatic flush.
pub const AUTO_FLUSH_THRESHOLD: usize = 100;

/// Queued jobs younger than this are never treated as orphans.
pub const QUEUE_GRACE_PERIOD: Duration = Duration::minutes(5);

/// Job ids classified by how a batch moved them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdateBatchResults {
    pub terminated_due_to_unknown_state: Vec<String>,
    pub normal_start: Vec<String>,
    pub normal_termination: Vec<String>,
    pub normal_suspension: Vec<String>,
}

impl JobUpdateBatchResults {
    fn classify(&mut self, entry: &JobUpdateEntry) {
        let bucket = match entry.update.state {
            Some(JobState::Running) => &mut self.normal_start,
            Some(JobState::Success | JobState::Failure | JobState::Expired) => {
                &mut self.normal_termination
            }
            Some(JobState::Suspended) => &mut self.normal_suspension,
            Some(JobState::InQueue) | None => return,
        };
        bucket.push(entry.id.clone());
    }
}

/// One reconciliation pass worth of job updates.
///
/// Updates are sent upstream in bulk before being applied locally. Once a
/// bulk submission fails the batch is poisoned: later calls do nothing and
/// [`JobUpdateBatch::end`] reports no results.
pub struct JobUpdateBatch {
    store: Arc<JobStore>,
    entries: Vec<JobUpdateEntry>,
    observed: HashSet<String>,
    node_allocations: HashMap<String, Vec<String>>,
    failed: bool,
    results: JobUpdateBatchResults,
}

impl JobUpdateBatch {
    pub fn begin(store: Arc<JobStore>) -> Self {
        Self {
            store,
            entries: Vec::new(),
            observed: HashSet::new(),
            node_allocations: HashMap::new(),
            failed: false,
            results: JobUpdateBatchResults::default(),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Records that the batch system reports `state` for `job_id`. Queues a
    /// state change only when the job is tracked, not yet terminal, and its
    /// state differs. Returns whether an update was queued.
    pub async fn track_state(
        &mut self,
        job_id: &str,
        state: JobState,
        status: Option<String>,
    ) -> bool {
        self.observed.insert(job_id.to_string());

        match self.store.current_state(job_id).await {
            Some(current) if current.is_terminal() => {
                if current != state {
                    tracing::debug!(
                        "job {job_id} is already {current:?}; ignoring reported {state:?}"
                    );
                }
                false
            }
            Some(current) if current != state => {
                let message =
                    status.unwrap_or_else(|| state.default_status_message().to_string());
                self.add_update(JobUpdateEntry::new(
                    job_id,
                    JobUpdate::state_change(state, message),
                ))
                .await;
                true
            }
            _ => false,
        }
    }

    /// Adds `nodes` to the set allocated to `job_id`, keeping first-seen order.
    pub fn track_assigned_nodes(&mut self, job_id: &str, nodes: &[String]) {
        let assigned = self.node_allocations.entry(job_id.to_string()).or_default();
        for node in nodes {
            if !assigned.contains(node) {
                assigned.push(node.clone());
            }
        }
    }

    pub async fn add_update(&mut self, entry: JobUpdateEntry) {
        if self.failed {
            return;
        }
        self.results.classify(&entry);
        self.entries.push(entry);
        if self.entries.len() >= AUTO_FLUSH_THRESHOLD {
            self.flush().await;
        }
    }

    /// Submits pending entries upstream and applies the accepted ones
    /// locally. Returns `false` once the batch has failed.
    pub async fn flush(&mut self) -> bool {
        if self.failed {
            return false;
        }
        if self.entries.is_empty() {
            return true;
        }

        if let Err(err) = self.store.orchestrator().add_job_updates(&self.entries).await {
            self.failed = true;
            tracing::warn!("failed to flush {} job updates: {err}", self.entries.len());
            self.store.telemetry().event(
                "batch_flush_failed",
                TelemetryEvent {
                    count: Some(self.entries.len()),
                    detail: Some(err.to_string()),
                    ..TelemetryEvent::default()
                },
            );
            return false;
        }

        let entries = std::mem::take(&mut self.entries);
        let applied = self.store.apply_entries(&entries).await;
        self.store.finish_applied(&applied).await;

        let allocations: Vec<(String, Vec<String>)> = applied
            .iter()
            .filter_map(|a| {
                self.node_allocations
                    .get(&a.job.id)
                    .map(|nodes| (a.job.id.clone(), nodes.clone()))
            })
            .collect();
        if let Err(err) = self.store.record_node_allocations(&allocations).await {
            tracing::warn!("could not record node allocations: {err}");
        }
        true
    }

    /// Flushes what is pending, terminates active jobs the batch system no
    /// longer reports, and returns the classification of this pass.
    pub async fn end(mut self) -> JobUpdateBatchResults {
        if !self.flush().await {
            return JobUpdateBatchResults::default();
        }

        let now_utc = self.store.clock().now_utc();
        let now = Timestamp::from_datetime(now_utc);
        let mut orphans = Vec::new();
        for job in self.store.list_active().await {
            if self.observed.contains(&job.id) {
                continue;
            }
            if job.status.state == JobState::InQueue
                && now_utc - job.created_at.to_datetime() < QUEUE_GRACE_PERIOD
            {
                continue;
            }
            orphans.push(job);
        }

        for job in &orphans {
            let termination = match job.status.expires_at {
                Some(expires_at) if now > expires_at => JobState::Expired,
                _ => JobState::Success,
            };
            if job.status.state != termination {
                self.add_update(JobUpdateEntry::new(
                    job.id.clone(),
                    JobUpdate::state_change(termination, termination.default_status_message()),
                ))
                .await;
            }
            self.results
                .terminated_due_to_unknown_state
                .push(job.id.clone());
        }

        self.flush().await;

        if !orphans.is_empty() {
            tracing::info!(
                "terminated {} jobs missing from the batch system",
                orphans.len()
            );
            self.store.telemetry().event(
                "jobs_orphaned",
                TelemetryEvent {
                    count: Some(orphans.len()),
                    ..TelemetryEvent::default()
                },
            );
        }
        self.results
    }
}
