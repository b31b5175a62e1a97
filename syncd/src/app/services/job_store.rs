// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::app::errors::{codes, AppError, AppErrorKind, AppResult};
use crate::app::ports::{
    ClockPort, Hook, JobMirrorPort, NoopTelemetry, OrchestratorPort, RouteRefresher,
    TelemetryPort,
};
use crate::app::types::{Job, JobState, JobUpdate, JobUpdateEntry, SimpleDuration, Timestamp};

/// A free-text status message for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMessage {
    pub job_id: String,
    pub message: String,
}

impl JobMessage {
    pub fn new(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            message: message.into(),
        }
    }
}

/// A job mutated by a batch flush, and whether that flush moved it into a
/// terminal state.
#[derive(Debug, Clone)]
pub(crate) struct AppliedJob {
    pub job: Job,
    pub became_terminal: bool,
}

/// Authoritative in-memory view of every job this provider tracks, mirrored
/// to durable storage after each mutation.
///
/// The map lock is only held while installing or mutating entries; remote
/// fetches and database writes happen outside of it.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
    mirror: Arc<dyn JobMirrorPort>,
    orchestrator: Arc<dyn OrchestratorPort>,
    routes: Hook<dyn RouteRefresher>,
    clock: Arc<dyn ClockPort>,
    telemetry: Arc<dyn TelemetryPort>,
}

impl JobStore {
    pub fn new(
        mirror: Arc<dyn JobMirrorPort>,
        orchestrator: Arc<dyn OrchestratorPort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            mirror,
            orchestrator,
            routes: Hook::Default,
            clock,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_route_refresher(mut self, routes: Hook<dyn RouteRefresher>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryPort>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn orchestrator(&self) -> &Arc<dyn OrchestratorPort> {
        &self.orchestrator
    }

    pub fn clock(&self) -> &Arc<dyn ClockPort> {
        &self.clock
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetryPort> {
        &self.telemetry
    }

    fn now(&self) -> Timestamp {
        self.clock.now_timestamp()
    }

    /// Loads every persisted job in an active state into memory. Returns the
    /// number of jobs loaded.
    pub async fn seed(&self) -> AppResult<usize> {
        let mut loaded = Vec::new();
        for state in JobState::ACTIVE {
            loaded.extend(self.mirror.list_jobs_in_state(state).await?);
        }
        let count = loaded.len();
        let mut jobs = self.jobs.write().await;
        for job in loaded {
            jobs.insert(job.id.clone(), job);
        }
        drop(jobs);
        tracing::info!("loaded {count} active jobs from the local mirror");
        Ok(count)
    }

    /// Returns the tracked copy of a job, fetching it from the orchestrator
    /// and tracking it when it is not known locally.
    pub async fn retrieve(&self, job_id: &str) -> Option<Job> {
        if let Some(job) = self.jobs.read().await.get(job_id) {
            return Some(job.clone());
        }

        let job = match self.orchestrator.retrieve_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!("could not retrieve job {job_id} from orchestrator: {err}");
                return None;
            }
        };
        if let Err(err) = self.track_new(job.clone()).await {
            tracing::warn!("could not mirror fetched job {job_id}: {err}");
        }
        Some(job)
    }

    /// Installs `job` as the authoritative copy, replacing any previous one.
    pub async fn track_new(&self, mut job: Job) -> AppResult<()> {
        let now = self.now();
        for update in &mut job.updates {
            if update.timestamp.is_unset() {
                update.timestamp = now;
            }
        }
        job.truncate_updates();

        let terminal = job.is_terminal();
        self.jobs.write().await.insert(job.id.clone(), job.clone());

        let persisted = self.mirror.upsert_job(&job).await;
        if terminal {
            self.routes.refresh_routes(&job.id).await;
        }
        persisted
    }

    pub async fn current_state(&self, job_id: &str) -> Option<JobState> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|job| job.status.state)
    }

    /// Tracked jobs that are not in a terminal state.
    pub async fn list_active(&self) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| !job.is_terminal())
            .cloned()
            .collect()
    }

    pub async fn retrieve_all_active(&self) -> HashMap<String, Job> {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|(_, job)| !job.is_terminal())
            .map(|(id, job)| (id.clone(), job.clone()))
            .collect()
    }

    /// Number of active jobs per non-terminal state.
    pub async fn state_counts(&self) -> HashMap<JobState, usize> {
        let mut counts = HashMap::new();
        for job in self.jobs.read().await.values() {
            if !job.is_terminal() {
                *counts.entry(job.status.state).or_insert(0) += 1;
            }
        }
        counts
    }

    pub async fn track_messages(&self, messages: &[JobMessage]) -> AppResult<()> {
        let updates: Vec<JobUpdateEntry> = messages
            .iter()
            .map(|m| JobUpdateEntry::new(m.job_id.clone(), JobUpdate::status_text(m.message.clone())))
            .collect();
        self.track_raw_updates(&updates).await
    }

    /// Appends each update to its job's log locally, then forwards the whole
    /// list to the orchestrator. Unknown jobs are skipped locally but still
    /// forwarded.
    pub async fn track_raw_updates(&self, updates: &[JobUpdateEntry]) -> AppResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        for entry in updates {
            let Some(mut job) = self.retrieve(&entry.id).await else {
                tracing::debug!("raw update for unknown job {}", entry.id);
                continue;
            };
            job.updates.push(entry.update.clone());
            if let Some(millis) = entry.update.new_time_allocation {
                job.specification.time_allocation = Some(SimpleDuration::from_millis(millis));
            }
            if let Err(err) = self.track_new(job).await {
                tracing::warn!("could not mirror job {}: {err}", entry.id);
            }
        }

        self.orchestrator.add_job_updates(updates).await
    }

    /// Applies accepted batch entries to the tracked jobs under a single
    /// write lock. Entries for unknown jobs, entries whose preconditions fail
    /// and state changes for already terminal jobs are dropped.
    pub(crate) async fn apply_entries(&self, entries: &[JobUpdateEntry]) -> Vec<AppliedJob> {
        let now = self.now();
        let mut applied: Vec<AppliedJob> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        let mut jobs = self.jobs.write().await;
        for entry in entries {
            let Some(job) = jobs.get_mut(&entry.id) else {
                tracing::debug!("dropping update for untracked job {}", entry.id);
                continue;
            };
            let current = job.status.state;
            if !entry.update.expectations_met(current) {
                tracing::debug!(
                    "dropping update for job {}: expectations not met in state {current}",
                    entry.id
                );
                continue;
            }
            if current.is_terminal() && entry.update.state.is_some() {
                tracing::debug!(
                    "dropping state change for job {} which is already {current}",
                    entry.id
                );
                continue;
            }

            apply_update(job, &entry.update, now);

            let became_terminal = !current.is_terminal() && job.is_terminal();
            match positions.get(&entry.id) {
                Some(&index) => {
                    let previous = &mut applied[index];
                    previous.became_terminal |= became_terminal;
                    previous.job = job.clone();
                }
                None => {
                    positions.insert(entry.id.clone(), applied.len());
                    applied.push(AppliedJob {
                        job: job.clone(),
                        became_terminal,
                    });
                }
            }
        }
        drop(jobs);
        applied
    }

    /// Persists jobs mutated by a flush and refreshes routes for those that
    /// just terminated.
    pub(crate) async fn finish_applied(&self, applied: &[AppliedJob]) {
        for entry in applied {
            if let Err(err) = self.mirror.upsert_job(&entry.job).await {
                tracing::warn!("could not mirror job {}: {err}", entry.job.id);
            }
            if entry.became_terminal {
                self.routes.refresh_routes(&entry.job.id).await;
            }
        }
    }

    pub(crate) async fn record_node_allocations(
        &self,
        allocations: &[(String, Vec<String>)],
    ) -> AppResult<()> {
        if allocations.is_empty() {
            return Ok(());
        }
        self.mirror.update_allocated_nodes(allocations).await
    }

    pub async fn allocated_nodes(&self, job_id: &str) -> AppResult<Vec<String>> {
        if self.current_state(job_id).await.is_none() {
            return Err(AppError::with_message(
                AppErrorKind::NotFound,
                codes::NOT_FOUND,
                format!("job {job_id} is not tracked"),
            ));
        }
        self.mirror.allocated_nodes(job_id).await
    }
}

fn apply_update(job: &mut Job, update: &JobUpdate, now: Timestamp) {
    if let Some(state) = update.state {
        job.status.state = state;
        if state == JobState::Running {
            job.status.started_at = Some(now);
            if let Some(alloc) = job.specification.time_allocation {
                job.status.expires_at = Some(now.plus_millis(alloc.to_millis()));
            }
        }
    }

    if let Some(millis) = update.new_time_allocation {
        let duration = SimpleDuration::from_millis(millis);
        job.specification.time_allocation = Some(duration);
        if let Some(started_at) = job.status.started_at {
            job.status.expires_at = Some(started_at.plus_millis(duration.to_millis()));
        }
    }

    if let Some(allow_restart) = update.allow_restart {
        job.status.allow_restart = allow_restart;
    }

    if let Some(folder) = &update.output_folder {
        job.output.output_folder = Some(folder.clone());
    }

    let mut recorded = update.clone();
    recorded.timestamp = now;
    job.updates.push(recorded);
    job.truncate_updates();
}
