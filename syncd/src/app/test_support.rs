// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory port implementations shared by the service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{
    AllocationStorePort, ClockPort, EventConnection, EventTransportPort, IdentityPort,
    JobMirrorPort, MembershipObserver, OrchestratorPort, ProjectHandler, ProjectSnapshotPort,
    ReplayCursorPort, RouteRefresher, UserWorkerControl, WalletHandler,
};
use crate::app::types::{
    EventProjectUpdated, EventWalletUpdated, Job, JobSpecification, JobState, JobStatus,
    JobUpdateEntry, ProductReference, Project, ResourceOwner, SimpleDuration, Timestamp,
    TrackedAllocation, WalletOwner,
};

pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn at_millis(millis: i64) -> Self {
        Self {
            now: Mutex::new(Timestamp::from_millis(millis).to_datetime()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

pub fn job(id: &str, state: JobState, created_at: i64) -> Job {
    Job {
        id: id.into(),
        created_at: Timestamp::from_millis(created_at),
        owner: ResourceOwner {
            created_by: "alice".into(),
            project: None,
        },
        specification: JobSpecification {
            product: ProductReference {
                id: "u1-standard-1".into(),
                category: "u1-standard".into(),
                provider: "hippo".into(),
            },
            replicas: 1,
            time_allocation: Some(SimpleDuration {
                hours: 1,
                minutes: 0,
                seconds: 0,
            }),
            ..JobSpecification::default()
        },
        status: JobStatus {
            state,
            ..JobStatus::default()
        },
        ..Job::default()
    }
}

#[derive(Default)]
pub struct MemoryMirror {
    pub jobs: Mutex<HashMap<String, Job>>,
    pub nodes: Mutex<HashMap<String, Vec<String>>>,
    pub upserts: AtomicUsize,
}

impl MemoryMirror {
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let mirror = Self::default();
        {
            let mut stored = mirror.jobs.lock().unwrap();
            for job in jobs {
                stored.insert(job.id.clone(), job);
            }
        }
        mirror
    }

    pub fn stored(&self, id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl JobMirrorPort for MemoryMirror {
    async fn upsert_job(&self, job: &Job) -> AppResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list_jobs_in_state(&self, state: JobState) -> AppResult<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.status.state == state)
            .cloned()
            .collect())
    }

    async fn update_allocated_nodes(&self, allocations: &[(String, Vec<String>)]) -> AppResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        for (id, list) in allocations {
            nodes.insert(id.clone(), list.clone());
        }
        Ok(())
    }

    async fn allocated_nodes(&self, job_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeOrchestrator {
    pub remote_jobs: Mutex<HashMap<String, Job>>,
    pub submitted: Mutex<Vec<Vec<JobUpdateEntry>>>,
    pub fail_updates: AtomicBool,
    pub retrievals: AtomicUsize,
}

impl FakeOrchestrator {
    pub fn with_remote(jobs: Vec<Job>) -> Self {
        let orchestrator = Self::default();
        {
            let mut remote = orchestrator.remote_jobs.lock().unwrap();
            for job in jobs {
                remote.insert(job.id.clone(), job);
            }
        }
        orchestrator
    }

    pub fn submitted_calls(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn submitted_entries(&self) -> Vec<JobUpdateEntry> {
        self.submitted.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl OrchestratorPort for FakeOrchestrator {
    async fn retrieve_job(&self, id: &str) -> AppResult<Option<Job>> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        Ok(self.remote_jobs.lock().unwrap().get(id).cloned())
    }

    async fn add_job_updates(&self, updates: &[JobUpdateEntry]) -> AppResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(AppError::remote("bulk update rejected"));
        }
        self.submitted.lock().unwrap().push(updates.to_vec());
        Ok(())
    }

    async fn access_token(&self) -> AppResult<String> {
        Ok("token-1".into())
    }
}

#[derive(Default)]
pub struct RecordingRoutes {
    pub refreshed: Mutex<Vec<String>>,
}

impl RecordingRoutes {
    pub fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RouteRefresher for RecordingRoutes {
    async fn refresh_routes(&self, job_id: &str) {
        self.refreshed.lock().unwrap().push(job_id.to_string());
    }
}

/// Replay cursor, project snapshots and allocations in one place.
#[derive(Default)]
pub struct MemoryEventStore {
    pub cursors: Mutex<HashMap<String, OffsetDateTime>>,
    pub projects: Mutex<HashMap<String, Project>>,
    pub allocations: Mutex<Vec<TrackedAllocation>>,
    pub cursor_writes: AtomicUsize,
    pub fail_project_loads: AtomicBool,
}

impl MemoryEventStore {
    pub fn cursor(&self, provider_id: &str) -> Option<OffsetDateTime> {
        self.cursors.lock().unwrap().get(provider_id).copied()
    }
}

#[async_trait]
impl ReplayCursorPort for MemoryEventStore {
    async fn replay_from(&self, provider_id: &str) -> AppResult<Option<OffsetDateTime>> {
        Ok(self.cursor(provider_id))
    }

    async fn set_replay_from(&self, provider_id: &str, at: OffsetDateTime) -> AppResult<()> {
        self.cursor_writes.fetch_add(1, Ordering::SeqCst);
        self.cursors
            .lock()
            .unwrap()
            .insert(provider_id.to_string(), at);
        Ok(())
    }
}

#[async_trait]
impl ProjectSnapshotPort for MemoryEventStore {
    async fn load_project(&self, project_id: &str) -> AppResult<Option<Project>> {
        if self.fail_project_loads.load(Ordering::SeqCst) {
            return Err(AppError::internal("database is locked"));
        }
        Ok(self.projects.lock().unwrap().get(project_id).cloned())
    }

    async fn save_project(&self, project: &Project, _at: OffsetDateTime) -> AppResult<()> {
        self.projects
            .lock()
            .unwrap()
            .insert(project.id.clone(), project.clone());
        Ok(())
    }
}

#[async_trait]
impl AllocationStorePort for MemoryEventStore {
    async fn upsert_allocation(&self, allocation: &TrackedAllocation) -> AppResult<()> {
        let mut allocations = self.allocations.lock().unwrap();
        allocations.retain(|a| !(a.owner == allocation.owner && a.category == allocation.category));
        allocations.push(allocation.clone());
        Ok(())
    }

    async fn find_allocation(
        &self,
        owner: &WalletOwner,
        category: &str,
    ) -> AppResult<Option<TrackedAllocation>> {
        Ok(self
            .allocations
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.owner == *owner && a.category == category)
            .cloned())
    }

    async fn list_allocations(&self, category: &str) -> AppResult<Vec<TrackedAllocation>> {
        Ok(self
            .allocations
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.category == category)
            .cloned()
            .collect())
    }
}

pub struct StaticIdentity {
    users: HashMap<String, u32>,
}

impl StaticIdentity {
    pub fn new(users: &[(&str, u32)]) -> Self {
        Self {
            users: users
                .iter()
                .map(|(name, uid)| ((*name).to_string(), *uid))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityPort for StaticIdentity {
    async fn local_uid(&self, remote_username: &str) -> AppResult<Option<u32>> {
        Ok(self.users.get(remote_username).copied())
    }

    async fn local_uids(&self, remote_usernames: &[String]) -> AppResult<HashMap<String, u32>> {
        Ok(remote_usernames
            .iter()
            .filter_map(|name| self.users.get(name).map(|uid| (name.clone(), *uid)))
            .collect())
    }

    async fn remote_username(&self, uid: u32) -> AppResult<Option<String>> {
        Ok(self
            .users
            .iter()
            .find(|(_, local)| **local == uid)
            .map(|(name, _)| name.clone()))
    }
}

pub struct RecordingWalletHandler {
    pub outcome: bool,
    pub seen: Mutex<Vec<EventWalletUpdated>>,
}

impl RecordingWalletHandler {
    pub fn returning(outcome: bool) -> Self {
        Self {
            outcome,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl WalletHandler for RecordingWalletHandler {
    async fn handle_wallet(&self, update: &EventWalletUpdated) -> bool {
        self.seen.lock().unwrap().push(update.clone());
        self.outcome
    }
}

pub struct RecordingProjectHandler {
    pub outcome: bool,
    pub seen: Mutex<Vec<EventProjectUpdated>>,
}

impl RecordingProjectHandler {
    pub fn returning(outcome: bool) -> Self {
        Self {
            outcome,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProjectHandler for RecordingProjectHandler {
    async fn handle_project(&self, update: &EventProjectUpdated) -> bool {
        self.seen.lock().unwrap().push(update.clone());
        self.outcome
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub seen: Mutex<Vec<EventProjectUpdated>>,
}

#[async_trait]
impl MembershipObserver for RecordingObserver {
    async fn project_updated(&self, update: &EventProjectUpdated) {
        self.seen.lock().unwrap().push(update.clone());
    }
}

#[derive(Default)]
pub struct RecordingWorkers {
    pub terminated: Mutex<Vec<u32>>,
}

impl RecordingWorkers {
    pub fn terminated(&self) -> Vec<u32> {
        let mut uids = self.terminated.lock().unwrap().clone();
        uids.sort_unstable();
        uids
    }
}

#[async_trait]
impl UserWorkerControl for RecordingWorkers {
    async fn request_termination(&self, uid: u32) {
        self.terminated.lock().unwrap().push(uid);
    }
}

/// Handles to one scripted connection: push frames into `incoming`, drop it
/// to close the connection, inspect what the client sent in `sent`.
pub struct ScriptedSession {
    pub incoming: mpsc::UnboundedSender<Vec<u8>>,
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

struct ScriptedConnection {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl EventConnection for ScriptedConnection {
    async fn send(&mut self, frame: Vec<u8>) -> AppResult<()> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> AppResult<Option<Vec<u8>>> {
        Ok(self.incoming.recv().await)
    }
}

/// Hands out pre-registered connections in order; fails once they run out.
#[derive(Default)]
pub struct ScriptedTransport {
    pending: Mutex<Vec<ScriptedConnection>>,
    pub connects: AtomicUsize,
}

impl ScriptedTransport {
    pub fn add_session(&self) -> ScriptedSession {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.pending.lock().unwrap().push(ScriptedConnection {
            incoming: rx,
            sent: sent.clone(),
        });
        ScriptedSession { incoming: tx, sent }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventTransportPort for ScriptedTransport {
    async fn connect(&self) -> AppResult<Box<dyn EventConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return Err(AppError::remote("connection refused"));
        }
        Ok(Box::new(pending.remove(0)))
    }
}
