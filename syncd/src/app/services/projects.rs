// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use time::{Duration, OffsetDateTime};

use crate::app::errors::AppResult;
use crate::app::ports::{ClockPort, IdentityPort, ProjectSnapshotPort};
use crate::app::types::{Project, WalletOwner};

const CACHE_CAPACITY: usize = 1024;
const CACHE_TTL: Duration = Duration::minutes(10);

/// Last-known project snapshots, served from a small LRU in front of the
/// persisted `tracked_projects` table.
pub struct ProjectSnapshots {
    store: Arc<dyn ProjectSnapshotPort>,
    clock: Arc<dyn ClockPort>,
    cache: Mutex<LruCache<String, (Project, OffsetDateTime)>>,
}

impl ProjectSnapshots {
    pub fn new(store: Arc<dyn ProjectSnapshotPort>, clock: Arc<dyn ClockPort>) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            clock,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cached(&self, project_id: &str) -> Option<Project> {
        let now = self.clock.now_utc();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.get(project_id) {
            Some((project, stored_at)) if now - *stored_at < CACHE_TTL => Some(project.clone()),
            Some(_) => {
                cache.pop(project_id);
                None
            }
            None => None,
        }
    }

    fn remember(&self, project: &Project) {
        let now = self.clock.now_utc();
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(project.id.clone(), (project.clone(), now));
    }

    /// Last-known snapshot of a project. `Ok(None)` means it was never seen;
    /// store failures are returned as errors.
    pub async fn load(&self, project_id: &str) -> AppResult<Option<Project>> {
        if let Some(project) = self.cached(project_id) {
            return Ok(Some(project));
        }
        let project = self.store.load_project(project_id).await?;
        if let Some(project) = &project {
            self.remember(project);
        }
        Ok(project)
    }

    /// Like [`ProjectSnapshots::load`], with read failures logged and treated
    /// as unknown.
    pub async fn retrieve(&self, project_id: &str) -> Option<Project> {
        match self.load(project_id).await {
            Ok(project) => project,
            Err(err) => {
                tracing::warn!("could not load last known project {project_id}: {err}");
                None
            }
        }
    }

    pub async fn save(&self, project: &Project) -> AppResult<()> {
        self.remember(project);
        self.store.save_project(project, self.clock.now_utc()).await
    }

    /// Whether local `uid` is the owning user, or a member of the owning
    /// project according to its last-known snapshot.
    pub async fn belongs_to_workspace(
        &self,
        owner: &WalletOwner,
        uid: u32,
        identity: &dyn IdentityPort,
    ) -> bool {
        let remote = match identity.remote_username(uid).await {
            Ok(Some(name)) => name,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!("identity lookup failed for uid {uid}: {err}");
                return false;
            }
        };
        match owner {
            WalletOwner::User { username } => *username == remote,
            WalletOwner::Project { project_id } => match self.retrieve(project_id).await {
                Some(project) => project.member_usernames().any(|name| name == remote),
                None => false,
            },
        }
    }
}
