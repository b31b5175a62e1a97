// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::adapters::db::{SyncStore, SyncStoreError};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    AllocationStorePort, IdentityPort, JobMirrorPort, ProjectSnapshotPort, ReplayCursorPort,
};
use crate::app::types::{Job, JobState, Project, TrackedAllocation, WalletOwner};

#[derive(Clone)]
pub struct SqliteStoreAdapter {
    store: Arc<SyncStore>,
}

impl SqliteStoreAdapter {
    pub fn new(store: SyncStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }
}

/// Translates persistence errors into app-level errors so the services stay
/// free of database details.
fn map_store_error(err: SyncStoreError) -> AppError {
    match err {
        SyncStoreError::EmptyJobId
        | SyncStoreError::EmptyProjectId
        | SyncStoreError::EmptyUsername => {
            AppError::new(AppErrorKind::InvalidArgument, codes::INVALID_ARGUMENT)
                .with_context(err.to_string())
        }
        SyncStoreError::Serde(_)
        | SyncStoreError::TimeFormat(_)
        | SyncStoreError::TimeParse(_) => {
            AppError::with_message(AppErrorKind::Internal, codes::LOCAL_ERROR, err.to_string())
        }
        SyncStoreError::Sqlx(_) => AppError::new(AppErrorKind::Internal, codes::INTERNAL_ERROR)
            .with_context(err.to_string()),
    }
}

#[async_trait]
impl ReplayCursorPort for SqliteStoreAdapter {
    async fn replay_from(&self, provider_id: &str) -> AppResult<Option<OffsetDateTime>> {
        self.store
            .replay_from(provider_id)
            .await
            .map_err(map_store_error)
    }

    async fn set_replay_from(&self, provider_id: &str, at: OffsetDateTime) -> AppResult<()> {
        self.store
            .set_replay_from(provider_id, at)
            .await
            .map_err(map_store_error)
    }
}

#[async_trait]
impl ProjectSnapshotPort for SqliteStoreAdapter {
    async fn load_project(&self, project_id: &str) -> AppResult<Option<Project>> {
        self.store
            .load_project(project_id)
            .await
            .map_err(map_store_error)
    }

    async fn save_project(&self, project: &Project, at: OffsetDateTime) -> AppResult<()> {
        self.store
            .save_project(project, at)
            .await
            .map_err(map_store_error)
    }
}

#[async_trait]
impl AllocationStorePort for SqliteStoreAdapter {
    async fn upsert_allocation(&self, allocation: &TrackedAllocation) -> AppResult<()> {
        self.store
            .upsert_allocation(allocation)
            .await
            .map_err(map_store_error)
    }

    async fn find_allocation(
        &self,
        owner: &WalletOwner,
        category: &str,
    ) -> AppResult<Option<TrackedAllocation>> {
        self.store
            .find_allocation(owner, category)
            .await
            .map_err(map_store_error)
    }

    async fn list_allocations(&self, category: &str) -> AppResult<Vec<TrackedAllocation>> {
        self.store
            .list_allocations(category)
            .await
            .map_err(map_store_error)
    }
}

#[async_trait]
impl JobMirrorPort for SqliteStoreAdapter {
    async fn upsert_job(&self, job: &Job) -> AppResult<()> {
        self.store.upsert_job(job).await.map_err(map_store_error)
    }

    async fn list_jobs_in_state(&self, state: JobState) -> AppResult<Vec<Job>> {
        self.store
            .list_jobs_in_state(state)
            .await
            .map_err(map_store_error)
    }

    async fn update_allocated_nodes(&self, allocations: &[(String, Vec<String>)]) -> AppResult<()> {
        self.store
            .update_allocated_nodes(allocations)
            .await
            .map_err(map_store_error)
    }

    async fn allocated_nodes(&self, job_id: &str) -> AppResult<Vec<String>> {
        self.store
            .allocated_nodes(job_id)
            .await
            .map_err(map_store_error)
    }
}

#[async_trait]
impl IdentityPort for SqliteStoreAdapter {
    async fn local_uid(&self, remote_username: &str) -> AppResult<Option<u32>> {
        self.store
            .local_uid(remote_username)
            .await
            .map_err(map_store_error)
    }

    async fn local_uids(&self, remote_usernames: &[String]) -> AppResult<HashMap<String, u32>> {
        self.store
            .local_uids(remote_usernames)
            .await
            .map_err(map_store_error)
    }

    async fn remote_username(&self, uid: u32) -> AppResult<Option<String>> {
        self.store
            .remote_username(uid)
            .await
            .map_err(map_store_error)
    }
}
