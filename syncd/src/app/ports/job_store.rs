// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{Job, JobState};

/// Durable mirror of tracked jobs, keyed by job id.
#[async_trait]
pub trait JobMirrorPort: Send + Sync {
    /// Insert or replace the persisted copy of `job`.
    async fn upsert_job(&self, job: &Job) -> AppResult<()>;
    async fn list_jobs_in_state(&self, state: JobState) -> AppResult<Vec<Job>>;
    /// Replace the allocated node list for each listed job id.
    async fn update_allocated_nodes(&self, allocations: &[(String, Vec<String>)]) -> AppResult<()>;
    async fn allocated_nodes(&self, job_id: &str) -> AppResult<Vec<String>>;
}
