// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{Job, JobUpdateEntry};

/// Control API of the remote orchestrator.
#[async_trait]
pub trait OrchestratorPort: Send + Sync {
    /// Fetch a job with parameters, application and product resolved.
    /// `Ok(None)` when the orchestrator does not know the id.
    async fn retrieve_job(&self, id: &str) -> AppResult<Option<Job>>;
    /// Submit a list of job updates in one bulk call.
    async fn add_job_updates(&self, updates: &[JobUpdateEntry]) -> AppResult<()>;
    /// A currently valid bearer token, refreshed if needed.
    async fn access_token(&self) -> AppResult<String>;
}
