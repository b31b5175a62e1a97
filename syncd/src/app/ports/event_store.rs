// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::app::errors::AppResult;
use crate::app::types::{Project, TrackedAllocation, WalletOwner};

/// Persisted replay watermark for the orchestrator event stream.
#[async_trait]
pub trait ReplayCursorPort: Send + Sync {
    async fn replay_from(&self, provider_id: &str) -> AppResult<Option<OffsetDateTime>>;
    async fn set_replay_from(&self, provider_id: &str, at: OffsetDateTime) -> AppResult<()>;
}

/// Last-known project snapshots used for membership diffing.
#[async_trait]
pub trait ProjectSnapshotPort: Send + Sync {
    async fn load_project(&self, project_id: &str) -> AppResult<Option<Project>>;
    async fn save_project(&self, project: &Project, at: OffsetDateTime) -> AppResult<()>;
}

#[async_trait]
pub trait AllocationStorePort: Send + Sync {
    async fn upsert_allocation(&self, allocation: &TrackedAllocation) -> AppResult<()>;
    async fn find_allocation(
        &self,
        owner: &WalletOwner,
        category: &str,
    ) -> AppResult<Option<TrackedAllocation>>;
    async fn list_allocations(&self, category: &str) -> AppResult<Vec<TrackedAllocation>>;
}
