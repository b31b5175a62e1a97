// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::ObservedJob;

/// The batch system's current view of provider jobs, polled once per pass.
#[async_trait]
pub trait JobObserverPort: Send + Sync {
    async fn observe(&self) -> AppResult<Vec<ObservedJob>>;
}
