// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;

use async_trait::async_trait;

use crate::app::errors::AppResult;

/// Mapping between orchestrator usernames and local uids.
#[async_trait]
pub trait IdentityPort: Send + Sync {
    async fn local_uid(&self, remote_username: &str) -> AppResult<Option<u32>>;
    async fn local_uids(&self, remote_usernames: &[String]) -> AppResult<HashMap<String, u32>>;
    async fn remote_username(&self, uid: u32) -> AppResult<Option<String>>;
}
