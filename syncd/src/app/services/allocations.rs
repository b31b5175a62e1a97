// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::app::errors::AppResult;
use crate::app::ports::{AllocationStorePort, ClockPort};
use crate::app::types::{EventWalletUpdated, TrackedAllocation, WalletOwner};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LockKey {
    owner: WalletOwner,
    category: String,
}

/// Lock flags per `(owner, category)`, cached in memory without expiry and
/// corrected only by the next wallet notification for the same key.
pub struct AllocationLocks {
    store: Arc<dyn AllocationStorePort>,
    clock: Arc<dyn ClockPort>,
    cache: Mutex<HashMap<LockKey, bool>>,
}

impl AllocationLocks {
    pub fn new(store: Arc<dyn AllocationStorePort>, clock: Arc<dyn ClockPort>) -> Self {
        Self {
            store,
            clock,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Records the wallet state carried by `update` in the cache and in the
    /// persisted allocation table.
    pub async fn track(&self, update: &EventWalletUpdated) -> AppResult<()> {
        let key = LockKey {
            owner: update.owner.clone(),
            category: update.category.name.clone(),
        };
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, update.locked);

        let allocation = TrackedAllocation {
            owner: update.owner.clone(),
            category: update.category.name.clone(),
            combined_quota: update.combined_quota,
            locked: update.locked,
            last_update: self.clock.now_timestamp(),
            local_retired_usage: update.local_retired_usage,
        };
        self.store.upsert_allocation(&allocation).await
    }

    pub async fn is_locked(&self, owner: &WalletOwner, category: &str) -> AppResult<bool> {
        let key = LockKey {
            owner: owner.clone(),
            category: category.to_string(),
        };
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();
        if let Some(locked) = cached {
            return Ok(locked);
        }

        let locked = self
            .store
            .find_allocation(owner, category)
            .await?
            .map(|allocation| allocation.locked)
            .unwrap_or(false);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, locked);
        Ok(locked)
    }

    pub async fn find_all(&self, category: &str) -> AppResult<Vec<TrackedAllocation>> {
        self.store.list_allocations(category).await
    }
}
