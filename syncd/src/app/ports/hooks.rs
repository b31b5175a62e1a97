// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::types::{EventProjectUpdated, EventWalletUpdated};

/// Integration-specific reaction to a wallet change. Returns whether the
/// notification counts as handled (and the replay watermark may advance).
#[async_trait]
pub trait WalletHandler: Send + Sync {
    async fn handle_wallet(&self, update: &EventWalletUpdated) -> bool;
}

/// Integration-specific reaction to a project change. Returning `false`
/// leaves the last-known snapshot untouched.
#[async_trait]
pub trait ProjectHandler: Send + Sync {
    async fn handle_project(&self, update: &EventProjectUpdated) -> bool;
}

/// Invoked for every project notification, whatever the handler decided.
#[async_trait]
pub trait MembershipObserver: Send + Sync {
    async fn project_updated(&self, update: &EventProjectUpdated);
}

/// Tears down routes and ingresses of a job that reached a terminal state.
#[async_trait]
pub trait RouteRefresher: Send + Sync {
    async fn refresh_routes(&self, job_id: &str);
}

/// Controls per-user worker processes.
#[async_trait]
pub trait UserWorkerControl: Send + Sync {
    async fn request_termination(&self, uid: u32);
}

/// A collaborator slot chosen once at construction: either a configured
/// implementation or the built-in default behaviour.
pub enum Hook<H: ?Sized> {
    Configured(Arc<H>),
    Default,
}

impl<H: ?Sized> Hook<H> {
    pub fn configured(handler: Arc<H>) -> Self {
        Hook::Configured(handler)
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Hook::Configured(_))
    }

    pub fn get(&self) -> Option<&Arc<H>> {
        match self {
            Hook::Configured(handler) => Some(handler),
            Hook::Default => None,
        }
    }
}

impl<H: ?Sized> Default for Hook<H> {
    fn default() -> Self {
        Hook::Default
    }
}

impl<H: ?Sized> Clone for Hook<H> {
    fn clone(&self) -> Self {
        match self {
            Hook::Configured(handler) => Hook::Configured(Arc::clone(handler)),
            Hook::Default => Hook::Default,
        }
    }
}

impl Hook<dyn WalletHandler> {
    pub async fn handle_wallet(&self, update: &EventWalletUpdated) -> bool {
        match self {
            Hook::Configured(handler) => handler.handle_wallet(update).await,
            Hook::Default => {
                tracing::info!("ignoring wallet notification");
                true
            }
        }
    }
}

impl Hook<dyn ProjectHandler> {
    pub async fn handle_project(&self, update: &EventProjectUpdated) -> bool {
        match self {
            Hook::Configured(handler) => handler.handle_project(update).await,
            Hook::Default => {
                tracing::info!("ignoring project update");
                true
            }
        }
    }
}

impl Hook<dyn RouteRefresher> {
    pub async fn refresh_routes(&self, job_id: &str) {
        match self {
            Hook::Configured(refresher) => refresher.refresh_routes(job_id).await,
            Hook::Default => tracing::debug!("no route refresher configured; job {job_id}"),
        }
    }
}

impl Hook<dyn UserWorkerControl> {
    pub async fn request_termination(&self, uid: u32) {
        match self {
            Hook::Configured(control) => control.request_termination(uid).await,
            Hook::Default => {
                tracing::info!("worker termination requested for uid {uid}; no worker control configured")
            }
        }
    }
}
