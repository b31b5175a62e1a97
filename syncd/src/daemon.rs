// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Process wiring: builds the adapters and services from a [`Config`] and
//! runs the background workers until cancelled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::adapters::db::{SqliteStoreAdapter, SyncStore};
use crate::adapters::orchestrator::HttpOrchestrator;
use crate::adapters::telemetry::TracingTelemetry;
use crate::adapters::time::SystemClock;
use crate::adapters::ws::WebSocketTransport;
use crate::app::ports::{
    ClockPort, EventTransportPort, Hook, JobObserverPort, OrchestratorPort, RouteRefresher,
    TelemetryPort,
};
use crate::app::services::allocations::AllocationLocks;
use crate::app::services::dispatcher::{NotificationDispatcher, NotificationHandlers, UserScoping};
use crate::app::services::event_stream::{EventStreamClient, ReplayUserHandle};
use crate::app::services::job_store::JobStore;
use crate::app::services::projects::ProjectSnapshots;
use crate::app::services::reconcile::Reconciler;
use crate::config::{self, Config};

/// Collaborators supplied by the embedding batch-system integration. The
/// defaults only log.
#[derive(Default)]
pub struct Integration {
    pub handlers: NotificationHandlers,
    pub routes: Hook<dyn RouteRefresher>,
    /// Without an observer no reconciliation loop is started.
    pub observer: Option<Arc<dyn JobObserverPort>>,
}

pub struct Daemon {
    jobs: Arc<JobStore>,
    dispatcher: Arc<NotificationDispatcher>,
    replay: ReplayUserHandle,
    tasks: JoinSet<()>,
}

impl Daemon {
    pub async fn start(
        config: &Config,
        integration: Integration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config::ensure_database_dir(&config.database_path)?;
        let db = SyncStore::open(&config.database_path)
            .await
            .with_context(|| format!("failed to open {}", config.database_path.display()))?;
        let store = Arc::new(SqliteStoreAdapter::new(db));

        let refresh_token = config.read_refresh_token()?;
        let orchestrator: Arc<dyn OrchestratorPort> = Arc::new(
            HttpOrchestrator::new(&config.orchestrator_url, refresh_token)
                .context("failed to build orchestrator client")?,
        );
        let transport: Arc<dyn EventTransportPort> = Arc::new(
            WebSocketTransport::from_orchestrator_url(&config.orchestrator_url)
                .context("failed to derive the notification stream url")?,
        );
        Self::start_with(
            config,
            integration,
            store,
            orchestrator,
            transport,
            Arc::new(SystemClock::new()),
            cancel,
        )
        .await
    }

    /// Same as [`Daemon::start`] with the remote side and clock injected.
    pub async fn start_with(
        config: &Config,
        integration: Integration,
        store: Arc<SqliteStoreAdapter>,
        orchestrator: Arc<dyn OrchestratorPort>,
        transport: Arc<dyn EventTransportPort>,
        clock: Arc<dyn ClockPort>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let telemetry: Arc<dyn TelemetryPort> = Arc::new(TracingTelemetry::new());

        let jobs = Arc::new(
            JobStore::new(store.clone(), orchestrator.clone(), clock.clone())
                .with_route_refresher(integration.routes)
                .with_telemetry(telemetry.clone()),
        );
        jobs.seed().await.context("failed to load tracked jobs")?;

        let scoping = if config.launch_user_instances {
            UserScoping::PerUser(store.clone())
        } else {
            UserScoping::Shared
        };
        let dispatcher = Arc::new(
            NotificationDispatcher::new(
                config.provider_id.clone(),
                store.clone(),
                Arc::new(AllocationLocks::new(store.clone(), clock.clone())),
                Arc::new(ProjectSnapshots::new(store.clone(), clock.clone())),
                clock,
            )
            .with_scoping(scoping)
            .with_handlers(integration.handlers)
            .with_telemetry(telemetry),
        );

        let mut tasks = JoinSet::new();
        let (client, replay) =
            EventStreamClient::new(transport, store, orchestrator, dispatcher.clone());
        tasks.spawn(client.run(cancel.clone()));

        if let Some(observer) = integration.observer {
            let interval = Duration::from_secs(config.reconcile_interval_secs);
            tasks.spawn(Reconciler::new(jobs.clone(), observer).run(interval, cancel));
        }

        Ok(Self {
            jobs,
            dispatcher,
            replay,
            tasks,
        })
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn replay_handle(&self) -> ReplayUserHandle {
        self.replay.clone()
    }

    /// Waits for every worker to stop.
    pub async fn wait(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!("worker task failed: {err}");
            }
        }
    }
}
