// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use crate::app::errors::AppResult;
use crate::app::ports::{
    ClockPort, Hook, IdentityPort, MembershipObserver, NoopTelemetry, ProjectHandler,
    ReplayCursorPort, TelemetryEvent, TelemetryPort, UserWorkerControl, WalletHandler,
};
use crate::app::services::allocations::AllocationLocks;
use crate::app::services::projects::ProjectSnapshots;
use crate::app::types::{
    EventProjectUpdated, EventWalletUpdated, Notification, ProjectComparison, WalletOwner,
};

/// How orchestrator users map onto local accounts.
#[derive(Clone)]
pub enum UserScoping {
    /// One shared service account; every notification is relevant.
    Shared,
    /// Per-user instances; user-owned wallets only matter when the user has a
    /// local account.
    PerUser(Arc<dyn IdentityPort>),
}

/// Integration hooks invoked for decoded notifications.
#[derive(Clone, Default)]
pub struct NotificationHandlers {
    pub wallet: Hook<dyn WalletHandler>,
    pub project: Hook<dyn ProjectHandler>,
    pub workers: Hook<dyn UserWorkerControl>,
    pub membership_observers: Vec<Arc<dyn MembershipObserver>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handled and the replay watermark advanced.
    Handled,
    /// Recorded but not confirmed by the handler; the watermark stays put.
    Skipped,
    /// Not relevant to this provider.
    Ignored,
}

/// Applies decoded notifications to local state and integration hooks, and
/// advances the replay watermark for the ones fully handled.
pub struct NotificationDispatcher {
    provider_id: String,
    scoping: UserScoping,
    cursor: Arc<dyn ReplayCursorPort>,
    allocations: Arc<AllocationLocks>,
    projects: Arc<ProjectSnapshots>,
    handlers: NotificationHandlers,
    clock: Arc<dyn ClockPort>,
    telemetry: Arc<dyn TelemetryPort>,
}

impl NotificationDispatcher {
    pub fn new(
        provider_id: impl Into<String>,
        cursor: Arc<dyn ReplayCursorPort>,
        allocations: Arc<AllocationLocks>,
        projects: Arc<ProjectSnapshots>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            scoping: UserScoping::Shared,
            cursor,
            allocations,
            projects,
            handlers: NotificationHandlers::default(),
            clock,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_scoping(mut self, scoping: UserScoping) -> Self {
        self.scoping = scoping;
        self
    }

    pub fn with_handlers(mut self, handlers: NotificationHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryPort>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn allocations(&self) -> &Arc<AllocationLocks> {
        &self.allocations
    }

    pub fn projects(&self) -> &Arc<ProjectSnapshots> {
        &self.projects
    }

    /// An error means local state could not be recorded; the notification
    /// was not acknowledged and will be replayed.
    pub async fn dispatch(&self, notification: Notification) -> AppResult<DispatchOutcome> {
        match notification {
            Notification::WalletUpdated(update) => self.handle_wallet(update).await,
            Notification::ProjectUpdated(update) => self.handle_project(update).await,
        }
    }

    async fn advance_watermark(&self) -> AppResult<()> {
        self.cursor
            .set_replay_from(&self.provider_id, self.clock.now_utc())
            .await
    }

    async fn handle_wallet(&self, update: EventWalletUpdated) -> AppResult<DispatchOutcome> {
        if let Some(project) = &update.project {
            if !project.specification.can_consume_resources {
                tracing::debug!("ignoring wallet of allocator project {}", project.id);
                return Ok(DispatchOutcome::Ignored);
            }
        }

        self.allocations.track(&update).await?;
        tracing::info!(
            "wallet updated: owner={:?} category={} quota={} locked={}",
            update.owner,
            update.category.name,
            update.combined_quota,
            update.locked
        );
        self.telemetry.event(
            "wallet_updated",
            TelemetryEvent {
                owner: Some(update.owner.username().to_string()).filter(|s| !s.is_empty()),
                project: Some(update.owner.project_id().to_string()).filter(|s| !s.is_empty()),
                category: Some(update.category.name.clone()),
                ..TelemetryEvent::default()
            },
        );

        let handled = match (&self.scoping, &update.owner) {
            (UserScoping::PerUser(identity), WalletOwner::User { username }) => {
                if identity.local_uid(username).await?.is_some() {
                    self.handlers.wallet.handle_wallet(&update).await
                } else {
                    tracing::info!("no local account for {username}; wallet update skipped");
                    false
                }
            }
            _ => self.handlers.wallet.handle_wallet(&update).await,
        };

        if handled {
            self.advance_watermark().await?;
            Ok(DispatchOutcome::Handled)
        } else {
            Ok(DispatchOutcome::Skipped)
        }
    }

    async fn handle_project(&self, mut update: EventProjectUpdated) -> AppResult<DispatchOutcome> {
        // An unreadable snapshot must not look like an empty project.
        let before = self
            .projects
            .load(&update.project.id)
            .await?
            .unwrap_or_default();
        update.comparison = ProjectComparison::between(&before, &update.project);

        let recorded = self.record_project(&update).await;

        for observer in &self.handlers.membership_observers {
            observer.project_updated(&update).await;
        }
        recorded?;

        self.telemetry.event(
            "project_updated",
            TelemetryEvent {
                project: Some(update.project.id.clone()),
                count: Some(update.project.status.members.len()),
                ..TelemetryEvent::default()
            },
        );
        self.advance_watermark().await?;
        Ok(DispatchOutcome::Handled)
    }

    async fn record_project(&self, update: &EventProjectUpdated) -> AppResult<()> {
        if !self.handlers.project.handle_project(update).await {
            tracing::info!(
                "project {} not handled; keeping previous snapshot",
                update.project.id
            );
            return Ok(());
        }

        let mut snapshot = update.project.clone();
        if let UserScoping::PerUser(identity) = &self.scoping {
            let names: Vec<String> = snapshot.member_usernames().map(str::to_string).collect();
            let mapped = identity.local_uids(&names).await?;
            snapshot
                .status
                .members
                .retain(|member| mapped.contains_key(&member.username));
        }
        self.projects.save(&snapshot).await?;

        if let UserScoping::PerUser(identity) = &self.scoping {
            let changed = update
                .comparison
                .members_added_to_project
                .iter()
                .chain(&update.comparison.members_removed_from_project);
            for username in changed {
                if let Some(uid) = identity.local_uid(username).await? {
                    self.handlers.workers.request_termination(uid).await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::app::ports::ProjectSnapshotPort;
    use crate::app::test_support::{
        FixedClock, MemoryEventStore, RecordingObserver, RecordingProjectHandler,
        RecordingWalletHandler, RecordingWorkers, StaticIdentity,
    };
    use crate::app::types::{
        ProductCategory, Project, ProjectMember, ProjectSpecification, ProjectStatus, Timestamp,
    };
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        store: Arc<MemoryEventStore>,
        clock: Arc<FixedClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryEventStore::default()),
                clock: Arc::new(FixedClock::at_millis(NOW)),
            }
        }

        fn dispatcher(&self) -> NotificationDispatcher {
            let allocations = Arc::new(AllocationLocks::new(self.store.clone(), self.clock.clone()));
            let projects = Arc::new(ProjectSnapshots::new(self.store.clone(), self.clock.clone()));
            NotificationDispatcher::new(
                "hippo",
                self.store.clone(),
                allocations,
                projects,
                self.clock.clone(),
            )
        }

        fn watermark(&self) -> Option<i64> {
            self.store
                .cursor("hippo")
                .map(|at| Timestamp::from_datetime(at).as_millis())
        }
    }

    fn project(id: &str, members: &[&str]) -> Project {
        Project {
            id: id.into(),
            specification: ProjectSpecification::default(),
            status: ProjectStatus {
                members: members
                    .iter()
                    .map(|name| ProjectMember {
                        username: (*name).into(),
                        role: None,
                    })
                    .collect(),
            },
            ..Project::default()
        }
    }

    fn wallet(owner: WalletOwner, last_update: i64) -> EventWalletUpdated {
        EventWalletUpdated {
            owner,
            category: ProductCategory {
                name: "cpu".into(),
                provider: "hippo".into(),
                product_type: None,
            },
            combined_quota: 500,
            locked: true,
            last_update: Timestamp::from_millis(last_update),
            project: None,
            local_retired_usage: 0,
        }
    }

    fn user(name: &str) -> WalletOwner {
        WalletOwner::User {
            username: name.into(),
        }
    }

    fn project_update(project: Project) -> Notification {
        Notification::ProjectUpdated(EventProjectUpdated {
            last_update: Timestamp::from_millis(NOW - 5_000),
            project,
            comparison: ProjectComparison::default(),
        })
    }

    #[tokio::test]
    async fn wallet_update_records_lock_and_advances_to_processing_time() {
        let f = Fixture::new();
        let dispatcher = f.dispatcher();

        let outcome = dispatcher
            .dispatch(Notification::WalletUpdated(wallet(user("alice"), 1_000)))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(dispatcher.allocations().is_locked(&user("alice"), "cpu").await.unwrap());
        assert_eq!(f.watermark(), Some(NOW));
    }

    #[tokio::test]
    async fn refused_wallet_does_not_advance_watermark() {
        let f = Fixture::new();
        let handler = Arc::new(RecordingWalletHandler::returning(false));
        let dispatcher = f.dispatcher().with_handlers(NotificationHandlers {
            wallet: Hook::configured(handler.clone()),
            ..NotificationHandlers::default()
        });

        let outcome = dispatcher
            .dispatch(Notification::WalletUpdated(wallet(user("alice"), 1_000)))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(handler.calls(), 1);
        assert_eq!(f.watermark(), None);
        assert!(dispatcher.allocations().is_locked(&user("alice"), "cpu").await.unwrap());
    }

    #[tokio::test]
    async fn allocator_only_project_wallet_is_ignored() {
        let f = Fixture::new();
        let handler = Arc::new(RecordingWalletHandler::returning(true));
        let dispatcher = f.dispatcher().with_handlers(NotificationHandlers {
            wallet: Hook::configured(handler.clone()),
            ..NotificationHandlers::default()
        });
        let mut update = wallet(
            WalletOwner::Project {
                project_id: "p1".into(),
            },
            1_000,
        );
        let mut allocator = project("p1", &[]);
        allocator.specification.can_consume_resources = false;
        update.project = Some(allocator);

        let outcome = dispatcher
            .dispatch(Notification::WalletUpdated(update))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert_eq!(handler.calls(), 0);
        assert_eq!(f.watermark(), None);
    }

    #[tokio::test]
    async fn per_user_scoping_skips_unmapped_users() {
        let f = Fixture::new();
        let handler = Arc::new(RecordingWalletHandler::returning(true));
        let identity = Arc::new(StaticIdentity::new(&[("alice", 1001)]));
        let dispatcher = f
            .dispatcher()
            .with_scoping(UserScoping::PerUser(identity))
            .with_handlers(NotificationHandlers {
                wallet: Hook::configured(handler.clone()),
                ..NotificationHandlers::default()
            });

        let outcome = dispatcher
            .dispatch(Notification::WalletUpdated(wallet(user("mallory"), 1_000)))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(handler.calls(), 0);
        assert_eq!(f.watermark(), None);

        let outcome = dispatcher
            .dispatch(Notification::WalletUpdated(wallet(user("alice"), 1_000)))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn project_update_diffs_against_previous_snapshot() {
        let f = Fixture::new();
        let handler = Arc::new(RecordingProjectHandler::returning(true));
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = f.dispatcher().with_handlers(NotificationHandlers {
            project: Hook::configured(handler.clone()),
            membership_observers: vec![observer.clone()],
            ..NotificationHandlers::default()
        });

        dispatcher
            .dispatch(project_update(project("p1", &["alice", "bob"])))
            .await
            .unwrap();
        dispatcher
            .dispatch(project_update(project("p1", &["bob", "carol"])))
            .await
            .unwrap();

        let seen = observer.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].comparison.members_added_to_project, vec!["alice", "bob"]);
        assert_eq!(seen[1].comparison.members_added_to_project, vec!["carol"]);
        assert_eq!(seen[1].comparison.members_removed_from_project, vec!["alice"]);
        assert_eq!(
            f.store.load_project("p1").await.unwrap(),
            Some(project("p1", &["bob", "carol"]))
        );
        assert_eq!(f.watermark(), Some(NOW));
    }

    #[tokio::test]
    async fn refused_project_keeps_snapshot_but_notifies_observers() {
        let f = Fixture::new();
        f.store
            .save_project(&project("p1", &["alice"]), f.clock.now_utc())
            .await
            .unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = f.dispatcher().with_handlers(NotificationHandlers {
            project: Hook::configured(Arc::new(RecordingProjectHandler::returning(false))),
            membership_observers: vec![observer.clone()],
            ..NotificationHandlers::default()
        });

        let outcome = dispatcher
            .dispatch(project_update(project("p1", &["alice", "bob"])))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(observer.seen.lock().unwrap().len(), 1);
        assert_eq!(
            f.store.load_project("p1").await.unwrap(),
            Some(project("p1", &["alice"]))
        );
        assert_eq!(f.store.cursor_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn per_user_project_keeps_mapped_members_and_restarts_workers() {
        let f = Fixture::new();
        f.store
            .save_project(&project("p1", &["alice", "bob"]), f.clock.now_utc())
            .await
            .unwrap();
        let identity = Arc::new(StaticIdentity::new(&[("alice", 1001), ("carol", 1003)]));
        let workers = Arc::new(RecordingWorkers::default());
        let dispatcher = f
            .dispatcher()
            .with_scoping(UserScoping::PerUser(identity))
            .with_handlers(NotificationHandlers {
                workers: Hook::configured(workers.clone()),
                ..NotificationHandlers::default()
            });

        dispatcher
            .dispatch(project_update(project("p1", &["bob", "carol", "dave"])))
            .await
            .unwrap();

        assert_eq!(
            f.store.load_project("p1").await.unwrap(),
            Some(project("p1", &["carol"]))
        );
        assert_eq!(workers.terminated(), vec![1001, 1003]);
    }

    #[tokio::test]
    async fn unreadable_snapshot_fails_dispatch_without_terminating_workers() {
        let f = Fixture::new();
        f.store
            .save_project(&project("p1", &["alice", "carol"]), f.clock.now_utc())
            .await
            .unwrap();
        f.store.fail_project_loads.store(true, Ordering::SeqCst);
        let identity = Arc::new(StaticIdentity::new(&[("alice", 1001), ("carol", 1003)]));
        let workers = Arc::new(RecordingWorkers::default());
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = f
            .dispatcher()
            .with_scoping(UserScoping::PerUser(identity))
            .with_handlers(NotificationHandlers {
                workers: Hook::configured(workers.clone()),
                membership_observers: vec![observer.clone()],
                ..NotificationHandlers::default()
            });

        let result = dispatcher
            .dispatch(project_update(project("p1", &["alice", "carol"])))
            .await;

        assert!(result.is_err());
        assert!(workers.terminated().is_empty());
        assert!(observer.seen.lock().unwrap().is_empty());
        assert_eq!(f.watermark(), None);
        assert_eq!(
            f.store.projects.lock().unwrap().get("p1"),
            Some(&project("p1", &["alice", "carol"]))
        );
    }
}
