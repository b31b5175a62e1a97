// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod event_store;
pub mod event_transport;
pub mod hooks;
pub mod identity;
pub mod job_observer;
pub mod job_store;
pub mod orchestrator;
pub mod telemetry;

pub use clock::ClockPort;
pub use event_store::{AllocationStorePort, ProjectSnapshotPort, ReplayCursorPort};
pub use event_transport::{EventConnection, EventTransportPort};
pub use hooks::{
    Hook, MembershipObserver, ProjectHandler, RouteRefresher, UserWorkerControl, WalletHandler,
};
pub use identity::IdentityPort;
pub use job_observer::JobObserverPort;
pub use job_store::JobMirrorPort;
pub use orchestrator::OrchestratorPort;
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetryPort};
