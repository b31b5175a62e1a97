// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::app::errors::AppError;
use crate::app::ports::{EventConnection, EventTransportPort, OrchestratorPort, ReplayCursorPort};
use crate::app::services::codec::{
    encode_frame, CodecError, FrameReader, Op, AUTH_FLAG_INCLUDE_RETIRED, WALLET_FLAG_LOCKED,
    WALLET_FLAG_PROJECT,
};
use crate::app::services::dispatcher::NotificationDispatcher;
use crate::app::types::{
    EventProjectUpdated, EventWalletUpdated, Notification, ProductCategory, Project,
    ProjectComparison, Timestamp, WalletOwner,
};

/// Pause between a failed or closed session and the next connection attempt.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(AppError),
    #[error("could not obtain access token: {0}")]
    Auth(AppError),
    #[error("could not read replay watermark: {0}")]
    Cursor(AppError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("malformed {what} payload: {source}")]
    MalformedPayload {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("wallet references unknown {kind} {reference}")]
    UnknownReference { kind: &'static str, reference: u32 },
    #[error("could not record notification: {0}")]
    Dispatch(AppError),
}

/// Per-connection reference tables. The server announces projects, product
/// categories and users once and refers to them by number afterwards.
#[derive(Debug, Default)]
pub struct SessionState {
    projects: HashMap<u32, Project>,
    categories: HashMap<u32, ProductCategory>,
    users: HashMap<u32, String>,
}

impl SessionState {
    /// Updates the reference tables with `op` and returns the notification it
    /// carries, if any.
    pub fn apply(&mut self, op: Op) -> Result<Option<Notification>, SessionError> {
        match op {
            Op::CategoryInfo {
                reference,
                category_json,
            } => {
                let category: ProductCategory = serde_json::from_str(&category_json)
                    .map_err(|source| SessionError::MalformedPayload {
                        what: "product category",
                        source,
                    })?;
                self.categories.insert(reference, category);
                Ok(None)
            }
            Op::UserInfo {
                reference,
                username,
            } => {
                self.users.insert(reference, username);
                Ok(None)
            }
            Op::Project {
                reference,
                last_updated_ms,
                project_json,
            } => {
                let project: Project = serde_json::from_str(&project_json).map_err(|source| {
                    SessionError::MalformedPayload {
                        what: "project",
                        source,
                    }
                })?;
                self.projects.insert(reference, project.clone());
                Ok(Some(Notification::ProjectUpdated(EventProjectUpdated {
                    last_update: millis(last_updated_ms),
                    project,
                    comparison: ProjectComparison::default(),
                })))
            }
            Op::Wallet {
                workspace_ref,
                category_ref,
                combined_quota,
                flags,
                last_update_ms,
                local_retired_usage,
            } => {
                let category = self
                    .categories
                    .get(&category_ref)
                    .filter(|c| !c.name.is_empty())
                    .cloned()
                    .ok_or(SessionError::UnknownReference {
                        kind: "product category",
                        reference: category_ref,
                    })?;

                let (owner, project) = if flags & WALLET_FLAG_PROJECT != 0 {
                    let project = self
                        .projects
                        .get(&workspace_ref)
                        .filter(|p| !p.id.is_empty())
                        .cloned()
                        .ok_or(SessionError::UnknownReference {
                            kind: "project",
                            reference: workspace_ref,
                        })?;
                    let owner = WalletOwner::Project {
                        project_id: project.id.clone(),
                    };
                    (owner, Some(project))
                } else {
                    let username = self
                        .users
                        .get(&workspace_ref)
                        .filter(|u| !u.is_empty())
                        .cloned()
                        .ok_or(SessionError::UnknownReference {
                            kind: "user",
                            reference: workspace_ref,
                        })?;
                    (WalletOwner::User { username }, None)
                };

                Ok(Some(Notification::WalletUpdated(EventWalletUpdated {
                    owner,
                    category,
                    combined_quota,
                    locked: flags & WALLET_FLAG_LOCKED != 0,
                    last_update: millis(last_update_ms),
                    project,
                    local_retired_usage,
                })))
            }
            Op::Auth { .. } | Op::ReplayUser { .. } => {
                tracing::warn!("ignoring client-side opcode {} sent by server", op.opcode());
                Ok(None)
            }
        }
    }
}

fn millis(value: u64) -> Timestamp {
    Timestamp::from_millis(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Asks the running client to replay everything relevant to one user.
#[derive(Clone)]
pub struct ReplayUserHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl ReplayUserHandle {
    /// Returns `false` when the client is no longer running.
    pub fn request_replay(&self, username: impl Into<String>) -> bool {
        self.tx.send(username.into()).is_ok()
    }
}

/// Long-lived subscriber to the orchestrator's accounting notifications.
pub struct EventStreamClient {
    provider_id: String,
    transport: Arc<dyn EventTransportPort>,
    cursor: Arc<dyn ReplayCursorPort>,
    orchestrator: Arc<dyn OrchestratorPort>,
    dispatcher: Arc<NotificationDispatcher>,
    replay_rx: mpsc::UnboundedReceiver<String>,
    backoff: Duration,
}

impl EventStreamClient {
    pub fn new(
        transport: Arc<dyn EventTransportPort>,
        cursor: Arc<dyn ReplayCursorPort>,
        orchestrator: Arc<dyn OrchestratorPort>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> (Self, ReplayUserHandle) {
        let (tx, replay_rx) = mpsc::unbounded_channel();
        let client = Self {
            provider_id: dispatcher.provider_id().to_string(),
            transport,
            cursor,
            orchestrator,
            dispatcher,
            replay_rx,
            backoff: RECONNECT_BACKOFF,
        };
        (client, ReplayUserHandle { tx })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Connects, consumes and reconnects until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("event stream client started for provider {}", self.provider_id);
        while !cancel.is_cancelled() {
            match self.run_session(&cancel).await {
                Ok(()) => tracing::info!("event stream connection closed"),
                Err(err) => tracing::warn!("event stream session ended: {err}"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
        tracing::info!("event stream client stopped");
    }

    async fn run_session(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let replay_from = self
            .cursor
            .replay_from(&self.provider_id)
            .await
            .map_err(SessionError::Cursor)?
            .map(|at| Timestamp::from_datetime(at).as_millis().max(0) as u64)
            .unwrap_or(0);
        let token = self
            .orchestrator
            .access_token()
            .await
            .map_err(SessionError::Auth)?;

        let mut conn = self
            .transport
            .connect()
            .await
            .map_err(SessionError::Transport)?;
        let auth = encode_frame(&[Op::Auth {
            replay_from_ms: replay_from,
            flags: AUTH_FLAG_INCLUDE_RETIRED,
            token,
        }])?;
        conn.send(auth).await.map_err(SessionError::Transport)?;
        tracing::debug!("event stream authenticated, replaying from {replay_from}");

        let mut state = SessionState::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = conn.recv() => {
                    match frame.map_err(SessionError::Transport)? {
                        Some(bytes) => self.handle_frame(&mut state, &bytes).await?,
                        None => return Ok(()),
                    }
                }
                Some(username) = self.replay_rx.recv() => {
                    send_replay_request(conn.as_mut(), username).await?;
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        state: &mut SessionState,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        for op in FrameReader::new(bytes) {
            if let Some(notification) = state.apply(op?)? {
                self.dispatcher
                    .dispatch(notification)
                    .await
                    .map_err(SessionError::Dispatch)?;
            }
        }
        Ok(())
    }
}

async fn send_replay_request(
    conn: &mut dyn EventConnection,
    username: String,
) -> Result<(), SessionError> {
    tracing::debug!("requesting replay for {username}");
    let frame = encode_frame(&[Op::ReplayUser { username }])?;
    conn.send(frame).await.map_err(SessionError::Transport)
}
