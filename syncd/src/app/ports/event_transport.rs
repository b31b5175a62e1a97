// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;

/// Opens streaming connections to the orchestrator's notification endpoint.
#[async_trait]
pub trait EventTransportPort: Send + Sync {
    async fn connect(&self) -> AppResult<Box<dyn EventConnection>>;
}

/// One open, message-oriented connection. Each message is one binary frame.
#[async_trait]
pub trait EventConnection: Send {
    async fn send(&mut self, frame: Vec<u8>) -> AppResult<()>;
    /// Next frame, or `Ok(None)` once the peer closed the connection.
    async fn recv(&mut self) -> AppResult<Option<Vec<u8>>>;
}
