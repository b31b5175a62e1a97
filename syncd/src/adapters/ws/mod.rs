// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::app::errors::{AppError, AppResult, codes};
use crate::app::ports::{EventConnection, EventTransportPort};

const NOTIFICATIONS_PATH: &str = "/api/accounting/notifications";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Derives the notification stream endpoint from the orchestrator's HTTP base
/// URL by switching the scheme to `ws`/`wss`.
pub fn notifications_url(orchestrator_url: &str) -> AppResult<Url> {
    let invalid = |detail: String| {
        AppError::invalid_argument(format!("invalid orchestrator url {orchestrator_url:?}"))
            .with_context(detail)
    };

    let mut url = Url::parse(orchestrator_url).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch scheme to {scheme}")))?;

    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}{NOTIFICATIONS_PATH}"));
    url.set_query(None);
    Ok(url)
}

fn map_ws_error(err: WsError, url: &Url) -> AppError {
    match err {
        WsError::Http(response) => AppError::remote(format!(
            "websocket handshake with {url} rejected with {}",
            response.status()
        )),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            AppError::unreachable(codes::CONNECTION_FAILURE, "websocket closed")
        }
        WsError::Io(err) => AppError::unreachable(codes::CONNECTION_FAILURE, err.to_string())
            .with_context(url.to_string()),
        other => AppError::unreachable(codes::NETWORK_ERROR, other.to_string()),
    }
}

pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn from_orchestrator_url(orchestrator_url: &str) -> AppResult<Self> {
        Ok(Self::new(notifications_url(orchestrator_url)?))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EventTransportPort for WebSocketTransport {
    async fn connect(&self) -> AppResult<Box<dyn EventConnection>> {
        tracing::info!("connecting to notification stream at {}", self.url);
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|err| map_ws_error(err, &self.url))?;
        Ok(Box::new(WebSocketConnection {
            stream,
            url: self.url.clone(),
        }))
    }
}

struct WebSocketConnection {
    stream: WsStream,
    url: Url,
}

#[async_trait]
impl EventConnection for WebSocketConnection {
    async fn send(&mut self, frame: Vec<u8>) -> AppResult<()> {
        self.stream
            .send(Message::binary(frame))
            .await
            .map_err(|err| map_ws_error(err, &self.url))
    }

    async fn recv(&mut self) -> AppResult<Option<Vec<u8>>> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(err)) => return Err(map_ws_error(err, &self.url)),
            };
            match message {
                Message::Binary(bytes) => return Ok(Some(bytes.to_vec())),
                Message::Text(text) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "notification stream closed by peer");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
