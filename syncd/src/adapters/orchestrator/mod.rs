// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! HTTP client for the orchestrator's job control and provider auth APIs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::OrchestratorPort;
use crate::app::types::{Job, JobUpdateEntry};

const RETRIEVE_JOB_PATH: &str = "/api/jobs/control/retrieve";
const UPDATE_JOBS_PATH: &str = "/api/jobs/control/update";
const REFRESH_TOKEN_PATH: &str = "/auth/providers/refresh";

/// Access tokens are reused for this long before a new one is requested.
const ACCESS_TOKEN_REUSE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} {url} failed with {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("refresh response did not contain an access token")]
    MissingToken,
}

fn map_orchestrator_error(err: OrchestratorError) -> AppError {
    match &err {
        OrchestratorError::Http(inner) if inner.is_connect() || inner.is_timeout() => {
            AppError::unreachable(codes::CONNECTION_FAILURE, err.to_string())
        }
        OrchestratorError::Http(_) => AppError::unreachable(codes::NETWORK_ERROR, err.to_string()),
        OrchestratorError::Status { status, .. } if *status == StatusCode::NOT_FOUND => {
            AppError::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, err.to_string())
        }
        OrchestratorError::Status { .. } => AppError::remote(err.to_string()),
        OrchestratorError::Decode { .. } | OrchestratorError::MissingToken => {
            AppError::protocol(err.to_string())
        }
    }
}

#[derive(Serialize)]
struct BulkRequest<T> {
    items: Vec<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct BulkResponse<T> {
    responses: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

pub struct HttpOrchestrator {
    http: reqwest::Client,
    base_url: String,
    refresh_token: String,
    token: Mutex<Option<CachedToken>>,
}

impl HttpOrchestrator {
    pub fn new(
        base_url: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, OrchestratorError> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("syncd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            refresh_token: refresh_token.into().trim().to_string(),
            token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn bearer(&self) -> Result<String, OrchestratorError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.fetched_at.elapsed() < ACCESS_TOKEN_REUSE
        {
            return Ok(token.value.clone());
        }

        let url = self.url(REFRESH_TOKEN_PATH);
        let body = BulkRequest {
            items: vec![RefreshRequest {
                refresh_token: &self.refresh_token,
            }],
        };
        let response = self.http.post(&url).json(&body).send().await?;
        let parsed: BulkResponse<RefreshResponse> = read_json("POST", &url, response).await?;
        let value = parsed
            .responses
            .into_iter()
            .next()
            .map(|r| r.access_token)
            .filter(|t| !t.is_empty())
            .ok_or(OrchestratorError::MissingToken)?;

        tracing::debug!("refreshed orchestrator access token");
        *cached = Some(CachedToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    async fn fetch_job(&self, id: &str) -> Result<Option<Job>, OrchestratorError> {
        let token = self.bearer().await?;
        let url = self.url(RETRIEVE_JOB_PATH);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("id", id),
                ("includeParameters", "true"),
                ("includeApplication", "true"),
                ("includeProduct", "true"),
            ])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json("GET", &url, response).await.map(Some)
    }

    async fn push_updates(&self, updates: &[JobUpdateEntry]) -> Result<(), OrchestratorError> {
        let token = self.bearer().await?;
        let url = self.url(UPDATE_JOBS_PATH);
        let body = BulkRequest {
            items: updates.to_vec(),
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Status {
                method: "POST",
                url,
                status,
                body,
            });
        }
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(
    method: &'static str,
    url: &str,
    response: reqwest::Response,
) -> Result<T, OrchestratorError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(OrchestratorError::Status {
            method,
            url: url.to_string(),
            status,
            body,
        });
    }
    serde_json::from_str(&body).map_err(|source| OrchestratorError::Decode {
        url: url.to_string(),
        source,
    })
}

#[async_trait]
impl OrchestratorPort for HttpOrchestrator {
    async fn retrieve_job(&self, id: &str) -> AppResult<Option<Job>> {
        self.fetch_job(id).await.map_err(map_orchestrator_error)
    }

    async fn add_job_updates(&self, updates: &[JobUpdateEntry]) -> AppResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.push_updates(updates)
            .await
            .map_err(map_orchestrator_error)
    }

    async fn access_token(&self) -> AppResult<String> {
        self.bearer().await.map_err(map_orchestrator_error)
    }
}
