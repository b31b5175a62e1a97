// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::app::types::{Job, JobState, Project, Timestamp, TrackedAllocation, WalletOwner};

#[derive(Debug, Error)]
pub enum SyncStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("timestamp formatting error: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("timestamp parse error: {0}")]
    TimeParse(#[from] time::error::Parse),
    #[error("empty job id")]
    EmptyJobId,
    #[error("empty project id")]
    EmptyProjectId,
    #[error("empty username")]
    EmptyUsername,
}

pub type Result<T> = std::result::Result<T, SyncStoreError>;

/// Durable state of the sync daemon: replay watermark, project snapshots,
/// wallet allocations, the tracked job mirror and the user mapping.
#[derive(Clone)]
pub struct SyncStore {
    pool: SqlitePool,
}

impl SyncStore {
    /// Open (or create) a file-backed SQLite DB.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let url = format!("sqlite://{}", path_ref.to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Open an in-memory store (handy for tests).
    #[allow(dead_code)]
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Improve concurrency for file DBs.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        self.ensure_replay_table().await?;
        self.ensure_projects_table().await?;
        self.ensure_allocations_table().await?;
        self.ensure_jobs_table().await?;
        self.ensure_users_table().await?;
        Ok(())
    }

    async fn ensure_replay_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS apm_events_replay_from (
              provider_id TEXT PRIMARY KEY,
              last_update TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_projects_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_projects (
              project_id TEXT PRIMARY KEY,
              project TEXT NOT NULL,
              last_update TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_allocations_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_allocations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              category TEXT NOT NULL,
              owner_username TEXT NOT NULL DEFAULT '',
              owner_project TEXT NOT NULL DEFAULT '',
              combined_quota INTEGER NOT NULL,
              locked INTEGER NOT NULL DEFAULT 0,
              last_update INTEGER NOT NULL,
              local_retired_usage INTEGER NOT NULL DEFAULT 0,
              UNIQUE (category, owner_username, owner_project)
            );
            CREATE INDEX IF NOT EXISTS idx_tracked_allocations_category
              ON tracked_allocations(category);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_jobs_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_jobs (
              job_id TEXT PRIMARY KEY,
              created_by TEXT NOT NULL,
              project_id TEXT NOT NULL DEFAULT '',
              product_id TEXT NOT NULL,
              product_category TEXT NOT NULL,
              state TEXT NOT NULL,
              resource TEXT NOT NULL,
              allocated_nodes TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tracked_jobs_state ON tracked_jobs(state);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_users_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connected_users (
              ucloud_username TEXT PRIMARY KEY,
              uid INTEGER NOT NULL UNIQUE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- replay watermark

    pub async fn replay_from(&self, provider_id: &str) -> Result<Option<OffsetDateTime>> {
        let raw: Option<String> = sqlx::query_scalar(
            "select last_update from apm_events_replay_from where provider_id = ?1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;
        raw.map(|value| OffsetDateTime::parse(&value, &Rfc3339))
            .transpose()
            .map_err(SyncStoreError::from)
    }

    pub async fn set_replay_from(&self, provider_id: &str, at: OffsetDateTime) -> Result<()> {
        let formatted = at.format(&Rfc3339)?;
        sqlx::query(
            r#"
            insert into apm_events_replay_from(provider_id, last_update)
            values (?1, ?2)
            on conflict (provider_id) do update set last_update = excluded.last_update
            "#,
        )
        .bind(provider_id)
        .bind(formatted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- project snapshots

    pub async fn load_project(&self, project_id: &str) -> Result<Option<Project>> {
        let raw: Option<String> =
            sqlx::query_scalar("select project from tracked_projects where project_id = ?1")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn save_project(&self, project: &Project, at: OffsetDateTime) -> Result<()> {
        if project.id.is_empty() {
            return Err(SyncStoreError::EmptyProjectId);
        }
        let json = serde_json::to_string(project)?;
        sqlx::query(
            r#"
            insert into tracked_projects(project_id, project, last_update)
            values (?1, ?2, ?3)
            on conflict (project_id) do update set
              project = excluded.project,
              last_update = excluded.last_update
            "#,
        )
        .bind(&project.id)
        .bind(json)
        .bind(at.format(&Rfc3339)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- allocations

    pub async fn upsert_allocation(&self, allocation: &TrackedAllocation) -> Result<()> {
        sqlx::query(
            r#"
            insert into tracked_allocations(
              category, owner_username, owner_project, combined_quota, locked,
              last_update, local_retired_usage)
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            on conflict (category, owner_username, owner_project) do update set
              combined_quota = excluded.combined_quota,
              locked = excluded.locked,
              last_update = excluded.last_update,
              local_retired_usage = excluded.local_retired_usage
            "#,
        )
        .bind(&allocation.category)
        .bind(allocation.owner.username())
        .bind(allocation.owner.project_id())
        .bind(to_sql_u64(allocation.combined_quota))
        .bind(allocation.locked)
        .bind(allocation.last_update.as_millis())
        .bind(to_sql_u64(allocation.local_retired_usage))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_allocation(
        &self,
        owner: &WalletOwner,
        category: &str,
    ) -> Result<Option<TrackedAllocation>> {
        let row = sqlx::query(
            r#"
            select category, owner_username, owner_project, combined_quota, locked,
                   last_update, local_retired_usage
            from tracked_allocations
            where category = ?1 and owner_username = ?2 and owner_project = ?3
            "#,
        )
        .bind(category)
        .bind(owner.username())
        .bind(owner.project_id())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_allocation).transpose()
    }

    pub async fn list_allocations(&self, category: &str) -> Result<Vec<TrackedAllocation>> {
        let rows = sqlx::query(
            r#"
            select category, owner_username, owner_project, combined_quota, locked,
                   last_update, local_retired_usage
            from tracked_allocations
            where category = ?1
            order by id
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_allocation).collect()
    }

    // -- tracked jobs

    pub async fn upsert_job(&self, job: &Job) -> Result<()> {
        if job.id.is_empty() {
            return Err(SyncStoreError::EmptyJobId);
        }
        let resource = serde_json::to_string(job)?;
        sqlx::query(
            r#"
            insert into tracked_jobs(job_id, created_by, project_id, product_id, product_category, state, resource)
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            on conflict (job_id) do update set
              resource = excluded.resource,
              created_by = excluded.created_by,
              project_id = excluded.project_id,
              product_id = excluded.product_id,
              product_category = excluded.product_category,
              state = excluded.state
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner.created_by)
        .bind(job.owner.project.as_deref().unwrap_or(""))
        .bind(&job.specification.product.id)
        .bind(&job.specification.product.category)
        .bind(job.status.state.as_str())
        .bind(resource)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let raw: Option<String> =
            sqlx::query_scalar("select resource from tracked_jobs where job_id = ?1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn list_jobs_in_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows: Vec<String> =
            sqlx::query_scalar("select resource from tracked_jobs where state = ?1 order by job_id")
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for json in rows {
            match serde_json::from_str::<Job>(&json) {
                Ok(job) => jobs.push(job),
                Err(err) => tracing::warn!("skipping unreadable tracked job: {err}"),
            }
        }
        Ok(jobs)
    }

    /// Replaces the allocated node list of each listed job in one transaction.
    pub async fn update_allocated_nodes(
        &self,
        allocations: &[(String, Vec<String>)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (job_id, nodes) in allocations {
            sqlx::query("update tracked_jobs set allocated_nodes = ?1 where job_id = ?2")
                .bind(serde_json::to_string(nodes)?)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn allocated_nodes(&self, job_id: &str) -> Result<Vec<String>> {
        let raw: Option<Option<String>> =
            sqlx::query_scalar("select allocated_nodes from tracked_jobs where job_id = ?1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(deserialize_string_list(raw.flatten()))
    }

    // -- connected users

    pub async fn map_user(&self, ucloud_username: &str, uid: u32) -> Result<()> {
        if ucloud_username.is_empty() {
            return Err(SyncStoreError::EmptyUsername);
        }
        sqlx::query(
            r#"
            insert into connected_users(ucloud_username, uid) values (?1, ?2)
            on conflict (ucloud_username) do update set uid = excluded.uid
            "#,
        )
        .bind(ucloud_username)
        .bind(i64::from(uid))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn local_uid(&self, ucloud_username: &str) -> Result<Option<u32>> {
        let uid: Option<i64> =
            sqlx::query_scalar("select uid from connected_users where ucloud_username = ?1")
                .bind(ucloud_username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(uid.and_then(|value| u32::try_from(value).ok()))
    }

    pub async fn local_uids(&self, ucloud_usernames: &[String]) -> Result<HashMap<String, u32>> {
        let mut mapped = HashMap::new();
        for name in ucloud_usernames {
            if let Some(uid) = self.local_uid(name).await? {
                mapped.insert(name.clone(), uid);
            }
        }
        Ok(mapped)
    }

    pub async fn remote_username(&self, uid: u32) -> Result<Option<String>> {
        let name: Option<String> =
            sqlx::query_scalar("select ucloud_username from connected_users where uid = ?1")
                .bind(i64::from(uid))
                .fetch_optional(&self.pool)
                .await?;
        Ok(name)
    }
}

// -- helpers

// SQLite integers are signed 64-bit; u64 columns are stored bit-for-bit.
fn to_sql_u64(value: u64) -> i64 {
    value as i64
}

fn from_sql_u64(value: i64) -> u64 {
    value as u64
}

fn deserialize_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|value| serde_json::from_str::<Vec<String>>(&value).ok())
        .unwrap_or_default()
}

fn row_to_allocation(row: SqliteRow) -> Result<TrackedAllocation> {
    let username: String = row.try_get("owner_username")?;
    let project: String = row.try_get("owner_project")?;
    Ok(TrackedAllocation {
        owner: WalletOwner::from_ids(&username, &project),
        category: row.try_get("category")?,
        combined_quota: from_sql_u64(row.try_get("combined_quota")?),
        locked: row.try_get::<i64, _>("locked")? != 0,
        last_update: Timestamp::from_millis(row.try_get("last_update")?),
        local_retired_usage: from_sql_u64(row.try_get("local_retired_usage")?),
    })
}
