// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Upper bound on the per-job update log; older entries are discarded first.
pub const MAX_JOB_UPDATES: usize = 64;

/// Milliseconds since the Unix epoch, as exchanged with the orchestrator.
/// Zero and negative values mean "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const UNSET: Timestamp = Timestamp(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn is_unset(self) -> bool {
        self.0 <= 0
    }

    pub fn from_datetime(value: OffsetDateTime) -> Self {
        Self((value.unix_timestamp_nanos() / 1_000_000) as i64)
    }

    pub fn to_datetime(self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    pub fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    InQueue,
    Running,
    Success,
    Failure,
    Expired,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJobStateError(pub String);

impl fmt::Display for ParseJobStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job state '{}'", self.0)
    }
}

impl std::error::Error for ParseJobStateError {}

impl JobState {
    /// States the store keeps in memory after a cold start.
    pub const ACTIVE: [JobState; 3] = [JobState::InQueue, JobState::Suspended, JobState::Running];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::InQueue => "IN_QUEUE",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
            JobState::Expired => "EXPIRED",
            JobState::Suspended => "SUSPENDED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::Failure | JobState::Expired
        )
    }

    /// Status text used when a state change is reported without explicit text.
    pub fn default_status_message(self) -> &'static str {
        match self {
            JobState::InQueue => "Your job is currently in the queue.",
            JobState::Running => "Your job is now running.",
            JobState::Success => "Your job has successfully completed.",
            JobState::Failure => "Your job has failed.",
            JobState::Expired => "Your job has expired.",
            JobState::Suspended => "Your machine is currently powered off.",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_QUEUE" => Ok(JobState::InQueue),
            "RUNNING" => Ok(JobState::Running),
            "SUCCESS" => Ok(JobState::Success),
            "FAILURE" => Ok(JobState::Failure),
            "EXPIRED" => Ok(JobState::Expired),
            "SUSPENDED" => Ok(JobState::Suspended),
            other => Err(ParseJobStateError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleDuration {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl SimpleDuration {
    pub fn to_millis(self) -> i64 {
        self.hours * 60 * 60 * 1000 + self.minutes * 60 * 1000 + self.seconds * 1000
    }

    pub fn from_millis(millis: i64) -> Self {
        Self {
            hours: millis / (1000 * 60 * 60),
            minutes: millis % (1000 * 60 * 60) / (1000 * 60),
            seconds: millis % (1000 * 60) / 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductReference {
    pub id: String,
    pub category: String,
    pub provider: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAndVersion {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOwner {
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpecification {
    pub product: ProductReference,
    #[serde(default)]
    pub application: NameAndVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_allocation: Option<SimpleDuration>,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub allow_restart: bool,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            state: JobState::InQueue,
            started_at: None,
            expires_at: None,
            allow_restart: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_folder: Option<String>,
}

/// A state transition or annotation for a job. Every field is optional; the
/// expectation fields are preconditions checked against the tracked copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_state: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_different_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_time_allocation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_restart: Option<bool>,
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl JobUpdate {
    pub fn state_change(state: JobState, status: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn status_text(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    /// Whether the optimistic-concurrency preconditions hold for `current`.
    pub fn expectations_met(&self, current: JobState) -> bool {
        if let Some(expected) = self.expected_state {
            if expected != current {
                return false;
            }
        }
        if self.expected_different_state.unwrap_or(false) && self.state == Some(current) {
            return false;
        }
        true
    }
}

/// A job update addressed to a specific job id, as sent upstream in bulk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdateEntry {
    pub id: String,
    pub update: JobUpdate,
}

impl JobUpdateEntry {
    pub fn new(id: impl Into<String>, update: JobUpdate) -> Self {
        Self {
            id: id.into(),
            update,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub owner: ResourceOwner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_generated_id: Option<String>,
    pub specification: JobSpecification,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub output: JobOutput,
    #[serde(default)]
    pub updates: Vec<JobUpdate>,
}

impl Job {
    /// Keeps only the most recent [`MAX_JOB_UPDATES`] entries, in order.
    pub fn truncate_updates(&mut self) {
        if self.updates.len() > MAX_JOB_UPDATES {
            let excess = self.updates.len() - MAX_JOB_UPDATES;
            self.updates.drain(..excess);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.state.is_terminal()
    }
}

/// Owner of a wallet: a single user or a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WalletOwner {
    User { username: String },
    Project { project_id: String },
}

impl WalletOwner {
    /// Builds an owner from the persisted `(owner_username, owner_project)` pair.
    pub fn from_ids(username: &str, project_id: &str) -> Self {
        if project_id.is_empty() {
            WalletOwner::User {
                username: username.to_string(),
            }
        } else {
            WalletOwner::Project {
                project_id: project_id.to_string(),
            }
        }
    }

    pub fn from_resource_owner(owner: &ResourceOwner) -> Self {
        Self::from_ids(&owner.created_by, owner.project.as_deref().unwrap_or(""))
    }

    pub fn username(&self) -> &str {
        match self {
            WalletOwner::User { username } => username,
            WalletOwner::Project { .. } => "",
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            WalletOwner::User { .. } => "",
            WalletOwner::Project { project_id } => project_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCategory {
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpecification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_can_consume_resources")]
    pub can_consume_resources: bool,
}

impl Default for ProjectSpecification {
    fn default() -> Self {
        Self {
            parent: None,
            title: String::new(),
            can_consume_resources: true,
        }
    }
}

fn default_can_consume_resources() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    #[serde(default)]
    pub members: Vec<ProjectMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub specification: ProjectSpecification,
    #[serde(default)]
    pub status: ProjectStatus,
}

impl Project {
    pub fn member_usernames(&self) -> impl Iterator<Item = &str> {
        self.status.members.iter().map(|m| m.username.as_str())
    }
}

/// Persisted quota state for one `(owner, category)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedAllocation {
    pub owner: WalletOwner,
    pub category: String,
    pub combined_quota: u64,
    pub locked: bool,
    pub last_update: Timestamp,
    pub local_retired_usage: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventWalletUpdated {
    pub owner: WalletOwner,
    pub category: ProductCategory,
    pub combined_quota: u64,
    pub locked: bool,
    pub last_update: Timestamp,
    pub project: Option<Project>,
    pub local_retired_usage: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectComparison {
    pub members_added_to_project: Vec<String>,
    pub members_removed_from_project: Vec<String>,
}

impl ProjectComparison {
    /// Member-level difference between two snapshots of the same project.
    pub fn between(before: &Project, after: &Project) -> Self {
        let added = after
            .member_usernames()
            .filter(|name| !before.member_usernames().any(|old| old == *name))
            .map(str::to_string)
            .collect();
        let removed = before
            .member_usernames()
            .filter(|name| !after.member_usernames().any(|new| new == *name))
            .map(str::to_string)
            .collect();
        Self {
            members_added_to_project: added,
            members_removed_from_project: removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members_added_to_project.is_empty() && self.members_removed_from_project.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventProjectUpdated {
    pub last_update: Timestamp,
    pub project: Project,
    pub comparison: ProjectComparison,
}

/// A decoded notification, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    WalletUpdated(EventWalletUpdated),
    ProjectUpdated(EventProjectUpdated),
}

/// A job as currently seen by the batch system during a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedJob {
    pub job_id: String,
    pub state: JobState,
    pub status: Option<String>,
    pub nodes: Vec<String>,
}
