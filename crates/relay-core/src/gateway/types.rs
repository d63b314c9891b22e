use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::{UserPreferences, UserRole};

use super::GatewayError;

const SUMMARY_MAX_CHARS: usize = 255;
const DETAILS_MIN_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssueType {
    Bug,
    Task,
    Story,
}

impl IssueType {
    pub const ALL: [IssueType; 3] = [IssueType::Bug, IssueType::Task, IssueType::Story];

    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::Bug => "Bug",
            IssueType::Task => "Task",
            IssueType::Story => "Story",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssuePriority {
    Highest,
    High,
    Medium,
    Low,
    Lowest,
}

impl IssuePriority {
    pub const ALL: [IssuePriority; 5] = [
        IssuePriority::Highest,
        IssuePriority::High,
        IssuePriority::Medium,
        IssuePriority::Low,
        IssuePriority::Lowest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IssuePriority::Highest => "Highest",
            IssuePriority::High => "High",
            IssuePriority::Medium => "Medium",
            IssuePriority::Low => "Low",
            IssuePriority::Lowest => "Lowest",
        }
    }
}

/// Error reported when a string does not name a known enum member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for IssueType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssueType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "issue type",
                value: s.to_owned(),
            })
    }
}

impl FromStr for IssuePriority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssuePriority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "priority",
                value: s.to_owned(),
            })
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for IssuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Person reference embedded in issues, comments and history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IssueUser {
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

impl IssueUser {
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: String,
    pub author: Option<IssueUser>,
    pub body: String,
    pub created: String,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryChange {
    pub field: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub author: Option<IssueUser>,
    pub created: String,
    #[serde(default)]
    pub items: Vec<HistoryChange>,
}

/// Client-side view of a remote issue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` when absent or outside the known set (e.g. "Epic").
    #[serde(rename = "type", default, deserialize_with = "known_member")]
    pub issue_type: Option<IssueType>,
    /// `None` when absent or outside the known set (e.g. "Critical").
    #[serde(default, deserialize_with = "known_member")]
    pub priority: Option<IssuePriority>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reporter: Option<IssueUser>,
    #[serde(default)]
    pub assignee: Option<IssueUser>,
    pub created: String,
    pub updated: String,
    #[serde(default)]
    pub comments: Vec<IssueComment>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Upstream trackers pass through names we do not model; those read as absent.
fn known_member<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

impl Issue {
    /// Parse `updated`, accepting both RFC 3339 and the `+0000` offset form.
    pub fn updated_at(&self) -> Option<DateTime<FixedOffset>> {
        parse_timestamp(&self.updated)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
}

/// One page of the issue list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IssueListPage {
    pub issues: Vec<Issue>,
    pub total: u64,
    pub page: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

/// Parameters accepted by `GET /api/issues`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueListQuery {
    pub statuses: Vec<String>,
    pub priorities: Vec<IssuePriority>,
    pub types: Vec<IssueType>,
    pub reporter: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Partial body for `PUT /api/issues/{key}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<IssuePriority>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self == &IssueUpdate::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdatedIssue {
    pub key: String,
}

/// Body for `POST /api/issues`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewIssue {
    pub summary: String,
    pub details: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub priority: IssuePriority,
    #[serde(rename = "attachmentLinks", skip_serializing_if = "Option::is_none")]
    pub attachment_links: Option<String>,
}

impl NewIssue {
    /// Trim the free-text fields and check the length rules the server enforces.
    pub fn validated(mut self) -> Result<Self, GatewayError> {
        self.summary = self.summary.trim().to_owned();
        self.details = self.details.trim().to_owned();
        if self.summary.is_empty() {
            return Err(GatewayError::Validation("summary is required".into()));
        }
        if self.summary.chars().count() > SUMMARY_MAX_CHARS {
            return Err(GatewayError::Validation(format!(
                "summary must be {SUMMARY_MAX_CHARS} characters or less"
            )));
        }
        if self.details.chars().count() < DETAILS_MIN_CHARS {
            return Err(GatewayError::Validation(format!(
                "details must be at least {DETAILS_MIN_CHARS} characters"
            )));
        }
        self.attachment_links = self
            .attachment_links
            .map(|links| links.trim().to_owned())
            .filter(|links| !links.is_empty());
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedIssue {
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedComment {
    pub id: String,
    pub body: String,
    pub created: String,
}

/// Server-side outcome of the batched status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct BulkStatusResult {
    pub updated: usize,
    #[serde(default)]
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueUpdates {
    pub issues: Vec<Issue>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub added_by: Option<String>,
    #[serde(default)]
    pub added_by_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedUser {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleChange {
    pub user_id: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct PreferencesEnvelope {
    pub preferences: UserPreferences,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WhitelistEnvelope {
    pub emails: Vec<WhitelistEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WhitelistAddEnvelope {
    pub email: WhitelistEntry,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsersEnvelope {
    pub users: Vec<ManagedUser>,
}
