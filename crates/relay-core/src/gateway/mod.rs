mod client;
mod types;

pub use client::{Gateway, GatewayError, GatewayResult, QueryParams};
pub use types::{
    BulkStatusResult, CreatedComment, CreatedIssue, HistoryChange, HistoryEntry, Issue,
    IssueComment, IssueListPage, IssueListQuery, IssuePriority, IssueType, IssueUpdate,
    IssueUpdates, IssueUser, ManagedUser, NewIssue, RoleChange, UnknownVariant, UpdatedIssue,
    WhitelistEntry,
};
