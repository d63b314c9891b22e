//! Keeps the client's copy of remote issues consistent with the server.

mod bulk;
mod displayed;
mod list;
mod optimistic;
mod polling;

pub use bulk::{BulkCoordinator, BulkError, BulkMode, BulkOutcome};
pub use displayed::{DisplayedIssue, FieldEdit};
pub use list::{IssueListView, SelectionSet};
pub use optimistic::{EditError, OptimisticEditor};
pub use polling::{PollState, PollingHandle, PollingScheduler, Visibility, MIN_POLL_INTERVAL};
