use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::gateway::{Issue, IssuePriority, IssueType, IssueUpdate};

/// The issue currently on screen, shared by the editor and the poller.
///
/// Every write notifies [`DisplayedIssue::subscribe`] receivers.
#[derive(Debug, Clone)]
pub struct DisplayedIssue {
    tx: Arc<watch::Sender<Option<Issue>>>,
    /// Bumped by every full replacement; local edits leave it alone.
    generation: Arc<AtomicU64>,
}

/// What an optimistic write overwrote, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingEdit {
    pub(crate) key: String,
    pub(crate) previous: PreviousValue,
    generation: u64,
}

impl Default for DisplayedIssue {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayedIssue {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_issue(issue: Issue) -> Self {
        let displayed = Self::new();
        displayed.replace(issue);
        displayed
    }

    pub fn snapshot(&self) -> Option<Issue> {
        self.tx.borrow().clone()
    }

    pub fn key(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|issue| issue.key.clone())
    }

    /// Full replacement, as done by the initial load and every poll.
    pub fn replace(&self, issue: Issue) {
        self.tx.send_modify(|slot| {
            self.generation.fetch_add(1, Ordering::AcqRel);
            *slot = Some(issue);
        });
    }

    pub fn clear(&self) {
        self.tx.send_modify(|slot| {
            self.generation.fetch_add(1, Ordering::AcqRel);
            *slot = None;
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Issue>> {
        self.tx.subscribe()
    }

    /// Write `edit` into the issue and hand back what it overwrote.
    pub(crate) fn apply_edit(&self, edit: &FieldEdit) -> Option<PendingEdit> {
        let mut pending = None;
        self.tx.send_if_modified(|slot| {
            let Some(issue) = slot.as_mut() else {
                return false;
            };
            let before = PreviousValue::capture(issue, edit);
            edit.write(issue);
            let changed = !before.matches(edit);
            pending = Some(PendingEdit {
                key: issue.key.clone(),
                previous: before,
                generation: self.generation.load(Ordering::Acquire),
            });
            changed
        });
        pending
    }

    /// Put the previous value back unless something newer has been shown since.
    ///
    /// Any full replacement after the edit (a poll, a reload) is authoritative, as is
    /// a later edit of the same field.
    pub(crate) fn roll_back(&self, edit: &FieldEdit, pending: PendingEdit) -> bool {
        self.tx.send_if_modified(|slot| match slot.as_mut() {
            Some(issue)
                if issue.key == pending.key
                    && self.generation.load(Ordering::Acquire) == pending.generation
                    && edit.is_held_by(issue) =>
            {
                pending.previous.restore(issue);
                true
            }
            _ => false,
        })
    }
}

/// A single-field change to a displayed issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    Status(String),
    Priority(IssuePriority),
    Type(IssueType),
    Summary(String),
}

impl FieldEdit {
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldEdit::Status(_) => "status",
            FieldEdit::Priority(_) => "priority",
            FieldEdit::Type(_) => "type",
            FieldEdit::Summary(_) => "summary",
        }
    }

    pub fn to_update(&self) -> IssueUpdate {
        let mut update = IssueUpdate::default();
        match self {
            FieldEdit::Status(status) => update.status = Some(status.clone()),
            FieldEdit::Priority(priority) => update.priority = Some(*priority),
            FieldEdit::Type(issue_type) => update.issue_type = Some(*issue_type),
            FieldEdit::Summary(summary) => update.summary = Some(summary.clone()),
        }
        update
    }

    fn write(&self, issue: &mut Issue) {
        match self {
            FieldEdit::Status(status) => issue.status = Some(status.clone()),
            FieldEdit::Priority(priority) => issue.priority = Some(*priority),
            FieldEdit::Type(issue_type) => issue.issue_type = Some(*issue_type),
            FieldEdit::Summary(summary) => issue.summary = summary.clone(),
        }
    }

    fn is_held_by(&self, issue: &Issue) -> bool {
        match self {
            FieldEdit::Status(status) => issue.status.as_deref() == Some(status.as_str()),
            FieldEdit::Priority(priority) => issue.priority == Some(*priority),
            FieldEdit::Type(issue_type) => issue.issue_type == Some(*issue_type),
            FieldEdit::Summary(summary) => &issue.summary == summary,
        }
    }
}

/// Field value captured before an optimistic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PreviousValue {
    Status(Option<String>),
    Priority(Option<IssuePriority>),
    Type(Option<IssueType>),
    Summary(String),
}

impl PreviousValue {
    fn capture(issue: &Issue, edit: &FieldEdit) -> Self {
        match edit {
            FieldEdit::Status(_) => PreviousValue::Status(issue.status.clone()),
            FieldEdit::Priority(_) => PreviousValue::Priority(issue.priority),
            FieldEdit::Type(_) => PreviousValue::Type(issue.issue_type),
            FieldEdit::Summary(_) => PreviousValue::Summary(issue.summary.clone()),
        }
    }

    pub(crate) fn matches(&self, edit: &FieldEdit) -> bool {
        match (self, edit) {
            (PreviousValue::Status(before), FieldEdit::Status(after)) => {
                before.as_deref() == Some(after.as_str())
            }
            (PreviousValue::Priority(before), FieldEdit::Priority(after)) => {
                *before == Some(*after)
            }
            (PreviousValue::Type(before), FieldEdit::Type(after)) => *before == Some(*after),
            (PreviousValue::Summary(before), FieldEdit::Summary(after)) => before == after,
            _ => false,
        }
    }

    fn restore(self, issue: &mut Issue) {
        match self {
            PreviousValue::Status(status) => issue.status = status,
            PreviousValue::Priority(priority) => issue.priority = priority,
            PreviousValue::Type(issue_type) => issue.issue_type = issue_type,
            PreviousValue::Summary(summary) => issue.summary = summary,
        }
    }
}
