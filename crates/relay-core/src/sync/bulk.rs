use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::auth::EDITOR_ROLES;
use crate::gateway::{Gateway, IssueUpdate};
use crate::notify::{NotificationBus, ToastSpec};

use super::list::IssueListView;

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("a bulk update is already running")]
    Busy,
    #[error("bulk updates require the sqa or admin role")]
    Forbidden,
    #[error("no issues selected")]
    EmptySelection,
    #[error("target status is required")]
    MissingStatus,
}

/// Per-key result of one bulk apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub updated: usize,
    pub failed: Vec<String>,
}

impl BulkOutcome {
    pub fn attempted(&self) -> usize {
        self.updated + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// How the coordinator talks to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BulkMode {
    /// One `PUT` per key, all in flight at once.
    #[default]
    PerItem,
    /// A single call to the batched status endpoint.
    Batched,
}

/// Applies one status to many issues and reports the combined result once.
#[derive(Debug, Clone)]
pub struct BulkCoordinator {
    gateway: Gateway,
    bus: NotificationBus,
    mode: BulkMode,
    busy: Arc<AtomicBool>,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BulkCoordinator {
    pub fn new(gateway: Gateway, bus: NotificationBus) -> Self {
        Self {
            gateway,
            bus,
            mode: BulkMode::default(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_mode(mut self, mode: BulkMode) -> Self {
        self.mode = mode;
        self
    }

    /// True while an apply is outstanding; triggers should be disabled.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Move every key in `keys` to `status`, then publish exactly one toast.
    ///
    /// Precondition failures return an error before anything is sent. Once
    /// dispatched, the call always settles into a [`BulkOutcome`].
    pub async fn apply(&self, keys: &[String], status: &str) -> Result<BulkOutcome, BulkError> {
        if !self.gateway.session().has_role(&EDITOR_ROLES) {
            return Err(BulkError::Forbidden);
        }
        let status = status.trim();
        if status.is_empty() {
            return Err(BulkError::MissingStatus);
        }
        let keys = dedup(keys);
        if keys.is_empty() {
            return Err(BulkError::EmptySelection);
        }
        let _guard = self.try_begin()?;

        tracing::info!(count = keys.len(), status, mode = ?self.mode, "bulk status update");
        let outcome = match self.mode {
            BulkMode::PerItem => self.apply_per_item(&keys, status).await,
            BulkMode::Batched => self.apply_batched(&keys, status).await,
        };
        self.report(&outcome, status);
        Ok(outcome)
    }

    /// Apply to the view's selection; clear it and reload only after settling.
    pub async fn apply_to_view(
        &self,
        view: &mut IssueListView,
        status: &str,
    ) -> Result<BulkOutcome, BulkError> {
        let keys = view.selection.keys();
        let outcome = self.apply(&keys, status).await?;
        view.selection.clear();
        if let Err(err) = view.reload(&self.gateway).await {
            tracing::warn!(error = %err, "issue list reload after bulk update failed");
        }
        Ok(outcome)
    }

    fn try_begin(&self) -> Result<BusyGuard, BulkError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(self.busy.clone()))
            .map_err(|_| BulkError::Busy)
    }

    async fn apply_per_item(&self, keys: &[String], status: &str) -> BulkOutcome {
        let update = IssueUpdate {
            status: Some(status.to_owned()),
            ..Default::default()
        };
        let mut tasks = JoinSet::new();
        for key in keys {
            let gateway = self.gateway.clone();
            let update = update.clone();
            let key = key.clone();
            tasks.spawn(async move {
                let result = gateway.update_issue(&key, &update).await;
                (key, result)
            });
        }

        let mut succeeded = BTreeSet::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(_))) => {
                    succeeded.insert(key);
                }
                Ok((key, Err(err))) => {
                    tracing::debug!(issue = %key, error = %err, "bulk item failed");
                }
                Err(err) => tracing::warn!(error = %err, "bulk item task aborted"),
            }
        }

        BulkOutcome {
            updated: succeeded.len(),
            failed: keys
                .iter()
                .filter(|key| !succeeded.contains(*key))
                .cloned()
                .collect(),
        }
    }

    async fn apply_batched(&self, keys: &[String], status: &str) -> BulkOutcome {
        match self.gateway.bulk_update_status(keys, status).await {
            Ok(result) => {
                let failed: BTreeSet<&str> = result.failed.iter().map(String::as_str).collect();
                BulkOutcome {
                    updated: result.updated,
                    failed: keys
                        .iter()
                        .filter(|key| failed.contains(key.as_str()))
                        .cloned()
                        .collect(),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "batched status update failed");
                BulkOutcome {
                    updated: 0,
                    failed: keys.to_vec(),
                }
            }
        }
    }

    fn report(&self, outcome: &BulkOutcome, status: &str) {
        let spec = if outcome.failed.is_empty() {
            ToastSpec::success("Issues updated").with_message(format!(
                "Moved {} to {status}",
                plural(outcome.updated)
            ))
        } else if outcome.updated == 0 {
            ToastSpec::error("Bulk update failed").with_message(format!(
                "None of {} could be moved to {status}",
                plural(outcome.failed.len())
            ))
        } else {
            ToastSpec::warning("Partially updated").with_message(format!(
                "Moved {} to {status}; {} failed",
                plural(outcome.updated),
                outcome.failed.len()
            ))
        };
        self.bus.publish(spec);
    }
}

fn plural(count: usize) -> String {
    if count == 1 {
        "1 issue".to_owned()
    } else {
        format!("{count} issues")
    }
}

/// Trimmed, non-empty, first occurrence kept.
fn dedup(keys: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    keys.iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty() && seen.insert(*key))
        .map(str::to_owned)
        .collect()
}
