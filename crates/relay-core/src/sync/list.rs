use std::collections::BTreeSet;

use crate::auth::{SessionHandle, EDITOR_ROLES};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::filters::FilterController;
use crate::gateway::{Gateway, GatewayResult, IssueListPage};

/// Issue keys picked for a bulk action, scoped to the loaded page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    keys: BTreeSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership; returns whether `key` is now selected.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.keys.remove(key) {
            false
        } else {
            self.keys.insert(key.to_owned());
            true
        }
    }

    pub fn select(&mut self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    pub fn deselect(&mut self, key: &str) {
        self.keys.remove(key);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }

    /// Drop keys that are not on `page`.
    pub fn retain_page(&mut self, page: &IssueListPage) {
        self.keys
            .retain(|key| page.issues.iter().any(|issue| &issue.key == key));
    }
}

/// One page of the issue list plus its filters and selection.
#[derive(Debug, Clone)]
pub struct IssueListView {
    filters: FilterController,
    page_size: u32,
    page: Option<IssueListPage>,
    pub selection: SelectionSet,
}

impl IssueListView {
    pub fn new(filters: FilterController) -> Self {
        Self::with_page_size(filters, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(filters: FilterController, page_size: u32) -> Self {
        Self {
            filters,
            page_size,
            page: None,
            selection: SelectionSet::new(),
        }
    }

    pub fn filters(&self) -> &FilterController {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterController {
        &mut self.filters
    }

    pub fn page(&self) -> Option<&IssueListPage> {
        self.page.as_ref()
    }

    /// Fetch the page the filters describe; the old page stays on failure.
    pub async fn reload(&mut self, gateway: &Gateway) -> GatewayResult<&IssueListPage> {
        let query = self.filters.list_query(self.page_size);
        let page = gateway.list_issues(&query).await?;
        self.selection.retain_page(&page);
        Ok(&*self.page.insert(page))
    }

    /// Clear the selection once the user can no longer bulk-edit.
    pub fn enforce_capability(&mut self, session: &SessionHandle) {
        if !session.has_role(&EDITOR_ROLES) && !self.selection.is_empty() {
            tracing::debug!(count = self.selection.len(), "dropping selection; role lost");
            self.selection.clear();
        }
    }
}
