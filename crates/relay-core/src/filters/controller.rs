use crate::gateway::{IssueListQuery, IssuePriority, IssueType};

use super::codec::{decode, encode, FilterState};
use super::route::{split_location, Route};

/// Linear history of visited locations with a cursor, like a browser tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBar {
    entries: Vec<String>,
    cursor: usize,
}

impl AddressBar {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            entries: vec![initial.into()],
            cursor: 0,
        }
    }

    pub fn current(&self) -> &str {
        &self.entries[self.cursor]
    }

    pub fn route(&self) -> Route {
        Route::parse(self.current())
    }

    pub fn query(&self) -> &str {
        split_location(self.current()).1
    }

    /// New history entry; anything ahead of the cursor is discarded.
    pub fn push(&mut self, location: impl Into<String>) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(location.into());
        self.cursor += 1;
    }

    /// Overwrite the current entry in place.
    pub fn replace(&mut self, location: impl Into<String>) {
        self.entries[self.cursor] = location.into();
    }

    pub fn back(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(self.current())
    }

    pub fn forward(&mut self) -> Option<&str> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        Some(self.current())
    }

    pub fn history_len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for AddressBar {
    fn default() -> Self {
        Self::new(Route::Dashboard.path())
    }
}

/// Keeps the issue-list filters and the address bar in step.
///
/// Filter edits rewrite the current entry; page changes between routes add one.
#[derive(Debug, Clone)]
pub struct FilterController {
    state: FilterState,
    address: AddressBar,
}

impl FilterController {
    pub fn new(address: AddressBar) -> Self {
        let state = if address.route() == Route::IssueList {
            decode(address.query())
        } else {
            FilterState::default()
        };
        Self { state, address }
    }

    pub fn from_location(location: &str) -> Self {
        Self::new(AddressBar::new(location))
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn address(&self) -> &AddressBar {
        &self.address
    }

    pub fn list_query(&self, limit: u32) -> IssueListQuery {
        self.state.to_list_query(limit)
    }

    /// Statuses travel comma-joined, so a value containing `,` is refused.
    pub fn toggle_status(&mut self, status: &str) {
        let status = status.trim();
        if status.is_empty() || status.contains(',') {
            return;
        }
        if !self.state.statuses.remove(status) {
            self.state.statuses.insert(status.to_owned());
        }
        self.filters_changed();
    }

    pub fn set_statuses<I, S>(&mut self, statuses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state.statuses = statuses
            .into_iter()
            .flat_map(|s| {
                s.as_ref()
                    .split(',')
                    .map(|part| part.trim().to_owned())
                    .collect::<Vec<_>>()
            })
            .filter(|s| !s.is_empty())
            .collect();
        self.filters_changed();
    }

    pub fn toggle_priority(&mut self, priority: IssuePriority) {
        if !self.state.priorities.remove(&priority) {
            self.state.priorities.insert(priority);
        }
        self.filters_changed();
    }

    pub fn set_priorities(&mut self, priorities: impl IntoIterator<Item = IssuePriority>) {
        self.state.priorities = priorities.into_iter().collect();
        self.filters_changed();
    }

    pub fn toggle_type(&mut self, issue_type: IssueType) {
        if !self.state.types.remove(&issue_type) {
            self.state.types.insert(issue_type);
        }
        self.filters_changed();
    }

    pub fn set_types(&mut self, types: impl IntoIterator<Item = IssueType>) {
        self.state.types = types.into_iter().collect();
        self.filters_changed();
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.state.search = search.into();
        self.filters_changed();
    }

    pub fn clear_all(&mut self) {
        self.state = FilterState::default();
        self.sync_address();
    }

    /// The only mutation that keeps the other filters and does not reset paging.
    pub fn set_page(&mut self, page: u32) {
        self.state.page = page.max(1);
        self.sync_address();
    }

    /// Move to another page of the app, adding a history entry.
    pub fn navigate(&mut self, route: Route) {
        let location = if route.accepts_query() {
            with_query(&route.path(), &encode(&self.state))
        } else {
            route.path()
        };
        self.address.push(location);
    }

    /// Step back through history, re-reading filters when landing on the list.
    pub fn back(&mut self) -> Option<Route> {
        self.address.back()?;
        let route = self.address.route();
        if route == Route::IssueList {
            self.state = decode(self.address.query());
        }
        Some(route)
    }

    fn filters_changed(&mut self) {
        self.state.page = 1;
        self.sync_address();
    }

    fn sync_address(&mut self) {
        if self.address.route() != Route::IssueList {
            return;
        }
        let location = with_query(&Route::IssueList.path(), &encode(&self.state));
        self.address.replace(location);
    }
}

fn with_query(path: &str, query: &str) -> String {
    if query.is_empty() {
        path.to_owned()
    } else {
        format!("{path}?{query}")
    }
}
