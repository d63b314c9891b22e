use std::collections::BTreeSet;

use url::form_urlencoded;

use crate::gateway::{IssueListQuery, IssuePriority, IssueType};

/// Statuses offered by the issue workflow; the server remains the authority.
pub const WORKFLOW_STATUSES: [&str; 8] = [
    "Open",
    "To Do",
    "In Progress",
    "In Review",
    "Done",
    "Resolved",
    "Cancelled",
    "Closed",
];

/// Issue-list filters as they appear in the address query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
    pub statuses: BTreeSet<String>,
    pub priorities: BTreeSet<IssuePriority>,
    pub types: BTreeSet<IssueType>,
    pub search: String,
    /// Always at least 1.
    pub page: u32,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            statuses: BTreeSet::new(),
            priorities: BTreeSet::new(),
            types: BTreeSet::new(),
            search: String::new(),
            page: 1,
        }
    }
}

impl FilterState {
    /// True when any filter (not counting the page) is set.
    pub fn has_filters(&self) -> bool {
        !self.statuses.is_empty()
            || !self.priorities.is_empty()
            || !self.types.is_empty()
            || !self.search.is_empty()
    }

    pub fn is_default(&self) -> bool {
        self == &FilterState::default()
    }

    pub fn to_list_query(&self, limit: u32) -> IssueListQuery {
        IssueListQuery {
            statuses: self.statuses.iter().cloned().collect(),
            priorities: self.priorities.iter().copied().collect(),
            types: self.types.iter().copied().collect(),
            reporter: None,
            search: (!self.search.is_empty()).then(|| self.search.clone()),
            page: Some(self.page),
            limit: Some(limit),
        }
    }
}

/// Parse a query string (with or without the leading `?`).
///
/// Never fails: absent or malformed values fall back to their defaults and
/// unknown priorities or types are dropped. The first occurrence of a key wins.
pub fn decode(query: &str) -> FilterState {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut state = FilterState::default();
    let mut seen = BTreeSet::new();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if !seen.insert(key.clone().into_owned()) {
            continue;
        }
        match key.as_ref() {
            "status" => state.statuses = split_list(&value).map(str::to_owned).collect(),
            "priority" => {
                state.priorities = split_list(&value).filter_map(|v| v.parse().ok()).collect()
            }
            "type" => state.types = split_list(&value).filter_map(|v| v.parse().ok()).collect(),
            "search" => state.search = value.into_owned(),
            "page" => state.page = value.trim().parse::<u32>().unwrap_or(1).max(1),
            _ => {}
        }
    }

    state
}

/// Serialize filters, leaving out every key that holds its default.
///
/// The unfiltered first page encodes to an empty string.
pub fn encode(state: &FilterState) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());
    if !state.statuses.is_empty() {
        out.append_pair("status", &join(state.statuses.iter().map(String::as_str)));
    }
    if !state.priorities.is_empty() {
        out.append_pair("priority", &join(state.priorities.iter().map(|p| p.as_str())));
    }
    if !state.types.is_empty() {
        out.append_pair("type", &join(state.types.iter().map(|t| t.as_str())));
    }
    if !state.search.is_empty() {
        out.append_pair("search", &state.search);
    }
    if state.page > 1 {
        out.append_pair("page", &state.page.to_string());
    }
    out.finish()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|v| !v.is_empty())
}

fn join<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_query_is_default() {
        assert!(decode("").is_default());
        assert!(decode("?").is_default());
        assert_eq!(encode(&FilterState::default()), "");
    }

    #[test]
    fn decodes_lists_search_and_page() {
        let state = decode("?status=Open,In%20Progress&priority=High&type=Bug,Story&search=login&page=3");
        assert_eq!(
            state.statuses.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["In Progress", "Open"]
        );
        assert_eq!(state.priorities.into_iter().collect::<Vec<_>>(), vec![IssuePriority::High]);
        assert_eq!(
            state.types.into_iter().collect::<Vec<_>>(),
            vec![IssueType::Bug, IssueType::Story]
        );
        assert_eq!(state.search, "login");
        assert_eq!(state.page, 3);
    }

    #[test]
    fn malformed_values_degrade() {
        let state = decode("priority=Urgent,low&type=Epic&page=-4&status=,,");
        assert_eq!(state.priorities.len(), 1);
        assert!(state.priorities.contains(&IssuePriority::Low));
        assert!(state.types.is_empty());
        assert!(state.statuses.is_empty());
        assert_eq!(state.page, 1);
        assert_eq!(decode("page=0").page, 1);
        assert_eq!(decode("page=abc").page, 1);
    }

    #[test]
    fn first_page_is_omitted() {
        let state = FilterState {
            search: "crash on save".into(),
            ..Default::default()
        };
        assert_eq!(encode(&state), "search=crash+on+save");
    }

    #[test]
    fn normalizes_order_and_defaults() {
        let normalized = encode(&decode("page=1&type=Story,Bug&status=Open&utm=x"));
        assert_eq!(normalized, "status=Open&type=Bug%2CStory");
    }

    #[test]
    fn list_query_carries_page_and_limit() {
        let state = decode("status=Done&page=2");
        let query = state.to_list_query(20);
        assert_eq!(query.statuses, vec!["Done".to_string()]);
        assert_eq!(query.page, Some(2));
        assert_eq!(query.limit, Some(20));
        assert!(query.search.is_none());
    }

    fn filter_state() -> impl Strategy<Value = FilterState> {
        (
            proptest::sample::subsequence(WORKFLOW_STATUSES.to_vec(), 0..=WORKFLOW_STATUSES.len()),
            proptest::sample::subsequence(IssuePriority::ALL.to_vec(), 0..=5),
            proptest::sample::subsequence(IssueType::ALL.to_vec(), 0..=3),
            "[a-zA-Z0-9 ,&=?%+#-]{0,16}",
            1u32..10_000,
        )
            .prop_map(|(statuses, priorities, types, search, page)| FilterState {
                statuses: statuses.into_iter().map(str::to_owned).collect(),
                priorities: priorities.into_iter().collect(),
                types: types.into_iter().collect(),
                search,
                page,
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(state in filter_state()) {
            prop_assert_eq!(decode(&encode(&state)), state);
        }

        #[test]
        fn encoding_a_decoded_query_is_stable(query in ".{0,48}") {
            let normalized = encode(&decode(&query));
            prop_assert_eq!(encode(&decode(&normalized)), normalized.clone());
            prop_assert_eq!(decode(&normalized), decode(&query));
        }
    }
}
