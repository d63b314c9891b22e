use std::fmt;

/// Pages the client can show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Dashboard,
    IssueList,
    IssueDetail(String),
    Admin,
    Whitelist,
    Profile,
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Dashboard => "/".to_owned(),
            Route::IssueList => "/issues".to_owned(),
            Route::IssueDetail(key) => format!("/issues/{key}"),
            Route::Admin => "/admin".to_owned(),
            Route::Whitelist => "/admin/whitelist".to_owned(),
            Route::Profile => "/profile".to_owned(),
        }
    }

    /// Resolve a location (path plus optional query). Unknown paths land on the dashboard.
    pub fn parse(location: &str) -> Route {
        let (path, _) = split_location(location);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["issues"] => Route::IssueList,
            ["issues", key] if is_issue_key(key) => Route::IssueDetail((*key).to_owned()),
            ["admin"] => Route::Admin,
            ["admin", "whitelist"] => Route::Whitelist,
            ["profile"] => Route::Profile,
            _ => Route::Dashboard,
        }
    }

    /// Only some pages are allowed to hold a filter query.
    pub fn accepts_query(&self) -> bool {
        matches!(self, Route::IssueList)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Split `"/issues?status=Open"` into `("/issues", "status=Open")`.
pub fn split_location(location: &str) -> (&str, &str) {
    match location.split_once('?') {
        Some((path, query)) => (path, query),
        None => (location, ""),
    }
}

/// `PROJECT-123`: uppercase project prefix, dash, number.
pub fn is_issue_key(candidate: &str) -> bool {
    match candidate.split_once('-') {
        Some((project, number)) => {
            !project.is_empty()
                && project.chars().all(|c| c.is_ascii_uppercase())
                && !number.is_empty()
                && number.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
