use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::auth::{AuthUser, PreferencesUpdate, SessionHandle, UserPreferences, UserRole};

use super::types::{
    BulkStatusResult, CreatedComment, CreatedIssue, Issue, IssueListPage, IssueListQuery,
    IssueUpdate, IssueUpdates, ManagedUser, NewIssue, PreferencesEnvelope, RoleChange,
    UpdatedIssue, UsersEnvelope, WhitelistAddEnvelope, WhitelistEntry, WhitelistEnvelope,
};

const USER_AGENT: &str = "relay-rs/0.1.0";

/// Errors returned by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-2xx response; `message` is the server's explanation when it sent one.
    #[error("{message}")]
    Status { status: StatusCode, message: String },
    #[error("access denied: {message}")]
    Unauthorized { message: String },
    #[error("invalid API base URL: {0}")]
    InvalidBase(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),
    /// Rejected locally, never sent.
    #[error("{0}")]
    Validation(String),
}

impl GatewayError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GatewayError::Unauthorized { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Ordered query parameters; list values are joined with commas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.pairs.push((key.to_owned(), value.to_string()));
        self
    }

    pub fn with_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Append `key=a,b,c`; empty lists are omitted.
    pub fn with_list<I, S>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = values
            .into_iter()
            .map(|v| v.as_ref().to_owned())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        if joined.is_empty() {
            self
        } else {
            self.with(key, joined)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl From<&IssueListQuery> for QueryParams {
    fn from(query: &IssueListQuery) -> Self {
        QueryParams::new()
            .with_list("status", &query.statuses)
            .with_list("priority", query.priorities.iter().map(|p| p.as_str()))
            .with_list("type", query.types.iter().map(|t| t.as_str()))
            .with_opt("reporter", query.reporter.as_deref().filter(|r| !r.is_empty()))
            .with_opt("search", query.search.as_deref().filter(|s| !s.is_empty()))
            .with_opt("page", query.page)
            .with_opt("limit", query.limit)
    }
}

#[derive(Clone, Copy)]
enum Auth<'a> {
    /// Bearer token captured from the shared session at send time.
    Session,
    Explicit(&'a str),
}

/// The single HTTP path between the client and the remote issue service.
#[derive(Debug, Clone)]
pub struct Gateway {
    http: Client,
    base: Url,
    session: SessionHandle,
}

impl Gateway {
    pub fn new(base: Url, session: SessionHandle) -> GatewayResult<Self> {
        if base.cannot_be_a_base() {
            return Err(GatewayError::InvalidBase(base.to_string()));
        }
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base,
            session,
        })
    }

    /// Build a gateway from a base URL string (useful for testing).
    pub fn with_base_url(base: &str, session: SessionHandle) -> GatewayResult<Self> {
        Self::new(Url::parse(base)?, session)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Identity check for a specific token, bypassing the shared session.
    pub async fn me(&self, token: &str) -> GatewayResult<AuthUser> {
        self.execute(
            Method::GET,
            &["api", "auth", "me"],
            &QueryParams::new(),
            None,
            Auth::Explicit(token),
        )
        .await
    }

    /// Best-effort sign-out log; any HTTP response counts as delivered.
    pub async fn logout(&self, token: &str) -> GatewayResult<()> {
        let url = self.url(&["api", "auth", "logout"], &QueryParams::new())?;
        self.http
            .post(url)
            .bearer_auth(token)
            .send()
            .await
            .map(|_| ())
            .map_err(GatewayError::from)
    }

    pub async fn update_preferences(
        &self,
        update: &PreferencesUpdate,
    ) -> GatewayResult<UserPreferences> {
        if update.is_empty() {
            return Err(GatewayError::Validation("no preferences to update".into()));
        }
        let envelope: PreferencesEnvelope = self
            .execute(
                Method::PUT,
                &["api", "auth", "preferences"],
                &QueryParams::new(),
                Some(serde_json::to_value(update)?),
                Auth::Session,
            )
            .await?;
        Ok(envelope.preferences)
    }

    pub async fn list_issues(&self, query: &IssueListQuery) -> GatewayResult<IssueListPage> {
        self.get(&["api", "issues"], &QueryParams::from(query)).await
    }

    pub async fn get_issue(&self, key: &str) -> GatewayResult<Issue> {
        let key = require_key(key)?;
        self.get(&["api", "issues", key], &QueryParams::new()).await
    }

    pub async fn create_issue(&self, issue: NewIssue) -> GatewayResult<CreatedIssue> {
        let issue = issue.validated()?;
        self.send_json(Method::POST, &["api", "issues"], &issue).await
    }

    pub async fn update_issue(&self, key: &str, update: &IssueUpdate) -> GatewayResult<UpdatedIssue> {
        let key = require_key(key)?;
        if update.is_empty() {
            return Err(GatewayError::Validation("update contains no fields".into()));
        }
        self.send_json(Method::PUT, &["api", "issues", key], update)
            .await
    }

    pub async fn add_comment(&self, key: &str, body: &str) -> GatewayResult<CreatedComment> {
        let key = require_key(key)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(GatewayError::Validation("comment body is required".into()));
        }
        self.send_json(
            Method::POST,
            &["api", "issues", key, "comments"],
            &json!({ "body": body }),
        )
        .await
    }

    /// Batched status transition; the server reports per-key failures.
    pub async fn bulk_update_status(
        &self,
        keys: &[String],
        status: &str,
    ) -> GatewayResult<BulkStatusResult> {
        if keys.is_empty() {
            return Err(GatewayError::Validation("issue_keys must be non-empty".into()));
        }
        if status.trim().is_empty() {
            return Err(GatewayError::Validation("status is required".into()));
        }
        self.send_json(
            Method::POST,
            &["api", "issues", "bulk", "status"],
            &json!({ "issue_keys": keys, "status": status }),
        )
        .await
    }

    pub async fn issues_updated_since(&self, since: &str) -> GatewayResult<IssueUpdates> {
        if since.trim().is_empty() {
            return Err(GatewayError::Validation("'since' is required".into()));
        }
        self.get(
            &["api", "issues", "updates"],
            &QueryParams::new().with("since", since),
        )
        .await
    }

    pub async fn list_whitelist(&self) -> GatewayResult<Vec<WhitelistEntry>> {
        let envelope: WhitelistEnvelope = self.get(&["api", "whitelist"], &QueryParams::new()).await?;
        Ok(envelope.emails)
    }

    pub async fn add_whitelist(
        &self,
        email: &str,
        notes: Option<&str>,
    ) -> GatewayResult<WhitelistEntry> {
        let email = email.trim();
        if !looks_like_email(email) {
            return Err(GatewayError::Validation(
                "please enter a valid email address".into(),
            ));
        }
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        let envelope: WhitelistAddEnvelope = self
            .send_json(
                Method::POST,
                &["api", "whitelist"],
                &json!({ "email": email, "notes": notes }),
            )
            .await?;
        Ok(envelope.email)
    }

    pub async fn remove_whitelist(&self, id: i64) -> GatewayResult<()> {
        let id = id.to_string();
        let _: Value = self
            .execute(
                Method::DELETE,
                &["api", "whitelist", &id],
                &QueryParams::new(),
                None,
                Auth::Session,
            )
            .await?;
        Ok(())
    }

    pub async fn list_users(&self) -> GatewayResult<Vec<ManagedUser>> {
        let envelope: UsersEnvelope = self.get(&["api", "auth", "users"], &QueryParams::new()).await?;
        Ok(envelope.users)
    }

    pub async fn update_user_role(&self, user_id: &str, role: UserRole) -> GatewayResult<RoleChange> {
        let user_id = require_key(user_id)?;
        self.send_json(
            Method::PUT,
            &["api", "auth", "users", user_id, "role"],
            &json!({ "role": role }),
        )
        .await
    }

    async fn get<R>(&self, segments: &[&str], query: &QueryParams) -> GatewayResult<R>
    where
        R: DeserializeOwned,
    {
        self.execute(Method::GET, segments, query, None, Auth::Session)
            .await
    }

    async fn send_json<T, R>(&self, method: Method, segments: &[&str], body: &T) -> GatewayResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.execute(method, segments, &QueryParams::new(), Some(body), Auth::Session)
            .await
    }

    fn url(&self, segments: &[&str], query: &QueryParams) -> GatewayResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidBase(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.pairs());
        }
        Ok(url)
    }

    async fn execute<R>(
        &self,
        method: Method,
        segments: &[&str],
        query: &QueryParams,
        body: Option<Value>,
        auth: Auth<'_>,
    ) -> GatewayResult<R>
    where
        R: DeserializeOwned,
    {
        let url = self.url(segments, query)?;
        let token = match auth {
            Auth::Session => self.session.token(),
            Auth::Explicit(token) => Some(token.to_owned()),
        };

        let mut request = self.http.request(method.clone(), url);
        if let Some(token) = token.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        tracing::trace!(%method, path = %segments.join("/"), "sending request");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = error_message(status, &text);
            if status == StatusCode::UNAUTHORIZED {
                if let (Auth::Session, Some(token)) = (auth, token.as_deref()) {
                    self.session.expire_if_current(token);
                }
                return Err(GatewayError::Unauthorized { message });
            }
            return Err(GatewayError::Status { status, message });
        }

        let payload = if text.trim().is_empty() {
            serde_json::from_value(Value::Null)?
        } else {
            serde_json::from_str(&text)?
        };
        Ok(payload)
    }
}

/// Prefer the server's `{message}` (or `{error}`) text, else a status-based fallback.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "error"].iter().find_map(|field| {
                value
                    .get(field)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_owned)
            })
        })
        .unwrap_or_else(|| format!("HTTP error, status {}", status.as_u16()))
}

fn require_key(key: &str) -> GatewayResult<&str> {
    let key = key.trim();
    if key.is_empty() {
        Err(GatewayError::Validation("identifier is required".into()))
    } else {
        Ok(key)
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && domain.contains('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthUser, MemoryStorage};
    use crate::gateway::IssuePriority;
    use httpmock::prelude::*;

    fn signed_in(token: &str) -> SessionHandle {
        let session = SessionHandle::new(MemoryStorage::default());
        session.commit(Some(token.to_owned()), Some(sample_user()));
        session
    }

    fn sample_user() -> AuthUser {
        serde_json::from_value(serde_json::json!({
            "id": "user-1",
            "email": "ada@example.com",
            "name": "Ada",
            "role": "sqa",
            "preferences": { "theme": "dark" }
        }))
        .unwrap()
    }

    fn issue_json(key: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "key": key,
            "summary": "Fix login bug",
            "type": "Bug",
            "priority": "High",
            "status": status,
            "reporter": null,
            "assignee": null,
            "created": "2024-07-01T12:00:00.000+0000",
            "updated": "2024-07-02T12:00:00.000+0000",
            "comments": [],
            "history": []
        })
    }

    #[tokio::test]
    async fn list_issues_joins_list_params() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/issues")
                .query_param("status", "Open,In Progress")
                .query_param("priority", "High")
                .query_param("page", "2")
                .query_param("limit", "20")
                .header("Authorization", "Bearer tok-1");
            then.status(200).json_body_obj(&serde_json::json!({
                "issues": [issue_json("BUG-1", "Open")],
                "total": 21,
                "page": 2,
                "totalPages": 2
            }));
        });

        let gateway = Gateway::with_base_url(&server.base_url(), signed_in("tok-1")).unwrap();
        let page = gateway
            .list_issues(&IssueListQuery {
                statuses: vec!["Open".into(), "In Progress".into()],
                priorities: vec![IssuePriority::High],
                page: Some(2),
                limit: Some(20),
                ..Default::default()
            })
            .await
            .unwrap();

        mock.assert();
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.issues[0].key, "BUG-1");
    }

    #[tokio::test]
    async fn unmodelled_type_and_priority_read_as_absent() {
        let server = MockServer::start();
        let mut epic = issue_json("BUG-2", "Open");
        epic["type"] = serde_json::json!("Epic");
        epic["priority"] = serde_json::json!("Critical");
        server.mock(|when, then| {
            when.method(GET).path("/api/issues");
            then.status(200).json_body_obj(&serde_json::json!({
                "issues": [issue_json("BUG-1", "Open"), epic],
                "total": 2,
                "page": 1,
                "totalPages": 1
            }));
        });

        let gateway = Gateway::with_base_url(&server.base_url(), signed_in("tok")).unwrap();
        let page = gateway
            .list_issues(&IssueListQuery::default())
            .await
            .unwrap();

        assert_eq!(page.issues.len(), 2);
        assert_eq!(page.issues[0].priority, Some(IssuePriority::High));
        assert!(page.issues[1].issue_type.is_none());
        assert!(page.issues[1].priority.is_none());
    }

    #[tokio::test]
    async fn truncated_body_is_a_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"key\":",
                )
                .await
                .unwrap();
        });

        let gateway =
            Gateway::with_base_url(&format!("http://{addr}"), signed_in("tok")).unwrap();
        let err = gateway.get_issue("BUG-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Http(_)), "{err:?}");
    }

    #[test]
    fn empty_lists_and_search_are_omitted() {
        let params = QueryParams::from(&IssueListQuery {
            search: Some(String::new()),
            page: Some(1),
            ..Default::default()
        });
        assert_eq!(params.pairs(), &[("page".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn server_message_is_surfaced() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/api/issues/BUG-1");
            then.status(400)
                .json_body_obj(&serde_json::json!({ "message": "Invalid transition" }));
        });

        let gateway = Gateway::with_base_url(&server.base_url(), signed_in("tok")).unwrap();
        let err = gateway
            .update_issue(
                "BUG-1",
                &IssueUpdate {
                    status: Some("Done".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Invalid transition");
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn error_key_and_generic_fallback() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/issues/BUG-2");
            then.status(404)
                .json_body_obj(&serde_json::json!({ "error": "Issue not found" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/issues/BUG-3");
            then.status(502).body("<html>bad gateway</html>");
        });

        let gateway = Gateway::with_base_url(&server.base_url(), signed_in("tok")).unwrap();
        let err = gateway.get_issue("BUG-2").await.unwrap_err();
        assert_eq!(err.to_string(), "Issue not found");
        let err = gateway.get_issue("BUG-3").await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP error, status 502");
    }

    #[tokio::test]
    async fn unauthorized_expires_session() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/issues/BUG-1");
            then.status(401)
                .json_body_obj(&serde_json::json!({ "message": "Token expired" }));
        });

        let session = signed_in("stale");
        let gateway = Gateway::with_base_url(&server.base_url(), session.clone()).unwrap();
        let err = gateway.get_issue("BUG-1").await.unwrap_err();

        assert!(err.is_unauthorized());
        assert!(session.token().is_none());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn empty_comment_is_never_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/issues/BUG-1/comments");
            then.status(201);
        });

        let gateway = Gateway::with_base_url(&server.base_url(), signed_in("tok")).unwrap();
        let err = gateway.add_comment("BUG-1", "   ").await.unwrap_err();

        assert!(matches!(err, GatewayError::Validation(_)));
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn whitelist_round_trip() {
        let server = MockServer::start();
        let add = server.mock(|when, then| {
            when.method(POST)
                .path("/api/whitelist")
                .json_body_obj(&serde_json::json!({ "email": "bob@example.com", "notes": null }));
            then.status(201).json_body_obj(&serde_json::json!({
                "success": true,
                "email": { "id": 7, "email": "bob@example.com", "added_by": "user-1" }
            }));
        });
        let remove = server.mock(|when, then| {
            when.method(DELETE).path("/api/whitelist/7");
            then.status(200)
                .json_body_obj(&serde_json::json!({ "success": true }));
        });

        let gateway = Gateway::with_base_url(&server.base_url(), signed_in("tok")).unwrap();
        let entry = gateway.add_whitelist(" bob@example.com ", Some("")).await.unwrap();
        assert_eq!(entry.id, 7);
        gateway.remove_whitelist(entry.id).await.unwrap();

        add.assert();
        remove.assert();
        assert!(matches!(
            gateway.add_whitelist("not-an-email", None).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn base_path_prefix_is_preserved() {
        let gateway =
            Gateway::with_base_url("https://relay.example.com/tracker/", signed_in("t")).unwrap();
        let url = gateway
            .url(&["api", "issues", "BUG 1"], &QueryParams::new().with("page", 2))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://relay.example.com/tracker/api/issues/BUG%201?page=2"
        );
    }
}
