use thiserror::Error;

use crate::auth::EDITOR_ROLES;
use crate::gateway::{Gateway, GatewayError};
use crate::notify::{NotificationBus, ToastSpec};

use super::displayed::{DisplayedIssue, FieldEdit};

const SUMMARY_MAX_CHARS: usize = 255;

#[derive(Debug, Error)]
pub enum EditError {
    #[error("editing issues requires the sqa or admin role")]
    Forbidden,
    #[error("no issue is displayed")]
    NothingDisplayed,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Remote(#[from] GatewayError),
}

/// Applies single-field edits locally first, then confirms them remotely.
#[derive(Debug, Clone)]
pub struct OptimisticEditor {
    gateway: Gateway,
    bus: NotificationBus,
}

impl OptimisticEditor {
    pub fn new(gateway: Gateway, bus: NotificationBus) -> Self {
        Self { gateway, bus }
    }

    /// Write `edit` into `target`, send it, and undo it if the server refuses.
    ///
    /// A failure publishes exactly one error toast with the server's reason.
    pub async fn apply(&self, target: &DisplayedIssue, edit: FieldEdit) -> Result<(), EditError> {
        if !self.gateway.session().has_role(&EDITOR_ROLES) {
            return Err(EditError::Forbidden);
        }
        let edit = normalize(edit)?;

        let pending = target
            .apply_edit(&edit)
            .ok_or(EditError::NothingDisplayed)?;
        let key = pending.key.clone();
        if pending.previous.matches(&edit) {
            tracing::debug!(issue = %key, field = edit.field_name(), "edit is a no-op; skipping");
            return Ok(());
        }

        match self.gateway.update_issue(&key, &edit.to_update()).await {
            Ok(_) => {
                tracing::debug!(issue = %key, field = edit.field_name(), "edit confirmed");
                Ok(())
            }
            Err(err) => {
                let restored = target.roll_back(&edit, pending);
                tracing::info!(
                    issue = %key,
                    field = edit.field_name(),
                    restored,
                    error = %err,
                    "edit rejected"
                );
                self.bus
                    .publish(ToastSpec::error("Update failed").with_message(err.to_string()));
                Err(EditError::Remote(err))
            }
        }
    }
}

fn normalize(edit: FieldEdit) -> Result<FieldEdit, EditError> {
    match edit {
        FieldEdit::Status(status) => {
            let status = status.trim();
            if status.is_empty() {
                return Err(EditError::Validation("status is required".into()));
            }
            Ok(FieldEdit::Status(status.to_owned()))
        }
        FieldEdit::Summary(summary) => {
            let summary = summary.trim();
            if summary.is_empty() {
                return Err(EditError::Validation("summary is required".into()));
            }
            if summary.chars().count() > SUMMARY_MAX_CHARS {
                return Err(EditError::Validation(format!(
                    "summary must be {SUMMARY_MAX_CHARS} characters or less"
                )));
            }
            Ok(FieldEdit::Summary(summary.to_owned()))
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthUser, MemoryStorage, SessionHandle};
    use crate::gateway::IssuePriority;
    use crate::notify::{Subscription, Toast, ToastKind};
    use crate::sync::displayed::tests::sample_issue;
    use httpmock::prelude::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn session_as(role: &str) -> SessionHandle {
        let session = SessionHandle::new(MemoryStorage::default());
        let user: AuthUser = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "email": "qa@example.com",
            "role": role
        }))
        .unwrap();
        session.commit(Some("tok".into()), Some(user));
        session
    }

    fn editor(
        server: &MockServer,
        role: &str,
    ) -> (OptimisticEditor, Arc<Mutex<Vec<Toast>>>, Subscription) {
        let gateway = Gateway::with_base_url(&server.base_url(), session_as(role)).unwrap();
        let bus = NotificationBus::new();
        let toasts = Arc::new(Mutex::new(Vec::new()));
        let sink = toasts.clone();
        let sub = bus.subscribe(move |t| sink.lock().unwrap().push(t.clone()), |_| {});
        (OptimisticEditor::new(gateway, bus), toasts, sub)
    }

    #[tokio::test]
    async fn failed_status_change_rolls_back_with_one_toast() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/api/issues/BUG-1")
                .json_body_obj(&serde_json::json!({ "status": "Done" }));
            then.status(400)
                .json_body_obj(&serde_json::json!({ "message": "Invalid transition" }));
        });
        let (editor, toasts, _sub) = editor(&server, "sqa");
        let displayed = DisplayedIssue::with_issue(sample_issue("BUG-1", "Open"));

        let err = editor
            .apply(&displayed, FieldEdit::Status("Done".into()))
            .await
            .unwrap_err();

        mock.assert();
        assert!(matches!(err, EditError::Remote(_)));
        assert_eq!(displayed.snapshot().unwrap().status.as_deref(), Some("Open"));
        let toasts = toasts.lock().unwrap();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].kind, ToastKind::Error);
        assert_eq!(toasts[0].title, "Update failed");
        assert_eq!(toasts[0].message.as_deref(), Some("Invalid transition"));
    }

    #[tokio::test]
    async fn successful_edit_keeps_new_value_silently() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/api/issues/BUG-1");
            then.status(200)
                .json_body_obj(&serde_json::json!({ "key": "BUG-1" }));
        });
        let (editor, toasts, _sub) = editor(&server, "admin");
        let displayed = DisplayedIssue::with_issue(sample_issue("BUG-1", "Open"));

        editor
            .apply(&displayed, FieldEdit::Priority(IssuePriority::Highest))
            .await
            .unwrap();

        assert_eq!(
            displayed.snapshot().unwrap().priority,
            Some(IssuePriority::Highest)
        );
        assert!(toasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_edits_on_different_fields_are_independent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT)
                .path("/api/issues/BUG-1")
                .json_body_obj(&serde_json::json!({ "status": "Done" }));
            then.status(500);
        });
        server.mock(|when, then| {
            when.method(PUT)
                .path("/api/issues/BUG-1")
                .json_body_obj(&serde_json::json!({ "priority": "Low" }));
            then.status(200)
                .json_body_obj(&serde_json::json!({ "key": "BUG-1" }));
        });
        let (editor, toasts, _sub) = editor(&server, "sqa");
        let displayed = DisplayedIssue::with_issue(sample_issue("BUG-1", "Open"));

        let (status, priority) = tokio::join!(
            editor.apply(&displayed, FieldEdit::Status("Done".into())),
            editor.apply(&displayed, FieldEdit::Priority(IssuePriority::Low)),
        );

        assert!(status.is_err());
        assert!(priority.is_ok());
        let issue = displayed.snapshot().unwrap();
        assert_eq!(issue.status.as_deref(), Some("Open"));
        assert_eq!(issue.priority, Some(IssuePriority::Low));
        assert_eq!(toasts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poll_landing_mid_flight_survives_a_failed_edit() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/api/issues/BUG-1");
            then.status(500)
                .delay(Duration::from_millis(300))
                .json_body_obj(&serde_json::json!({ "message": "Jira unavailable" }));
        });
        let (editor, toasts, _sub) = editor(&server, "sqa");
        let displayed = DisplayedIssue::with_issue(sample_issue("BUG-1", "Open"));

        let poll = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            displayed.replace(sample_issue("BUG-1", "Done"));
        };
        let (result, ()) = tokio::join!(
            editor.apply(&displayed, FieldEdit::Status("Done".into())),
            poll
        );

        assert!(result.is_err());
        assert_eq!(displayed.snapshot().unwrap().status.as_deref(), Some("Done"));
        let toasts = toasts.lock().unwrap();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].message.as_deref(), Some("Jira unavailable"));
    }

    #[tokio::test]
    async fn plain_users_cannot_edit() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT).path("/api/issues/BUG-1");
            then.status(200);
        });
        let (editor, toasts, _sub) = editor(&server, "user");
        let displayed = DisplayedIssue::with_issue(sample_issue("BUG-1", "Open"));

        let err = editor
            .apply(&displayed, FieldEdit::Status("Done".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, EditError::Forbidden));
        assert_eq!(displayed.snapshot().unwrap().status.as_deref(), Some("Open"));
        assert!(toasts.lock().unwrap().is_empty());
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn blank_summary_is_rejected_before_dispatch() {
        let server = MockServer::start();
        let (editor, _, _sub) = editor(&server, "sqa");
        let displayed = DisplayedIssue::with_issue(sample_issue("BUG-1", "Open"));

        let err = editor
            .apply(&displayed, FieldEdit::Summary("   ".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, EditError::Validation(_)));
        assert_eq!(
            displayed.snapshot().unwrap().summary,
            "Login button unresponsive"
        );
    }
}
