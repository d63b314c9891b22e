use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::config::{THEME_STORAGE_KEY, TOKEN_STORAGE_KEY};
use crate::gateway::Gateway;

use super::{
    AuthError, AuthUser, ClientStorage, ColorScheme, PreferencesUpdate, ThemeController,
    ThemePreference, UserPreferences, UserRole,
};

/// Pairing of a bearer token with the user record it was validated against.
///
/// `user` is only ever set together with `token`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<AuthUser>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.user.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Ready,
}

struct SessionState {
    session: Session,
    phase: SessionPhase,
}

struct Inner {
    state: RwLock<SessionState>,
    storage: Box<dyn ClientStorage>,
    theme: Mutex<ThemeController>,
}

/// Shared, cheaply cloned view of the current session.
///
/// Every outbound request reads the token from here at send time. Writes go
/// through [`SessionStore`] or the gateway's 401 handling.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    pub fn new<S>(storage: S) -> Self
    where
        S: ClientStorage + 'static,
    {
        Self::with_theme(storage, ThemeController::detached())
    }

    pub fn with_theme<S>(storage: S, theme: ThemeController) -> Self
    where
        S: ClientStorage + 'static,
    {
        let handle = Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionState {
                    session: Session::default(),
                    phase: SessionPhase::Loading,
                }),
                storage: Box::new(storage),
                theme: Mutex::new(theme),
            }),
        };
        handle.apply_theme();
        handle
    }

    pub fn snapshot(&self) -> Session {
        self.read(|state| state.session.clone())
    }

    pub fn token(&self) -> Option<String> {
        self.read(|state| state.session.token.clone())
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.read(|state| state.session.user.clone())
    }

    pub fn phase(&self) -> SessionPhase {
        self.read(|state| state.phase)
    }

    pub fn is_loading(&self) -> bool {
        self.phase() == SessionPhase::Loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|state| state.session.is_authenticated())
    }

    /// False when anonymous.
    pub fn has_role(&self, roles: &[UserRole]) -> bool {
        self.read(|state| {
            state
                .session
                .user
                .as_ref()
                .is_some_and(|user| user.has_any_role(roles))
        })
    }

    pub fn effective_theme(&self) -> ColorScheme {
        self.theme().effective()
    }

    /// Forward an OS colour-scheme change to the theme controller.
    pub fn set_os_scheme(&self, scheme: ColorScheme) {
        self.theme().set_os_scheme(scheme);
    }

    /// Drop the session if it still carries `token`, clearing the persisted copy.
    pub fn expire_if_current(&self, token: &str) -> bool {
        let expired = self.write(|state| {
            if state.session.token.as_deref() != Some(token) {
                return false;
            }
            state.session = Session::default();
            state.phase = SessionPhase::Ready;
            true
        });
        if expired {
            tracing::info!("session rejected by server; signing out locally");
            self.forget_persisted_token();
            self.apply_theme();
        }
        expired
    }

    pub(crate) fn commit(&self, token: Option<String>, user: Option<AuthUser>) {
        let user = token.as_ref().and(user);
        self.write(|state| {
            state.session = Session { token, user };
            state.phase = SessionPhase::Ready;
        });
        self.apply_theme();
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.write(|state| state.phase = phase);
    }

    pub(crate) fn storage(&self) -> &dyn ClientStorage {
        self.inner.storage.as_ref()
    }

    fn forget_persisted_token(&self) {
        if let Err(err) = self.storage().remove(TOKEN_STORAGE_KEY) {
            tracing::warn!(error = %err, "failed to clear persisted token");
        }
    }

    fn stored_theme(&self) -> ThemePreference {
        match self.storage().get(THEME_STORAGE_KEY) {
            Ok(Some(raw)) => raw.parse().unwrap_or_default(),
            Ok(None) => ThemePreference::System,
            Err(err) => {
                tracing::debug!(error = %err, "unable to read stored theme");
                ThemePreference::System
            }
        }
    }

    /// Re-resolve the theme against the committed session.
    fn apply_theme(&self) {
        let preference = match self.user() {
            Some(user) => user.theme(),
            None => self.stored_theme(),
        };
        self.theme().set_preference(preference);
    }

    fn theme(&self) -> MutexGuard<'_, ThemeController> {
        self.inner
            .theme
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(&SessionState) -> T) -> T {
        let guard = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut guard = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("phase", &self.phase())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

/// Owns the session lifecycle: restore, sign in, sign out, refresh.
#[derive(Debug, Clone)]
pub struct SessionStore {
    session: SessionHandle,
    gateway: Gateway,
}

impl SessionStore {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            session: gateway.session().clone(),
            gateway,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn has_role(&self, roles: &[UserRole]) -> bool {
        self.session.has_role(roles)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Restore the persisted token and validate it with one identity check.
    ///
    /// Always ends in [`SessionPhase::Ready`], authenticated or anonymous.
    pub async fn initialize(&self) -> Session {
        self.session.set_phase(SessionPhase::Loading);

        let stored = match self.session.storage().get(TOKEN_STORAGE_KEY) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "unable to read persisted token");
                None
            }
        };

        let Some(token) = stored else {
            self.session.commit(None, None);
            return self.session.snapshot();
        };

        match self.gateway.me(&token).await {
            Ok(user) => {
                tracing::info!(user = %user.email, role = %user.role, "session restored");
                self.session.commit(Some(token), Some(user));
            }
            Err(err) => {
                tracing::info!(error = %err, "stored token rejected; continuing anonymously");
                self.session.forget_persisted_token();
                self.session.commit(None, None);
            }
        }
        self.session.snapshot()
    }

    /// Persist an externally obtained credential and validate it.
    ///
    /// On failure the credential is discarded; no token is left without a user.
    pub async fn sign_in(&self, credential: &str) -> Result<AuthUser, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::EmptyCredential);
        }

        self.session.set_phase(SessionPhase::Loading);
        if let Err(err) = self.session.storage().set(TOKEN_STORAGE_KEY, credential) {
            self.session.set_phase(SessionPhase::Ready);
            return Err(err);
        }

        match self.gateway.me(credential).await {
            Ok(user) => {
                tracing::info!(user = %user.email, role = %user.role, "signed in");
                self.session
                    .commit(Some(credential.to_owned()), Some(user.clone()));
                Ok(user)
            }
            Err(err) => {
                self.session.forget_persisted_token();
                self.session.commit(None, None);
                Err(AuthError::SignIn(err))
            }
        }
    }

    /// Clear the local session; the remote logout notice is best-effort.
    pub async fn sign_out(&self) {
        if let Some(token) = self.session.token() {
            if let Err(err) = self.gateway.logout(&token).await {
                tracing::warn!(error = %err, "logout notification failed");
            }
        }
        self.session.forget_persisted_token();
        self.session.commit(None, None);
        tracing::info!("signed out");
    }

    /// Re-fetch the user record for the current token.
    pub async fn refresh_user(&self) -> Result<AuthUser, AuthError> {
        let token = self.session.token().ok_or(AuthError::NotAuthenticated)?;
        let user = self.gateway.me(&token).await.map_err(|err| {
            if err.is_unauthorized() {
                self.session.expire_if_current(&token);
            }
            AuthError::Gateway(err)
        })?;
        if self.session.token().as_deref() == Some(token.as_str()) {
            self.session.commit(Some(token), Some(user.clone()));
        }
        Ok(user)
    }

    /// Update server-side preferences and fold the result into the session user.
    pub async fn update_preferences(
        &self,
        update: &PreferencesUpdate,
    ) -> Result<UserPreferences, AuthError> {
        let token = self.session.token().ok_or(AuthError::NotAuthenticated)?;
        let preferences = self.gateway.update_preferences(update).await?;
        if let Some(mut user) = self.session.user() {
            if self.session.token().as_deref() == Some(token.as_str()) {
                user.preferences = Some(preferences.clone());
                self.session.commit(Some(token), Some(user));
            }
        }
        Ok(preferences)
    }

    /// Persist the theme used while signed out (or before preferences load).
    pub fn set_local_theme(&self, preference: ThemePreference) -> Result<(), AuthError> {
        self.session
            .storage()
            .set(THEME_STORAGE_KEY, preference.as_str())?;
        if self.session.user().is_none() {
            self.session.apply_theme();
        }
        Ok(())
    }

    pub fn os_scheme_changed(&self, scheme: ColorScheme) {
        self.session.set_os_scheme(scheme);
    }
}
