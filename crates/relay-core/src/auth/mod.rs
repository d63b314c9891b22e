mod error;
mod session;
mod storage;
mod theme;
mod user;

pub use error::AuthError;
pub use session::{Session, SessionHandle, SessionPhase, SessionStore};
pub use storage::{ClientStorage, FileStorage, MemoryStorage};
pub use theme::{ColorScheme, ThemeController, ThemePreference};
pub use user::{AuthUser, PreferencesUpdate, UserPreferences, UserRole, EDITOR_ROLES};
