//! Transient user-facing notifications ("toasts").

mod bus;
mod toast;
mod tray;

pub use bus::{NotificationBus, Subscription};
pub use toast::{Toast, ToastAction, ToastId, ToastKind, ToastSpec, DEFAULT_TOAST_DURATION};
pub use tray::{ToastPhase, ToastTray, EXIT_GRACE};
