use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ThemePreference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Sqa,
    Admin,
}

/// Roles allowed to edit issue fields and run bulk transitions.
pub const EDITOR_ROLES: [UserRole; 2] = [UserRole::Sqa, UserRole::Admin];

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Sqa => "sqa",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "sqa" => Ok(UserRole::Sqa),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("invalid role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub email_notifications: bool,
    #[serde(default)]
    pub discord_notifications: bool,
    #[serde(default)]
    pub theme: ThemePreference,
}

/// Partial body for `PUT /api/auth/preferences`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PreferencesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discord_notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<ThemePreference>,
}

impl PreferencesUpdate {
    pub fn is_empty(&self) -> bool {
        self == &PreferencesUpdate::default()
    }
}

/// Identity record returned by the identity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub preferences: Option<UserPreferences>,
}

impl AuthUser {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.email)
    }

    pub fn theme(&self) -> ThemePreference {
        self.preferences
            .as_ref()
            .map(|prefs| prefs.theme)
            .unwrap_or_default()
    }

    pub fn has_any_role(&self, roles: &[UserRole]) -> bool {
        roles.contains(&self.role)
    }
}
