use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Light,
    Dark,
    #[default]
    System,
}

impl ThemePreference {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
            ThemePreference::System => "system",
        }
    }
}

impl fmt::Display for ThemePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(ThemePreference::Light),
            "dark" => Ok(ThemePreference::Dark),
            "system" => Ok(ThemePreference::System),
            other => Err(format!("invalid theme '{other}'")),
        }
    }
}

/// Concrete scheme applied to the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScheme {
    Light,
    Dark,
}

type ApplyFn = Box<dyn FnMut(ColorScheme) + Send>;

/// Resolves the effective scheme and pushes it to the display surface.
///
/// The surface callback only runs when the effective scheme actually changes,
/// so it can be invoked after every session commit without flicker.
pub struct ThemeController {
    preference: ThemePreference,
    os_scheme: ColorScheme,
    applied: Option<ColorScheme>,
    apply: ApplyFn,
}

impl ThemeController {
    pub fn new<F>(os_scheme: ColorScheme, apply: F) -> Self
    where
        F: FnMut(ColorScheme) + Send + 'static,
    {
        Self {
            preference: ThemePreference::System,
            os_scheme,
            applied: None,
            apply: Box::new(apply),
        }
    }

    /// Controller with no display surface attached.
    pub fn detached() -> Self {
        Self::new(ColorScheme::Light, |_| {})
    }

    pub fn preference(&self) -> ThemePreference {
        self.preference
    }

    pub fn applied(&self) -> Option<ColorScheme> {
        self.applied
    }

    pub fn effective(&self) -> ColorScheme {
        match self.preference {
            ThemePreference::Light => ColorScheme::Light,
            ThemePreference::Dark => ColorScheme::Dark,
            ThemePreference::System => self.os_scheme,
        }
    }

    pub fn set_preference(&mut self, preference: ThemePreference) {
        self.preference = preference;
        self.reapply();
    }

    /// OS-level scheme changed; only matters while following the system.
    pub fn set_os_scheme(&mut self, scheme: ColorScheme) {
        self.os_scheme = scheme;
        if self.preference == ThemePreference::System {
            self.reapply();
        }
    }

    fn reapply(&mut self) {
        let effective = self.effective();
        if self.applied != Some(effective) {
            (self.apply)(effective);
            self.applied = Some(effective);
        }
    }
}

impl fmt::Debug for ThemeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThemeController")
            .field("preference", &self.preference)
            .field("os_scheme", &self.os_scheme)
            .field("applied", &self.applied)
            .finish_non_exhaustive()
    }
}
