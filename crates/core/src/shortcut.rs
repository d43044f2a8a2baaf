//! Push-to-talk shortcut tracking.
//!
//! Key events from every listener feed one `ShortcutTracker`, which reports exactly one
//! `Pressed` per physical press and one matching `Released`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Minimum time between two accepted presses.
pub const RETRIGGER_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
}

/// A key combination such as `cmd+y` or `ctrl+shift+r`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    modifiers: Modifiers,
    key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseShortcutError {
    #[error("shortcut is empty")]
    Empty,
    #[error("shortcut '{0}' has no non-modifier key")]
    MissingKey(String),
    #[error("shortcut '{0}' has more than one non-modifier key")]
    TooManyKeys(String),
}

impl Shortcut {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self {
                modifiers: Modifiers {
                    meta: true,
                    ..Default::default()
                },
                key: "y".to_string(),
            }
        } else {
            Self {
                modifiers: Modifiers {
                    ctrl: true,
                    shift: true,
                    ..Default::default()
                },
                key: "r".to_string(),
            }
        }
    }

    fn matches(&self, event: &KeyEvent) -> bool {
        self.modifiers == event.modifiers && normalize_key(&event.key) == self.key
    }

    fn matches_modifiers(&self, modifiers: &Modifiers) -> bool {
        self.modifiers == *modifiers
    }

    fn involves(&self, key: &str) -> bool {
        match key {
            "ctrl" => self.modifiers.ctrl,
            "shift" => self.modifiers.shift,
            "alt" => self.modifiers.alt,
            "meta" => self.modifiers.meta,
            other => other == self.key,
        }
    }
}

impl Default for Shortcut {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl FromStr for Shortcut {
    type Err = ParseShortcutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseShortcutError::Empty);
        }
        let mut modifiers = Modifiers::default();
        let mut key: Option<String> = None;

        for part in s.split('+').map(normalize_key) {
            match part.as_str() {
                "ctrl" => modifiers.ctrl = true,
                "shift" => modifiers.shift = true,
                "alt" => modifiers.alt = true,
                "meta" => modifiers.meta = true,
                "" => return Err(ParseShortcutError::MissingKey(s.to_string())),
                _ if key.is_some() => return Err(ParseShortcutError::TooManyKeys(s.to_string())),
                _ => key = Some(part),
            }
        }

        let key = key.ok_or_else(|| ParseShortcutError::MissingKey(s.to_string()))?;
        Ok(Self { modifiers, key })
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.modifiers.meta {
            parts.push(if cfg!(target_os = "macos") { "Cmd" } else { "Meta" }.to_string());
        }
        if self.modifiers.ctrl {
            parts.push("Ctrl".to_string());
        }
        if self.modifiers.alt {
            parts.push("Alt".to_string());
        }
        if self.modifiers.shift {
            parts.push("Shift".to_string());
        }
        parts.push(self.key.to_uppercase());
        write!(f, "{}", parts.join("+"))
    }
}

fn normalize_key(raw: &str) -> String {
    let key = raw.trim().to_lowercase();
    match key.as_str() {
        "control" | "ctl" => "ctrl".to_string(),
        "cmd" | "command" | "os" | "super" | "win" => "meta".to_string(),
        "option" | "opt" => "alt".to_string(),
        _ => key,
    }
}

/// One keyboard event with the modifier state at the time it fired.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    pub key: String,
    pub modifiers: Modifiers,
    /// Auto-repeat flag reported by the platform.
    pub repeat: bool,
    pub at: Instant,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>, modifiers: Modifiers, at: Instant) -> Self {
        Self {
            key: key.into(),
            modifiers,
            repeat: false,
            at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutSignal {
    Pressed,
    Released,
}

#[derive(Debug)]
pub struct ShortcutTracker {
    shortcut: Shortcut,
    held: bool,
    last_trigger: Option<Instant>,
}

impl ShortcutTracker {
    pub fn new(shortcut: Shortcut) -> Self {
        Self {
            shortcut,
            held: false,
            last_trigger: None,
        }
    }

    pub fn shortcut(&self) -> &Shortcut {
        &self.shortcut
    }

    /// Swaps the combination. A hold in progress still gets its release.
    pub fn set_shortcut(&mut self, shortcut: Shortcut) {
        self.shortcut = shortcut;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn on_key_down(&mut self, event: &KeyEvent) -> Option<ShortcutSignal> {
        if event.repeat || self.held || !self.shortcut.matches(event) {
            return None;
        }
        if let Some(last) = self.last_trigger {
            if event.at.saturating_duration_since(last) < RETRIGGER_INTERVAL {
                tracing::debug!("Shortcut press throttled");
                return None;
            }
        }
        self.held = true;
        self.last_trigger = Some(event.at);
        Some(ShortcutSignal::Pressed)
    }

    pub fn on_key_up(&mut self, event: &KeyEvent) -> Option<ShortcutSignal> {
        if !self.held {
            return None;
        }
        let released_part = self.shortcut.involves(&normalize_key(&event.key));
        if released_part || !self.shortcut.matches_modifiers(&event.modifiers) {
            self.held = false;
            return Some(ShortcutSignal::Released);
        }
        None
    }

    /// Focus loss ends a hold because the key-up will never be delivered.
    pub fn on_blur(&mut self) -> Option<ShortcutSignal> {
        if std::mem::take(&mut self.held) {
            Some(ShortcutSignal::Released)
        } else {
            None
        }
    }
}
