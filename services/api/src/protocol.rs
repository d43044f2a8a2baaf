//! JSON messages exchanged with the browser overlay.
//!
//! Client messages are tagged with `type` in snake_case, for example
//! `{"type":"submit_text","text":"..."}`. Server messages are [`UiEvent`]s serialized the
//! same way.

use interview_core::{
    Command, KeyEvent, Mode, Modifiers, OutputChannel, PageSnapshot, Revelation, Settings,
    Shortcut, UiEvent,
};
use serde::Deserialize;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start,
    BeginTurn,
    EndTurn,
    SubmitText { text: String },
    KeyDown(KeyPayload),
    KeyUp(KeyPayload),
    Blur,
    VisibilityHidden,
    PageSnapshot(PageSnapshot),
    Settings(SettingsPayload),
    RefreshProblem,
    ClearHistory,
    ShowHistory,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeyPayload {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub repeat: bool,
}

impl KeyPayload {
    fn into_event(self, at: Instant) -> KeyEvent {
        let modifiers = Modifiers {
            ctrl: self.ctrl,
            shift: self.shift,
            alt: self.alt,
            meta: self.meta,
        };
        KeyEvent {
            repeat: self.repeat,
            ..KeyEvent::new(self.key, modifiers, at)
        }
    }
}

/// Partial settings update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsPayload {
    pub shortcut: Option<String>,
    pub mode: Option<Mode>,
    pub revelation: Option<Revelation>,
    pub channel: Option<OutputChannel>,
    pub stream_replies: Option<bool>,
}

impl SettingsPayload {
    /// Applies the update on top of `current`.
    pub fn apply(self, current: &Settings) -> Result<Settings, String> {
        let mut next = current.clone();
        if let Some(shortcut) = self.shortcut {
            next.shortcut = shortcut.parse::<Shortcut>().map_err(|e| e.to_string())?;
        }
        if let Some(mode) = self.mode {
            next.policy.mode = mode;
        }
        if let Some(revelation) = self.revelation {
            next.policy.revelation = revelation;
        }
        if let Some(channel) = self.channel {
            next.policy.channel = channel;
        }
        if let Some(stream_replies) = self.stream_replies {
            next.stream_replies = stream_replies;
        }
        Ok(next)
    }
}

/// What the session should do with one client message.
#[derive(Debug)]
pub enum Action {
    Send(Command),
    UpdatePage(PageSnapshot),
}

pub fn decode(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode(event: &UiEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

impl ClientMessage {
    /// Maps the message onto an orchestrator command. Settings updates are merged into
    /// `settings`, which tracks what the orchestrator was last told.
    pub fn into_action(self, settings: &mut Settings, at: Instant) -> Result<Action, String> {
        let command = match self {
            ClientMessage::Start => Command::Start,
            ClientMessage::BeginTurn => Command::BeginTurn,
            ClientMessage::EndTurn => Command::EndTurn,
            ClientMessage::SubmitText { text } => Command::SubmitText(text),
            ClientMessage::KeyDown(key) => Command::KeyDown(key.into_event(at)),
            ClientMessage::KeyUp(key) => Command::KeyUp(key.into_event(at)),
            ClientMessage::Blur => Command::Blur,
            ClientMessage::VisibilityHidden => Command::VisibilityHidden,
            ClientMessage::PageSnapshot(snapshot) => return Ok(Action::UpdatePage(snapshot)),
            ClientMessage::Settings(update) => {
                *settings = update.apply(settings)?;
                Command::UpdateSettings(settings.clone())
            }
            ClientMessage::RefreshProblem => Command::RefreshProblem,
            ClientMessage::ClearHistory => Command::ClearHistory,
            ClientMessage::ShowHistory => Command::ShowHistory,
        };
        Ok(Action::Send(command))
    }
}
