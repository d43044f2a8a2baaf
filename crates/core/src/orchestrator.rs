//! The interview turn state machine.
//!
//! One `Orchestrator` exists per mounted overlay. UI commands arrive through an
//! [`OrchestratorHandle`]; long-running work (connection check, transcription, model reply,
//! speech) runs in spawned tasks that post their results back into the same loop, tagged
//! with the turn they belong to. Everything that touches state runs on that loop, so the
//! state machine itself needs no locks.

use crate::audio::{AudioCapture, AudioClip};
use crate::context::{
    ConversationContext, ConversationMessage, DEFAULT_HISTORY_WINDOW, Prompt, TurnContext,
};
use crate::error::{InterviewError, ModelError};
use crate::prompt::OutputChannel;
use crate::services::{ChatModel, Collaborators, Settings, SpeechPlayer, SpeechSynthesizer};
use crate::shortcut::{KeyEvent, ShortcutSignal, ShortcutTracker};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Shown and recorded when the model returns nothing.
pub const FALLBACK_REPLY: &str = "I understand. Please continue.";

const DESCRIPTION_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    AwaitingConnection,
    Listening,
    Transcribing,
    AwaitingReply,
    Speaking,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    User,
    Notice,
    Error,
}

/// Everything the UI needs to render the overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    State { state: OrchestratorState },
    Line { kind: LineKind, text: String },
    /// An assistant reply is about to stream in.
    StreamStarted,
    Fragment { text: String },
    /// Final assistant text. On failure this is whatever arrived before the error.
    StreamEnded { text: String },
    TextInput { visible: bool },
    Prompt {
        system_prompt: String,
        user_message: String,
    },
    History { messages: Vec<ConversationMessage> },
}

#[derive(Debug, Clone)]
pub enum Command {
    /// Connects without starting a turn.
    Start,
    BeginTurn,
    EndTurn,
    SubmitText(String),
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
    Blur,
    VisibilityHidden,
    UpdateSettings(Settings),
    RefreshProblem,
    ClearHistory,
    ShowHistory,
    Shutdown,
}

/// Results posted back by spawned work.
#[derive(Debug)]
enum TaskEvent {
    Connected(Result<(), InterviewError>),
    Transcribed {
        turn: u64,
        result: Result<String, InterviewError>,
    },
    Fragment {
        turn: u64,
        text: String,
    },
    ReplyFinished {
        turn: u64,
        result: Result<String, InterviewError>,
    },
    SpeechFinished {
        turn: u64,
        result: Result<(), InterviewError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connection {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
enum PendingAction {
    BeginTurn,
    SubmitText(String),
}

#[derive(Debug)]
struct ActiveTurn {
    turn_context: TurnContext,
    utterance: String,
    channel: OutputChannel,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub transcription: Duration,
    /// Longest the model may go without producing text. Covers the whole request when
    /// replies are not streamed.
    pub reply_idle: Duration,
    pub synthesis: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            transcription: Duration::from_secs(30),
            reply_idle: Duration::from_secs(30),
            synthesis: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    pub history_window: usize,
    pub timeouts: Timeouts,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            timeouts: Timeouts::default(),
        }
    }
}

/// Cloneable sender for UI commands. Dropping every handle shuts the orchestrator down.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    /// Returns false once the orchestrator has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn begin_turn(&self) -> bool {
        self.send(Command::BeginTurn)
    }

    pub fn end_turn(&self) -> bool {
        self.send(Command::EndTurn)
    }

    pub fn submit_text(&self, text: impl Into<String>) -> bool {
        self.send(Command::SubmitText(text.into()))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

pub struct Orchestrator {
    state: OrchestratorState,
    connection: Connection,
    pending: Option<PendingAction>,
    active: Option<ActiveTurn>,
    /// Bumped for every new turn and every failure; completions from older turns are stale.
    generation: u64,
    text_input_visible: bool,
    context: ConversationContext,
    capture: AudioCapture,
    shortcut: ShortcutTracker,
    settings: Settings,
    collaborators: Collaborators,
    timeouts: Timeouts,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    events_rx: mpsc::UnboundedReceiver<TaskEvent>,
    ui: mpsc::UnboundedSender<UiEvent>,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        settings: Settings,
        options: OrchestratorOptions,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> (Self, OrchestratorHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            state: OrchestratorState::Idle,
            connection: Connection::Disconnected,
            pending: None,
            active: None,
            generation: 0,
            text_input_visible: false,
            context: ConversationContext::new(options.history_window),
            capture: AudioCapture::new(collaborators.microphone.clone()),
            shortcut: ShortcutTracker::new(settings.shortcut.clone()),
            settings,
            collaborators,
            timeouts: options.timeouts,
            commands,
            events_tx,
            events_rx,
            ui,
        };
        (orchestrator, OrchestratorHandle { commands: commands_tx })
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn active_tracks(&self) -> usize {
        self.capture.active_tracks()
    }

    /// Processes commands until `Shutdown` or until every handle is dropped, then tears
    /// down and hands the orchestrator back.
    pub async fn run(mut self) -> Self {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }
        self.teardown();
        self
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                if self.connection == Connection::Disconnected && self.state == OrchestratorState::Idle {
                    self.connect();
                }
            }
            Command::BeginTurn => self.begin_turn().await,
            Command::EndTurn => self.end_turn(),
            Command::SubmitText(text) => self.submit_text(text),
            Command::KeyDown(event) => {
                if self.shortcut.on_key_down(&event) == Some(ShortcutSignal::Pressed) {
                    self.begin_turn().await;
                }
            }
            Command::KeyUp(event) => {
                if self.shortcut.on_key_up(&event) == Some(ShortcutSignal::Released) {
                    self.end_turn();
                }
            }
            Command::Blur | Command::VisibilityHidden => self.on_focus_lost(),
            Command::UpdateSettings(settings) => self.apply_settings(settings),
            Command::RefreshProblem => self.refresh_problem(),
            Command::ClearHistory => {
                self.context.clear_history();
                self.emit_line(LineKind::Notice, "Conversation history cleared.");
            }
            Command::ShowHistory => self.emit(UiEvent::History {
                messages: self.context.history().to_vec(),
            }),
            Command::Shutdown => {}
        }
    }

    async fn handle_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Connected(result) => self.on_connected(result).await,
            TaskEvent::Transcribed { turn, result } => {
                if self.is_current(turn, OrchestratorState::Transcribing) {
                    self.on_transcribed(result);
                }
            }
            TaskEvent::Fragment { turn, text } => {
                if self.is_current(turn, OrchestratorState::AwaitingReply) {
                    self.emit(UiEvent::Fragment { text });
                }
            }
            TaskEvent::ReplyFinished { turn, result } => {
                if self.is_current(turn, OrchestratorState::AwaitingReply) {
                    self.on_reply_finished(result);
                }
            }
            TaskEvent::SpeechFinished { turn, result } => {
                if self.is_current(turn, OrchestratorState::Speaking) {
                    self.on_speech_finished(result);
                }
            }
        }
    }

    fn is_current(&self, turn: u64, expected: OrchestratorState) -> bool {
        let current = turn == self.generation && self.state == expected;
        if !current {
            tracing::debug!("Dropping stale completion for turn {turn} in {:?}", self.state);
        }
        current
    }

    /// Returns true when connected. Otherwise queues `action` (at most one) and starts the
    /// connection if needed.
    fn ensure_connected(&mut self, action: PendingAction, command: &'static str) -> bool {
        match self.connection {
            Connection::Connected => true,
            Connection::Connecting => {
                if self.pending.is_none() {
                    tracing::debug!("Queued {action:?} until the session is connected");
                    self.pending = Some(action);
                } else {
                    self.reject(command);
                }
                false
            }
            Connection::Disconnected => {
                if self.state == OrchestratorState::Idle {
                    self.pending = Some(action);
                    self.connect();
                } else {
                    self.reject(command);
                }
                false
            }
        }
    }

    fn connect(&mut self) {
        self.connection = Connection::Connecting;
        self.set_state(OrchestratorState::AwaitingConnection);
        tracing::info!("Starting interview session");

        let model = self.collaborators.model.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = model.check_ready().await.map_err(InterviewError::from);
            let _ = events.send(TaskEvent::Connected(result));
        });
    }

    async fn on_connected(&mut self, result: Result<(), InterviewError>) {
        if let Err(e) = result {
            self.connection = Connection::Disconnected;
            self.pending = None;
            self.fail(e);
            return;
        }

        self.connection = Connection::Connected;
        let snapshot = self.collaborators.page.snapshot();
        if snapshot.title.trim().is_empty() {
            tracing::warn!("No problem detected on the page, using the generic prompt");
        } else {
            self.context.set_static_context(snapshot.problem());
        }
        let notice = self.ready_notice();
        self.emit_line(LineKind::Notice, notice);
        self.set_state(OrchestratorState::Idle);

        match self.pending.take() {
            Some(PendingAction::BeginTurn) => self.begin_turn().await,
            Some(PendingAction::SubmitText(text)) => self.submit_text(text),
            None => {}
        }
    }

    async fn begin_turn(&mut self) {
        if !self.ensure_connected(PendingAction::BeginTurn, "begin-turn") {
            return;
        }
        if self.state != OrchestratorState::Idle {
            self.reject("begin-turn");
            return;
        }
        match self.settings.policy.channel {
            OutputChannel::Text => self.set_text_input(true),
            OutputChannel::Voice => self.start_listening().await,
        }
    }

    async fn start_listening(&mut self) {
        self.generation += 1;
        if let Err(e) = self.capture.start().await {
            self.fail(e);
            return;
        }
        let snapshot = self.collaborators.page.snapshot();
        self.active = Some(ActiveTurn {
            turn_context: TurnContext::from_snapshot(&snapshot),
            utterance: String::new(),
            channel: self.settings.policy.channel,
        });
        self.set_state(OrchestratorState::Listening);
    }

    fn end_turn(&mut self) {
        match self.state {
            OrchestratorState::Listening => self.finish_listening(),
            OrchestratorState::AwaitingConnection => {
                if self.pending.take().is_some() {
                    tracing::debug!("Released before the session connected, pending turn cancelled");
                }
            }
            OrchestratorState::Idle if self.text_input_visible => self.set_text_input(false),
            _ => self.reject("end-turn"),
        }
    }

    /// Stops the microphone and hands whatever was recorded to transcription.
    fn finish_listening(&mut self) {
        let clip = self.capture.stop();
        self.set_state(OrchestratorState::Transcribing);
        if clip.is_empty() {
            self.fail(InterviewError::Transcription("no audio was captured".to_string()));
            return;
        }
        tracing::debug!("Transcribing {:?} of audio", clip.duration());

        let turn = self.generation;
        let transcriber = self.collaborators.transcriber.clone();
        let limit = self.timeouts.transcription;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, transcriber.transcribe(&clip)).await {
                Ok(result) => result,
                Err(_) => Err(InterviewError::Transcription(format!(
                    "timed out after {limit:?}"
                ))),
            };
            let _ = events.send(TaskEvent::Transcribed { turn, result });
        });
    }

    fn on_transcribed(&mut self, result: Result<String, InterviewError>) {
        let text = match result {
            Ok(text) if text.trim().is_empty() => {
                self.fail(InterviewError::Transcription("no speech detected".to_string()));
                return;
            }
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        tracing::info!("Transcribed: {text}");
        self.emit_line(LineKind::User, text.clone());
        if let Some(active) = self.active.as_mut() {
            active.utterance = text;
        }
        self.request_reply();
    }

    fn submit_text(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        if !self.ensure_connected(PendingAction::SubmitText(text.clone()), "submit-text") {
            return;
        }
        if self.state != OrchestratorState::Idle {
            self.reject("submit-text");
            return;
        }

        self.set_text_input(false);
        self.generation += 1;
        let snapshot = self.collaborators.page.snapshot();
        self.active = Some(ActiveTurn {
            turn_context: TurnContext::from_snapshot(&snapshot),
            utterance: text.clone(),
            channel: self.settings.policy.channel,
        });
        self.emit_line(LineKind::User, text);
        self.request_reply();
    }

    fn request_reply(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let mut policy = self.settings.policy;
        policy.channel = active.channel;
        let prompt = self
            .context
            .build_prompt(&active.utterance, &active.turn_context, &policy);
        tracing::debug!(
            system_prompt = %prompt.system_prompt,
            user_message = %prompt.full_user_message,
            history = prompt.history.len(),
            "Prompt built"
        );
        self.emit(UiEvent::Prompt {
            system_prompt: prompt.system_prompt.clone(),
            user_message: prompt.full_user_message.clone(),
        });
        self.set_state(OrchestratorState::AwaitingReply);
        self.emit(UiEvent::StreamStarted);

        let turn = self.generation;
        let stream = self.settings.stream_replies;
        let model = self.collaborators.model.clone();
        let idle = self.timeouts.reply_idle;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = if stream {
                stream_reply(model.as_ref(), &prompt, idle, |text| {
                    let _ = events.send(TaskEvent::Fragment { turn, text });
                })
                .await
            } else {
                match tokio::time::timeout(idle, model.complete(&prompt)).await {
                    Ok(result) => result.inspect(|reply| {
                        if !reply.is_empty() {
                            let _ = events.send(TaskEvent::Fragment {
                                turn,
                                text: reply.clone(),
                            });
                        }
                    }),
                    Err(_) => Err(ModelError::Timeout),
                }
            };
            let _ = events.send(TaskEvent::ReplyFinished {
                turn,
                result: result.map_err(InterviewError::from),
            });
        });
    }

    fn on_reply_finished(&mut self, result: Result<String, InterviewError>) {
        let reply = match result {
            Ok(reply) if reply.trim().is_empty() => {
                self.emit(UiEvent::Fragment {
                    text: FALLBACK_REPLY.to_string(),
                });
                FALLBACK_REPLY.to_string()
            }
            Ok(reply) => reply,
            Err(e) => {
                let partial = e.partial_reply().unwrap_or_default().to_string();
                self.emit(UiEvent::StreamEnded { text: partial });
                self.fail(e);
                return;
            }
        };
        self.emit(UiEvent::StreamEnded {
            text: reply.clone(),
        });

        let Some(active) = self.active.take() else {
            return;
        };
        self.context.record_turn(&active.utterance, &reply);
        match active.channel {
            OutputChannel::Voice => self.speak(reply),
            OutputChannel::Text => self.set_state(OrchestratorState::Idle),
        }
    }

    fn speak(&mut self, reply: String) {
        self.set_state(OrchestratorState::Speaking);

        let turn = self.generation;
        let synthesizer = self.collaborators.synthesizer.clone();
        let player = self.collaborators.player.clone();
        let limit = self.timeouts.synthesis;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = synthesize_and_play(synthesizer, player, reply, limit).await;
            let _ = events.send(TaskEvent::SpeechFinished { turn, result });
        });
    }

    fn on_speech_finished(&mut self, result: Result<(), InterviewError>) {
        match result {
            Ok(()) => self.set_state(OrchestratorState::Idle),
            Err(InterviewError::Playback(message)) => {
                tracing::warn!("Playback failed, reply was already shown: {message}");
                self.set_state(OrchestratorState::Idle);
            }
            Err(e) => self.fail(e),
        }
    }

    /// Blur and tab hide both end a hold whose key-up will never arrive.
    fn on_focus_lost(&mut self) {
        self.shortcut.on_blur();
        match self.state {
            OrchestratorState::Listening => self.finish_listening(),
            OrchestratorState::AwaitingConnection => {
                if self.pending.take().is_some() {
                    tracing::debug!("Focus lost before the session connected, pending turn cancelled");
                }
            }
            _ => {}
        }
        if self.text_input_visible {
            self.set_text_input(false);
        }
    }

    fn apply_settings(&mut self, settings: Settings) {
        if settings.shortcut != *self.shortcut.shortcut() {
            self.shortcut.set_shortcut(settings.shortcut.clone());
        }
        if settings.policy.channel == OutputChannel::Voice && self.text_input_visible {
            self.set_text_input(false);
        }
        tracing::info!(
            "Settings updated: {:?} mode, {} channel, {:?} revelation, shortcut {}",
            settings.policy.mode,
            settings.policy.channel,
            settings.policy.revelation,
            settings.shortcut
        );
        self.settings = settings;
    }

    fn refresh_problem(&mut self) {
        let snapshot = self.collaborators.page.snapshot();
        if snapshot.title.trim().is_empty() {
            self.emit_line(LineKind::Notice, "No problem detected on this page.");
            return;
        }
        let title = snapshot.title.clone();
        let notice = if self.context.refresh_static_context(snapshot.problem()) {
            format!("New problem detected: {title}. Conversation history cleared.")
        } else {
            format!("Problem details refreshed for {title}.")
        };
        self.emit_line(LineKind::Notice, notice);
    }

    /// Converts a failure into one transcript line and returns to `Idle`.
    fn fail(&mut self, error: InterviewError) {
        if let InterviewError::InvalidTransition { command, .. } = error {
            self.reject(command);
            return;
        }
        tracing::error!("Turn failed while {:?}: {error}", self.state);
        self.capture.release();
        self.active = None;
        self.generation += 1;
        self.emit_line(LineKind::Error, format!("Error: {error}"));
        self.set_state(OrchestratorState::Error);
        self.set_state(OrchestratorState::Idle);
    }

    /// Commands that race the state machine are dropped, not surfaced.
    fn reject(&self, command: &'static str) {
        let error = InterviewError::InvalidTransition {
            state: self.state,
            command,
        };
        tracing::debug!("Ignoring command: {error}");
    }

    fn teardown(&mut self) {
        self.capture.release();
        self.pending = None;
        self.active = None;
        tracing::info!("Interview overlay torn down");
    }

    fn ready_notice(&self) -> String {
        let shortcut = self.shortcut.shortcut();
        let instructions = match self.settings.policy.channel {
            OutputChannel::Voice => format!("Hold {shortcut} to talk and release it to send."),
            OutputChannel::Text => {
                format!("Hold {shortcut} to open the text box, then type your message.")
            }
        };
        let Some(problem) = self.context.static_context() else {
            return format!(
                "Ready for interview! No problem was detected on this page, so the \
                 conversation will stay general.\n\n{instructions}"
            );
        };

        let mut description: String = problem
            .description
            .chars()
            .take(DESCRIPTION_PREVIEW_CHARS)
            .collect();
        if problem.description.chars().count() > DESCRIPTION_PREVIEW_CHARS {
            description.push_str("...");
        }
        format!(
            "Ready for interview!\n\nProblem: {}\nDescription: {}\nTopics: {}\nHints: {}\n\n{}",
            problem.title,
            description,
            non_empty_or(&problem.topics, "None"),
            non_empty_or(&problem.hints, "None"),
            instructions
        )
    }

    fn set_state(&mut self, next: OrchestratorState) {
        if self.state == next {
            return;
        }
        tracing::debug!("State {:?} -> {:?}", self.state, next);
        self.state = next;
        self.emit(UiEvent::State { state: next });
    }

    fn set_text_input(&mut self, visible: bool) {
        if self.text_input_visible != visible {
            self.text_input_visible = visible;
            self.emit(UiEvent::TextInput { visible });
        }
    }

    fn emit_line(&self, kind: LineKind, text: impl Into<String>) {
        self.emit(UiEvent::Line {
            kind,
            text: text.into(),
        });
    }

    fn emit(&self, event: UiEvent) {
        if self.ui.send(event).is_err() {
            tracing::trace!("UI receiver dropped");
        }
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// Streams a reply, forwarding fragments in order. The request is abandoned once the
/// model has been silent for `idle`; text already forwarded travels in the error.
async fn stream_reply(
    model: &dyn ChatModel,
    prompt: &Prompt,
    idle: Duration,
    mut forward: impl FnMut(String),
) -> Result<String, ModelError> {
    let (fragment_tx, mut fragment_rx) = mpsc::unbounded_channel::<String>();
    let mut on_fragment = |text: &str| {
        let _ = fragment_tx.send(text.to_string());
    };
    let request = model.stream_complete(prompt, &mut on_fragment);
    tokio::pin!(request);

    let mut partial = String::new();
    loop {
        tokio::select! {
            biased;
            result = &mut request => {
                while let Ok(text) = fragment_rx.try_recv() {
                    forward(text);
                }
                return result;
            }
            next = tokio::time::timeout(idle, fragment_rx.recv()) => match next {
                Ok(Some(text)) => {
                    partial.push_str(&text);
                    forward(text);
                }
                // The sender lives as long as the request, which has not finished.
                Ok(None) => {}
                Err(_) if partial.is_empty() => return Err(ModelError::Timeout),
                Err(_) => {
                    return Err(ModelError::Interrupted {
                        partial,
                        message: format!("no data for {idle:?}"),
                    });
                }
            },
        }
    }
}

async fn synthesize_and_play(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: Arc<dyn SpeechPlayer>,
    text: String,
    limit: Duration,
) -> Result<(), InterviewError> {
    let clip: AudioClip = match tokio::time::timeout(limit, synthesizer.synthesize(&text)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(InterviewError::Synthesis(format!(
                "timed out after {}s",
                limit.as_secs()
            )));
        }
    };
    player.play(clip).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PageSnapshot, Role};
    use crate::prompt::PersonalityPolicy;
    use crate::services::{
        MockSpeechPlayer, MockSpeechSynthesizer, MockTranscriber, Transcriber,
    };
    use crate::shortcut::Modifiers;
    use crate::testing::{FakeMicrophone, FakePage, ScriptedModel, Step};
    use std::time::Instant;
    use tokio::sync::Notify;
    use tokio::task::JoinHandle;

    struct Harness {
        handle: OrchestratorHandle,
        ui: mpsc::UnboundedReceiver<UiEvent>,
        task: JoinHandle<Orchestrator>,
    }

    impl Harness {
        fn spawn(collaborators: Collaborators, settings: Settings) -> Self {
            Self::spawn_with(collaborators, settings, OrchestratorOptions::default())
        }

        fn spawn_with(
            collaborators: Collaborators,
            settings: Settings,
            options: OrchestratorOptions,
        ) -> Self {
            let (ui_tx, ui) = mpsc::unbounded_channel();
            let (orchestrator, handle) = Orchestrator::new(collaborators, settings, options, ui_tx);
            let task = tokio::spawn(orchestrator.run());
            Self { handle, ui, task }
        }

        /// Collects UI events up to and including the first one matching `done`.
        async fn wait_for(&mut self, done: impl Fn(&UiEvent) -> bool) -> Vec<UiEvent> {
            let mut seen = Vec::new();
            loop {
                let event = tokio::time::timeout(Duration::from_secs(5), self.ui.recv())
                    .await
                    .expect("timed out waiting for a UI event")
                    .expect("UI channel closed");
                let matched = done(&event);
                seen.push(event);
                if matched {
                    return seen;
                }
            }
        }

        async fn wait_for_state(&mut self, state: OrchestratorState) -> Vec<UiEvent> {
            self.wait_for(|e| *e == UiEvent::State { state }).await
        }

        async fn connect(&mut self) {
            self.handle.send(Command::Start);
            self.wait_for_state(OrchestratorState::Idle).await;
        }

        async fn finish(self) -> Orchestrator {
            self.handle.shutdown();
            self.task.await.unwrap()
        }
    }

    fn states(events: &[UiEvent]) -> Vec<OrchestratorState> {
        events
            .iter()
            .filter_map(|e| match e {
                UiEvent::State { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn error_lines(events: &[UiEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                UiEvent::Line {
                    kind: LineKind::Error,
                    text,
                } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn two_sum_page() -> Arc<FakePage> {
        Arc::new(FakePage::new(PageSnapshot {
            title: "Two Sum".to_string(),
            description: "Return indices of the two numbers that add up to target.".to_string(),
            topics: "Array, Hash Table".to_string(),
            ..Default::default()
        }))
    }

    fn transcriber_saying(text: &'static str) -> MockTranscriber {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(move |_| Box::pin(async move { Ok(text.to_string()) }));
        transcriber
    }

    fn silent_speech() -> (MockSpeechSynthesizer, MockSpeechPlayer) {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .returning(|_| Box::pin(async move { Ok(AudioClip::new(vec![0.0; 240], 24_000)) }));
        let mut player = MockSpeechPlayer::new();
        player
            .expect_play()
            .returning(|_| Box::pin(async move { Ok(()) }));
        (synthesizer, player)
    }

    fn collaborators(
        page: Arc<FakePage>,
        microphone: Arc<FakeMicrophone>,
        transcriber: impl Transcriber + 'static,
        model: Arc<ScriptedModel>,
    ) -> Collaborators {
        let (synthesizer, player) = silent_speech();
        Collaborators {
            page,
            microphone,
            transcriber: Arc::new(transcriber),
            model,
            synthesizer: Arc::new(synthesizer),
            player: Arc::new(player),
        }
    }

    fn mic() -> Arc<FakeMicrophone> {
        Arc::new(FakeMicrophone::with_samples(vec![0.1; 1600], 16_000))
    }

    fn text_settings() -> Settings {
        Settings {
            policy: PersonalityPolicy {
                channel: OutputChannel::Text,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn cmd_y() -> Settings {
        Settings {
            shortcut: "cmd+y".parse().unwrap(),
            ..Default::default()
        }
    }

    fn cmd() -> Modifiers {
        Modifiers {
            meta: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn two_sum_voice_turn_records_history_and_returns_to_idle() {
        // Arrange
        let mic = mic();
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Good, what's ", "the complexity?"])]));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic.clone(), transcriber_saying("I'll use a hash map"), model.clone()),
            Settings::default(),
        );
        harness.connect().await;

        // Act
        harness.handle.begin_turn();
        harness.wait_for_state(OrchestratorState::Listening).await;
        harness.handle.end_turn();
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        // Assert
        assert_eq!(
            states(&events),
            vec![
                OrchestratorState::Transcribing,
                OrchestratorState::AwaitingReply,
                OrchestratorState::Speaking,
                OrchestratorState::Idle,
            ]
        );
        let fragments: String = events
            .iter()
            .filter_map(|e| match e {
                UiEvent::Fragment { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert!(events.contains(&UiEvent::StreamEnded {
            text: fragments.clone()
        }));
        assert_eq!(fragments, "Good, what's the complexity?");

        let orchestrator = harness.finish().await;
        let history = orchestrator.context().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role(), Role::User);
        assert_eq!(history[0].content(), "I'll use a hash map");
        assert_eq!(history[1].role(), Role::Assistant);
        assert_eq!(history[1].content(), "Good, what's the complexity?");
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);
        assert_eq!(mic.open_tracks(), 0);
        assert!(model.prompts()[0].system_prompt.contains("- Problem: Two Sum"));
    }

    #[tokio::test]
    async fn double_key_down_within_100ms_starts_one_recording() {
        let mic = mic();
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .returning(|_| Box::pin(async move { Ok("hello".to_string()) }));
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Hi there."])]));
        let mut harness = Harness::spawn(collaborators(two_sum_page(), mic.clone(), transcriber, model), cmd_y());
        harness.connect().await;

        let t0 = Instant::now();
        harness.handle.send(Command::KeyDown(KeyEvent::new("y", cmd(), t0)));
        harness.handle.send(Command::KeyDown(KeyEvent::new(
            "y",
            cmd(),
            t0 + Duration::from_millis(100),
        )));
        harness.handle.send(Command::KeyUp(KeyEvent::new(
            "y",
            cmd(),
            t0 + Duration::from_millis(900),
        )));
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        let listening = states(&events)
            .into_iter()
            .filter(|s| *s == OrchestratorState::Listening)
            .count();
        assert_eq!(listening, 1);
        assert_eq!(mic.opens(), 1);
        harness.finish().await;
    }

    #[tokio::test]
    async fn reply_failure_adds_one_error_line_and_keeps_history_clean() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ModelError::Status {
            status: 500,
            body: "internal error".to_string(),
        })]));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic(), MockTranscriber::new(), model),
            text_settings(),
        );
        harness.connect().await;

        harness.handle.submit_text("Is a hash map fine?");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        let errors = error_lines(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Error: "));
        assert!(errors[0].contains("500"));
        assert_eq!(
            states(&events),
            vec![
                OrchestratorState::AwaitingReply,
                OrchestratorState::Error,
                OrchestratorState::Idle,
            ]
        );
        let orchestrator = harness.finish().await;
        assert!(orchestrator.context().history().is_empty());
    }

    fn short_timeouts(timeouts: Timeouts) -> OrchestratorOptions {
        OrchestratorOptions {
            timeouts,
            ..Default::default()
        }
    }

    fn parts(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn interrupted_stream_shows_partial_text_and_keeps_history_clean() {
        let model = Arc::new(ScriptedModel::from_steps(vec![Step::Interrupt(parts(&[
            "Good, ", "what is",
        ]))]));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic(), MockTranscriber::new(), model),
            text_settings(),
        );
        harness.connect().await;

        harness.handle.submit_text("Is a hash map fine?");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        assert!(events.contains(&UiEvent::StreamEnded {
            text: "Good, what is".to_string()
        }));
        let errors = error_lines(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("interrupted"));
        assert_eq!(
            states(&events),
            vec![
                OrchestratorState::AwaitingReply,
                OrchestratorState::Error,
                OrchestratorState::Idle,
            ]
        );
        let orchestrator = harness.finish().await;
        assert!(orchestrator.context().history().is_empty());
    }

    #[tokio::test]
    async fn stalled_stream_gives_up_and_accepts_the_next_turn() {
        let model = Arc::new(ScriptedModel::from_steps(vec![
            Step::Stall(parts(&["Let me "])),
            Step::Reply(parts(&["Sure."])),
        ]));
        let options = short_timeouts(Timeouts {
            reply_idle: Duration::from_millis(50),
            ..Default::default()
        });
        let mut harness = Harness::spawn_with(
            collaborators(two_sum_page(), mic(), MockTranscriber::new(), model),
            text_settings(),
            options,
        );
        harness.connect().await;

        harness.handle.submit_text("hello");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;
        assert!(events.contains(&UiEvent::StreamEnded {
            text: "Let me ".to_string()
        }));
        assert_eq!(error_lines(&events).len(), 1);

        harness.handle.submit_text("again");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;
        assert!(error_lines(&events).is_empty());

        let orchestrator = harness.finish().await;
        let history: Vec<&str> = orchestrator
            .context()
            .history()
            .iter()
            .map(|m| m.content())
            .collect();
        assert_eq!(history, vec!["again", "Sure."]);
    }

    #[tokio::test]
    async fn stalled_plain_reply_times_out() {
        let model = Arc::new(ScriptedModel::from_steps(vec![Step::Stall(Vec::new())]));
        let options = short_timeouts(Timeouts {
            reply_idle: Duration::from_millis(50),
            ..Default::default()
        });
        let settings = Settings {
            stream_replies: false,
            ..text_settings()
        };
        let mut harness = Harness::spawn_with(
            collaborators(two_sum_page(), mic(), MockTranscriber::new(), model),
            settings,
            options,
        );
        harness.connect().await;

        harness.handle.submit_text("hello");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        let errors = error_lines(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("timed out"));
        assert!(events.contains(&UiEvent::StreamEnded {
            text: String::new()
        }));
        harness.finish().await;
    }

    #[tokio::test]
    async fn transcription_timeout_returns_to_idle() {
        let mic = mic();
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Box::pin(std::future::pending::<Result<String, InterviewError>>()));
        let model = Arc::new(ScriptedModel::new(Vec::new()));
        let options = short_timeouts(Timeouts {
            transcription: Duration::from_millis(50),
            ..Default::default()
        });
        let mut harness = Harness::spawn_with(
            collaborators(two_sum_page(), mic.clone(), transcriber, model.clone()),
            Settings::default(),
            options,
        );
        harness.connect().await;

        harness.handle.begin_turn();
        harness.wait_for_state(OrchestratorState::Listening).await;
        harness.handle.end_turn();
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        assert_eq!(
            states(&events),
            vec![
                OrchestratorState::Transcribing,
                OrchestratorState::Error,
                OrchestratorState::Idle,
            ]
        );
        let errors = error_lines(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("timed out"));
        assert!(model.prompts().is_empty());
        assert_eq!(mic.open_tracks(), 0);
        harness.finish().await;
    }

    #[tokio::test]
    async fn begin_turn_before_connection_is_queued_once() {
        let gate = Arc::new(Notify::new());
        let mic = mic();
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Go on."])]).gated(gate.clone()));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic.clone(), transcriber_saying("start"), model),
            Settings::default(),
        );

        harness.handle.begin_turn();
        harness.wait_for_state(OrchestratorState::AwaitingConnection).await;
        harness.handle.begin_turn();
        harness.handle.begin_turn();
        gate.notify_one();

        let events = harness.wait_for_state(OrchestratorState::Listening).await;
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::Line { kind: LineKind::Notice, text } if text.starts_with("Ready for interview!")
        )));
        assert_eq!(mic.opens(), 1);

        harness.handle.end_turn();
        harness.wait_for_state(OrchestratorState::Idle).await;
        let orchestrator = harness.finish().await;
        assert_eq!(orchestrator.context().history().len(), 2);
        assert_eq!(mic.opens(), 1);
    }

    #[tokio::test]
    async fn release_before_connection_cancels_the_pending_turn() {
        let gate = Arc::new(Notify::new());
        let mic = mic();
        let model = Arc::new(ScriptedModel::new(vec![]).gated(gate.clone()));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic.clone(), MockTranscriber::new(), model),
            Settings::default(),
        );

        harness.handle.begin_turn();
        harness.wait_for_state(OrchestratorState::AwaitingConnection).await;
        harness.handle.end_turn();
        gate.notify_one();
        harness.wait_for_state(OrchestratorState::Idle).await;

        let orchestrator = harness.finish().await;
        assert_eq!(mic.opens(), 0);
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn blur_while_listening_transcribes_the_partial_clip() {
        let mic = mic();
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .returning(|clip| {
                let samples = clip.samples.len();
                Box::pin(async move {
                    assert_eq!(samples, 1600);
                    Ok("partial thought".to_string())
                })
            });
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Keep going."])]));
        let mut harness =
            Harness::spawn(collaborators(two_sum_page(), mic.clone(), transcriber, model), Settings::default());
        harness.connect().await;

        harness.handle.begin_turn();
        harness.wait_for_state(OrchestratorState::Listening).await;
        harness.handle.send(Command::Blur);
        let events = harness.wait_for(|e| *e == UiEvent::State { state: OrchestratorState::Transcribing }).await;
        assert_eq!(mic.open_tracks(), 0);
        assert!(!events.is_empty());

        harness.wait_for_state(OrchestratorState::Idle).await;
        let orchestrator = harness.finish().await;
        assert_eq!(orchestrator.context().history()[0].content(), "partial thought");
    }

    #[tokio::test]
    async fn teardown_while_listening_releases_the_microphone() {
        let mic = mic();
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().never();
        let model = Arc::new(ScriptedModel::new(vec![]));
        let mut harness =
            Harness::spawn(collaborators(two_sum_page(), mic.clone(), transcriber, model), Settings::default());
        harness.connect().await;

        harness.handle.begin_turn();
        harness.wait_for_state(OrchestratorState::Listening).await;
        assert_eq!(mic.open_tracks(), 1);

        let orchestrator = harness.finish().await;
        assert_eq!(mic.open_tracks(), 0);
        assert_eq!(orchestrator.active_tracks(), 0);
        assert!(orchestrator.context().history().is_empty());
    }

    #[tokio::test]
    async fn each_turn_reads_a_fresh_page_snapshot() {
        let page = two_sum_page();
        page.set_code("def two_sum(nums, target):\n    pass");
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["First."]), Ok(vec!["Second."])]));
        let mut harness = Harness::spawn(
            collaborators(page.clone(), mic(), MockTranscriber::new(), model.clone()),
            text_settings(),
        );
        harness.connect().await;

        harness.handle.submit_text("first try");
        harness.wait_for_state(OrchestratorState::Idle).await;
        page.set_code("def two_sum(nums, target):\n    seen = {}");
        harness.handle.submit_text("second try");
        harness.wait_for_state(OrchestratorState::Idle).await;

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].full_user_message.contains(" 2:     pass"));
        assert!(prompts[1].full_user_message.contains(" 2:     seen = {}"));
        assert!(!prompts[1].full_user_message.contains("pass"));
        // The second prompt carries the first turn as history.
        assert_eq!(prompts[1].history.len(), 2);
        harness.finish().await;
    }

    #[tokio::test]
    async fn second_submit_while_awaiting_reply_is_ignored() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Only one."])]));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic(), MockTranscriber::new(), model.clone()),
            text_settings(),
        );
        harness.connect().await;

        harness.handle.submit_text("one");
        harness.handle.submit_text("two");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        assert!(error_lines(&events).is_empty());
        assert_eq!(model.prompts().len(), 1);
        let orchestrator = harness.finish().await;
        assert_eq!(orchestrator.context().history().len(), 2);
    }

    #[tokio::test]
    async fn permission_denied_returns_to_idle_with_an_error_line() {
        let mic = Arc::new(FakeMicrophone::failing(InterviewError::PermissionDenied(
            "NotAllowedError".to_string(),
        )));
        let model = Arc::new(ScriptedModel::new(vec![]));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic.clone(), MockTranscriber::new(), model),
            Settings::default(),
        );
        harness.connect().await;

        harness.handle.begin_turn();
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        let errors = error_lines(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Microphone access denied"));
        assert_eq!(states(&events), vec![OrchestratorState::Error, OrchestratorState::Idle]);
        assert_eq!(mic.open_tracks(), 0);
        harness.finish().await;
    }

    #[tokio::test]
    async fn text_channel_shortcut_toggles_the_input() {
        let mic = mic();
        let mut settings = text_settings();
        settings.shortcut = "cmd+y".parse().unwrap();
        let model = Arc::new(ScriptedModel::new(vec![]));
        let mut harness =
            Harness::spawn(collaborators(two_sum_page(), mic.clone(), MockTranscriber::new(), model), settings);
        harness.connect().await;

        let t0 = Instant::now();
        harness.handle.send(Command::KeyDown(KeyEvent::new("y", cmd(), t0)));
        harness.wait_for(|e| *e == UiEvent::TextInput { visible: true }).await;
        harness.handle.send(Command::KeyUp(KeyEvent::new("Meta", Modifiers::default(), t0)));
        harness.wait_for(|e| *e == UiEvent::TextInput { visible: false }).await;

        let orchestrator = harness.finish().await;
        assert_eq!(mic.opens(), 0);
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn empty_non_streamed_reply_falls_back() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec![""])]));
        let mut settings = text_settings();
        settings.stream_replies = false;
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic(), MockTranscriber::new(), model),
            settings,
        );
        harness.connect().await;

        harness.handle.submit_text("hmm");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        assert!(events.contains(&UiEvent::Fragment {
            text: FALLBACK_REPLY.to_string()
        }));
        assert!(events.contains(&UiEvent::StreamEnded {
            text: FALLBACK_REPLY.to_string()
        }));
        let orchestrator = harness.finish().await;
        assert_eq!(orchestrator.context().history()[1].content(), FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn synthesis_failure_keeps_the_recorded_turn() {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer.expect_synthesize().returning(|_| {
            Box::pin(async move { Err(InterviewError::Synthesis("status 503".to_string())) })
        });
        let mut player = MockSpeechPlayer::new();
        player.expect_play().never();
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Nice."])]));
        let mut collab = collaborators(two_sum_page(), mic(), MockTranscriber::new(), model);
        collab.synthesizer = Arc::new(synthesizer);
        collab.player = Arc::new(player);
        let mut harness = Harness::spawn(collab, Settings::default());
        harness.connect().await;

        harness.handle.submit_text("done");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        let errors = error_lines(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Speech synthesis failed"));
        let orchestrator = harness.finish().await;
        assert_eq!(orchestrator.context().history().len(), 2);
    }

    #[tokio::test]
    async fn playback_failure_is_not_reported_as_an_error() {
        let mut player = MockSpeechPlayer::new();
        player.expect_play().times(1).returning(|_| {
            Box::pin(async move { Err(InterviewError::Playback("device lost".to_string())) })
        });
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Nice."])]));
        let mut collab = collaborators(two_sum_page(), mic(), MockTranscriber::new(), model);
        collab.player = Arc::new(player);
        let mut harness = Harness::spawn(collab, Settings::default());
        harness.connect().await;

        harness.handle.submit_text("done");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        assert!(error_lines(&events).is_empty());
        assert_eq!(
            states(&events),
            vec![
                OrchestratorState::AwaitingReply,
                OrchestratorState::Speaking,
                OrchestratorState::Idle,
            ]
        );
        harness.finish().await;
    }

    #[tokio::test]
    async fn blank_transcription_is_a_transcription_error() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic(), transcriber_saying("   "), model.clone()),
            Settings::default(),
        );
        harness.connect().await;

        harness.handle.begin_turn();
        harness.wait_for_state(OrchestratorState::Listening).await;
        harness.handle.end_turn();
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        let errors = error_lines(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Transcription failed"));
        assert!(model.prompts().is_empty());
        harness.finish().await;
    }

    #[tokio::test]
    async fn refresh_and_clear_manage_history() {
        let page = two_sum_page();
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Sure."])]));
        let mut harness = Harness::spawn(
            collaborators(page.clone(), mic(), MockTranscriber::new(), model),
            text_settings(),
        );
        harness.connect().await;
        harness.handle.submit_text("hi");
        harness.wait_for_state(OrchestratorState::Idle).await;

        harness.handle.send(Command::RefreshProblem);
        let events = harness
            .wait_for(|e| matches!(e, UiEvent::Line { kind: LineKind::Notice, .. }))
            .await;
        assert!(matches!(
            events.last(),
            Some(UiEvent::Line { text, .. }) if text.starts_with("Problem details refreshed")
        ));

        harness.handle.send(Command::ShowHistory);
        let events = harness
            .wait_for(|e| matches!(e, UiEvent::History { .. }))
            .await;
        let Some(UiEvent::History { messages }) = events.last() else {
            panic!("expected a history event");
        };
        let contents: Vec<&str> = messages.iter().map(|m| m.content()).collect();
        assert_eq!(contents, vec!["hi", "Sure."]);

        harness.handle.send(Command::ClearHistory);
        harness
            .wait_for(|e| matches!(e, UiEvent::Line { kind: LineKind::Notice, .. }))
            .await;
        let orchestrator = harness.finish().await;
        assert!(orchestrator.context().history().is_empty());
        assert_eq!(
            orchestrator.context().static_context().map(|p| p.title.as_str()),
            Some("Two Sum")
        );
    }

    #[tokio::test]
    async fn settings_update_applies_to_the_next_turn() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(vec!["Plain."])]));
        let mut harness = Harness::spawn(
            collaborators(two_sum_page(), mic(), MockTranscriber::new(), model.clone()),
            Settings::default(),
        );
        harness.connect().await;

        harness.handle.send(Command::UpdateSettings(text_settings()));
        harness.handle.submit_text("show me");
        let events = harness.wait_for_state(OrchestratorState::Idle).await;

        // Text channel replies are not spoken.
        assert!(!states(&events).contains(&OrchestratorState::Speaking));
        assert!(model.prompts()[0].system_prompt.contains("```python"));
        let orchestrator = harness.finish().await;
        assert_eq!(orchestrator.settings().policy.channel, OutputChannel::Text);
    }
}
