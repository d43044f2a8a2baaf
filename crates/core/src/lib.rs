pub mod audio;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod services;
pub mod shortcut;
pub mod stream;

#[cfg(test)]
mod testing;

pub use audio::{AudioCapture, AudioClip, CaptureDevice, MicrophoneHandle};
pub use context::{
    ConversationContext, ConversationMessage, PageSnapshot, Prompt, Role, StaticProblemContext,
    TurnContext,
};
pub use error::{InterviewError, ModelError};
pub use orchestrator::{
    Command, LineKind, Orchestrator, OrchestratorHandle, OrchestratorOptions, OrchestratorState,
    Timeouts, UiEvent,
};
pub use prompt::{Mode, OutputChannel, PersonalityPolicy, Revelation};
pub use services::{
    ChatModel, Collaborators, PageSnapshotSource, Settings, SpeechPlayer, SpeechSynthesizer,
    Transcriber,
};
pub use shortcut::{KeyEvent, Modifiers, Shortcut};
