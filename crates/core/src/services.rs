use crate::audio::{AudioClip, CaptureDevice};
use crate::context::{PageSnapshot, Prompt};
use crate::error::{InterviewError, ModelError};
use crate::prompt::PersonalityPolicy;
use crate::shortcut::Shortcut;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Reads the problem page. Best effort: fields the page does not show are empty.
#[cfg_attr(test, automock)]
pub trait PageSnapshotSource: Send + Sync {
    fn snapshot(&self) -> PageSnapshot;
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, InterviewError>;
}

/// The remote conversational model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Cheap reachability check used when a session starts.
    async fn check_ready(&self) -> Result<(), ModelError>;

    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError>;

    /// Streams the reply, calling `on_fragment` for each piece in arrival order, and
    /// returns the full text.
    async fn stream_complete(
        &self,
        prompt: &Prompt,
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ModelError>;
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, InterviewError>;
}

/// Plays a clip to completion.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait SpeechPlayer: Send + Sync {
    async fn play(&self, clip: AudioClip) -> Result<(), InterviewError>;
}

/// User preferences the orchestrator reads. Updates arrive as `Command::UpdateSettings`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub shortcut: Shortcut,
    pub policy: PersonalityPolicy,
    pub stream_replies: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shortcut: Shortcut::platform_default(),
            policy: PersonalityPolicy::default(),
            stream_replies: true,
        }
    }
}

/// Everything outside the core the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub page: Arc<dyn PageSnapshotSource>,
    pub microphone: Arc<dyn CaptureDevice>,
    pub transcriber: Arc<dyn Transcriber>,
    pub model: Arc<dyn ChatModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub player: Arc<dyn SpeechPlayer>,
}
