use crate::orchestrator::OrchestratorState;

/// Failures reported by the remote conversational model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model rate limit reached: {0}")]
    RateLimited(String),
    #[error("model request timed out")]
    Timeout,
    #[error("malformed model response: {0}")]
    Malformed(String),
    #[error("model transport error: {0}")]
    Transport(String),
    /// The stream broke after some text had already arrived.
    #[error("model stream interrupted: {message}")]
    Interrupted { partial: String, message: String },
}

/// Every failure the orchestrator knows how to recover from.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterviewError {
    #[error("Microphone access denied. Please allow microphone access. ({0})")]
    PermissionDenied(String),
    #[error("No microphone available: {0}")]
    DeviceUnavailable(String),
    #[error("Transcription failed: {0}")]
    Transcription(String),
    #[error("{0}")]
    Model(#[from] ModelError),
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),
    #[error("Audio playback failed: {0}")]
    Playback(String),
    #[error("cannot {command} while {state:?}")]
    InvalidTransition {
        state: OrchestratorState,
        command: &'static str,
    },
}

impl InterviewError {
    /// Text that was already shown to the user before the failure, if any.
    pub fn partial_reply(&self) -> Option<&str> {
        match self {
            InterviewError::Model(ModelError::Interrupted { partial, .. })
                if !partial.is_empty() =>
            {
                Some(partial)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, InterviewError>;
