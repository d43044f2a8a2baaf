//! cpal-backed microphone and speaker for the orchestrator.

use async_trait::async_trait;
use interview_core::{AudioClip, CaptureDevice, InterviewError, MicrophoneHandle, SpeechPlayer};
use interview_native_utils::{CaptureError, InputCapture, PlaybackError, play_blocking};

/// Longest recording kept in memory; older audio is dropped past this.
pub const MAX_RECORDING_SECONDS: usize = 120;

pub struct CpalMicrophone {
    device_name: Option<String>,
    max_seconds: usize,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            max_seconds: MAX_RECORDING_SECONDS,
        }
    }
}

#[async_trait]
impl CaptureDevice for CpalMicrophone {
    async fn open(&self) -> Result<Box<dyn MicrophoneHandle>, InterviewError> {
        let device_name = self.device_name.clone();
        let max_seconds = self.max_seconds;
        let capture = tokio::task::spawn_blocking(move || InputCapture::open(device_name, max_seconds))
            .await
            .map_err(|e| InterviewError::DeviceUnavailable(e.to_string()))?
            .map_err(capture_error)?;
        tracing::info!("Recording at {} Hz", capture.sample_rate());
        Ok(Box::new(CpalHandle { capture }))
    }
}

struct CpalHandle {
    capture: InputCapture,
}

impl MicrophoneHandle for CpalHandle {
    fn drain(&mut self) -> Vec<f32> {
        self.capture.drain()
    }

    fn sample_rate(&self) -> u32 {
        self.capture.sample_rate()
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.capture.is_active())
    }

    fn stop_tracks(&mut self) {
        self.capture.stop();
    }
}

fn capture_error(e: CaptureError) -> InterviewError {
    match e {
        CaptureError::PermissionDenied(message) => InterviewError::PermissionDenied(message),
        CaptureError::Device(e) => InterviewError::DeviceUnavailable(e.to_string()),
        CaptureError::Unavailable(message) | CaptureError::Stream(message) => {
            InterviewError::DeviceUnavailable(message)
        }
    }
}

pub struct CpalSpeaker {
    device_name: Option<String>,
}

impl CpalSpeaker {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl SpeechPlayer for CpalSpeaker {
    async fn play(&self, clip: AudioClip) -> Result<(), InterviewError> {
        let device_name = self.device_name.clone();
        tracing::debug!("Playing {:?} of speech", clip.duration());
        tokio::task::spawn_blocking(move || {
            play_blocking(device_name.as_deref(), &clip.samples, clip.sample_rate)
        })
        .await
        .map_err(|e| InterviewError::Playback(e.to_string()))?
        .map_err(playback_error)
    }
}

fn playback_error(e: PlaybackError) -> InterviewError {
    InterviewError::Playback(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use interview_native_utils::DeviceError;

    #[test]
    fn capture_errors_map_onto_the_interview_taxonomy() {
        assert!(matches!(
            capture_error(CaptureError::PermissionDenied("denied".into())),
            InterviewError::PermissionDenied(m) if m == "denied"
        ));
        assert!(matches!(
            capture_error(CaptureError::Device(DeviceError::NoDefault("input"))),
            InterviewError::DeviceUnavailable(m) if m == "no input device available"
        ));
        assert!(matches!(
            capture_error(CaptureError::Stream("boom".into())),
            InterviewError::DeviceUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn empty_clip_plays_without_a_device() {
        let speaker = CpalSpeaker::new(Some("no such device".to_string()));
        assert!(speaker.play(AudioClip::default()).await.is_ok());
    }
}
