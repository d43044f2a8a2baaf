use crate::error::InterviewError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;

/// Mono PCM audio, normalized to [-1.0, 1.0].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// A live microphone. Samples accumulate inside the handle until drained.
#[cfg_attr(test, automock)]
pub trait MicrophoneHandle: Send {
    fn drain(&mut self) -> Vec<f32>;
    fn sample_rate(&self) -> u32;
    /// Number of device tracks still open.
    fn active_tracks(&self) -> usize;
    /// Closes every track. Must tolerate repeated calls.
    fn stop_tracks(&mut self);
}

/// Grants microphone access. Opening may suspend on a permission prompt.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self) -> Result<Box<dyn MicrophoneHandle>, InterviewError>;
}

/// Owns the microphone for the lifetime of one recording.
///
/// The orchestrator decides when recording may start. This type only guarantees that the
/// handle is released exactly when it should be: on `stop`, on `release`, and on drop.
pub struct AudioCapture {
    device: Arc<dyn CaptureDevice>,
    handle: Option<Box<dyn MicrophoneHandle>>,
}

impl AudioCapture {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            handle: None,
        }
    }

    pub async fn start(&mut self) -> Result<(), InterviewError> {
        let handle = self.device.open().await?;
        tracing::debug!("Microphone opened at {} Hz", handle.sample_rate());
        self.handle = Some(handle);
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.handle.is_some()
    }

    /// Finalizes the buffered audio and closes the device. A second call returns an empty
    /// clip.
    pub fn stop(&mut self) -> AudioClip {
        let Some(mut handle) = self.handle.take() else {
            return AudioClip::default();
        };
        let samples = handle.drain();
        let sample_rate = handle.sample_rate();
        handle.stop_tracks();

        let clip = AudioClip::new(samples, sample_rate);
        tracing::debug!("Recording stopped after {:?}", clip.duration());
        clip
    }

    /// Closes the device and discards anything recorded.
    pub fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop_tracks();
            tracing::debug!("Microphone released, partial recording discarded");
        }
    }

    pub fn active_tracks(&self) -> usize {
        self.handle.as_ref().map_or(0, |h| h.active_tracks())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.release();
    }
}
