//! Microphone recording on a dedicated thread.
//!
//! `cpal::Stream` cannot leave the thread that built it, so the stream lives on its own
//! thread and samples cross over through a ring buffer. The returned [`InputCapture`] is
//! `Send` and can be owned by async code.

use crate::audio::{shared_buffer, to_mono};
use crate::device::{DeviceError, get_or_default_input};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd};
use std::sync::mpsc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("microphone unavailable: {0}")]
    Unavailable(String),
    #[error("input stream error: {0}")]
    Stream(String),
}

type Ready = Result<(u32, HeapCons<f32>), CaptureError>;

pub struct InputCapture {
    consumer: HeapCons<f32>,
    sample_rate: u32,
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl InputCapture {
    /// Opens the input device and starts recording. Blocks until the stream is running or
    /// has failed to start. At most `max_seconds` of audio are kept.
    pub fn open(device_name: Option<String>, max_seconds: usize) -> Result<Self, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Ready>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let worker = std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || run_input_stream(device_name, max_seconds, ready_tx, stop_rx))
            .map_err(|e| CaptureError::Stream(format!("cannot spawn capture thread: {e}")))?;

        let (sample_rate, consumer) = ready_rx
            .recv()
            .map_err(|_| CaptureError::Stream("capture thread exited before starting".to_string()))??;

        Ok(Self {
            consumer,
            sample_rate,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// Takes every sample recorded since the last drain.
    pub fn drain(&mut self) -> Vec<f32> {
        self.consumer.pop_iter().collect()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_active(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Closes the stream and waits for the capture thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for InputCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_input_stream(
    device_name: Option<String>,
    max_seconds: usize,
    ready: mpsc::Sender<Ready>,
    stop: mpsc::Receiver<()>,
) {
    let stream = match build_stream(device_name.as_deref(), max_seconds) {
        Ok((stream, sample_rate, consumer)) => {
            if ready.send(Ok((sample_rate, consumer))).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Returns on stop() or when the owner is dropped.
    let _ = stop.recv();
    drop(stream);
    tracing::debug!("Input stream closed");
}

fn build_stream(
    device_name: Option<&str>,
    max_seconds: usize,
) -> Result<(cpal::Stream, u32, HeapCons<f32>), CaptureError> {
    let device = get_or_default_input(device_name)?;
    tracing::info!("Using input device: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|e| classify(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    tracing::debug!("Input stream config: {:?}", &config);

    let (mut producer, consumer) = shared_buffer(sample_rate as usize * max_seconds.max(1)).split();
    let err_fn = |err: cpal::StreamError| tracing::error!("An error occurred on input stream: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push_mono(&mut producer, data, channels);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| *s as f32 / 32768.0).collect();
                push_mono(&mut producer, &samples, channels);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Stream(format!(
                "unsupported input sample format {other:?}"
            )));
        }
    }
    .map_err(|e| classify(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    Ok((stream, sample_rate, consumer))
}

fn push_mono(producer: &mut HeapProd<f32>, data: &[f32], channels: usize) {
    let mono = to_mono(data, channels);
    let pushed = producer.push_slice(&mono);
    if pushed < mono.len() {
        tracing::trace!("Recording buffer full, dropped {} samples", mono.len() - pushed);
    }
}

// cpal reports permission problems only through backend-specific messages.
fn classify(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("not allowed") || lower.contains("denied") {
        CaptureError::PermissionDenied(message)
    } else if lower.contains("not available") || lower.contains("no longer available") {
        CaptureError::Unavailable(message)
    } else {
        CaptureError::Stream(message)
    }
}
