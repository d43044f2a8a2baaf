use crate::audio::{AudioError, resample, shared_buffer};
use crate::device::{DeviceError, get_or_default_output};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Extra time allowed past the clip length before playback is abandoned.
const PLAYBACK_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("output stream error: {0}")]
    Stream(String),
    #[error("playback did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Plays a mono clip on the output device, blocking until every sample has been rendered.
///
/// The stream is built and dropped on the calling thread, so call this from a blocking
/// context (e.g. `tokio::task::spawn_blocking`).
pub fn play_blocking(
    device_name: Option<&str>,
    samples: &[f32],
    sample_rate: u32,
) -> Result<(), PlaybackError> {
    if samples.is_empty() {
        return Ok(());
    }

    let device = get_or_default_output(device_name)?;
    tracing::info!("Using output device: {:?}", device.name());

    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::Stream(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(PlaybackError::Stream(format!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        )));
    }
    let config: StreamConfig = supported.into();
    let channels = config.channels as usize;
    let output_rate = config.sample_rate.0;

    let resampled = resample(samples, sample_rate, output_rate)?;
    if resampled.is_empty() {
        return Ok(());
    }
    let (mut producer, mut consumer) = shared_buffer(resampled.len()).split();
    producer.push_slice(&resampled);

    let drained = Arc::new(AtomicBool::new(false));
    let drained_flag = drained.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = match consumer.try_pop() {
                        Some(s) => s,
                        None => {
                            drained_flag.store(true, Ordering::Release);
                            0.0
                        }
                    };
                    frame.fill(sample);
                }
            },
            |err| tracing::error!("An error occurred on output stream: {}", err),
            None,
        )
        .map_err(|e| PlaybackError::Stream(e.to_string()))?;
    stream
        .play()
        .map_err(|e| PlaybackError::Stream(e.to_string()))?;

    let budget =
        Duration::from_secs_f64(resampled.len() as f64 / output_rate as f64) + PLAYBACK_GRACE;
    let deadline = Instant::now() + budget;
    while !drained.load(Ordering::Acquire) {
        if Instant::now() >= deadline {
            return Err(PlaybackError::TimedOut(budget));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    drop(stream);
    tracing::debug!("Played {} samples at {}hz", resampled.len(), output_rate);
    Ok(())
}
