use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, ResampleError, Resampler, ResamplerConstructionError};
use std::io::Cursor;

/// Sample rate of the raw PCM returned by the speech endpoint.
pub const SPEECH_PCM16_SAMPLE_RATE: u32 = 24_000;
/// Rate recordings are converted to before upload.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;

const RESAMPLE_CHUNK_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("cannot build resampler: {0}")]
    Resampler(#[from] ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Resample(#[from] ResampleError),
    #[error("cannot encode wav: {0}")]
    Wav(#[from] hound::Error),
    #[error("invalid sample rate: {from} Hz to {to} Hz")]
    InvalidRate { from: u32, to: u32 },
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, ResamplerConstructionError> {
    FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )
}

/// Splits samples into fixed-size chunks, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Converts a whole mono clip from one rate to another.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, AudioError> {
    if from == 0 || to == 0 {
        return Err(AudioError::InvalidRate { from, to });
    }
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let expected = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let mut resampler = create_resampler(from as f64, to as f64, RESAMPLE_CHUNK_SIZE)?;
    let chunk_size = resampler.input_frames_next();

    let mut out = Vec::with_capacity(expected + chunk_size);
    for chunk in split_for_chunks(samples, chunk_size) {
        let frames = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(channel) = frames.first() {
            out.extend_from_slice(channel);
        }
    }
    // The tail is zero padding from the last chunk.
    out.truncate(expected);
    Ok(out)
}

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Averages interleaved frames down to one channel.
pub fn to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Decodes little-endian 16-bit PCM into normalized samples. A trailing odd byte is ignored.
pub fn decode_pcm16_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Encodes a mono clip as an in-memory 16-bit WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
