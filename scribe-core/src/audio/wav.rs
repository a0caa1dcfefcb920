//! WAV file decoding into planar `AudioBuffer`s.

use std::io::Read;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use tracing::info;

use super::AudioBuffer;
use crate::error::{Result, ScribeError};

/// Decode a WAV file at `path`.
///
/// Integer PCM (8/16/24/32-bit) is scaled into [-1.0, 1.0]; 32-bit float is
/// passed through. The channel layout and sample rate are kept as-is.
///
/// # Errors
/// `Wav` when hound cannot parse the file, `UnsupportedFormat` for layouts
/// the decoder does not handle.
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let reader = WavReader::open(path)?;
    let buffer = decode(reader)?;
    info!(
        path = %path.display(),
        channels = buffer.channel_count(),
        sample_rate = buffer.sample_rate(),
        duration_secs = format_args!("{:.2}", buffer.duration_secs()),
        "decoded WAV file"
    );
    Ok(buffer)
}

/// Decode WAV data from any reader (e.g. an in-memory upload).
pub fn read_wav_from<R: Read>(source: R) -> Result<AudioBuffer> {
    decode(WavReader::new(source)?)
}

fn decode<R: Read>(reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(ScribeError::UnsupportedFormat("WAV declares zero channels".into()));
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = 1.0 / (1u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
        (format, bits) => {
            return Err(ScribeError::UnsupportedFormat(format!(
                "{bits}-bit {format:?} WAV samples"
            )))
        }
    };

    Ok(AudioBuffer::from_interleaved(
        &interleaved,
        spec.channels as usize,
        spec.sample_rate,
    ))
}
