//! WAV file I/O through `hound`.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::core::types::AudioBuffer;
use crate::error::{HarmonizerError, Result};

/// Sample encoding used when writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WavEncoding {
    /// 32-bit IEEE float.
    #[default]
    Float32,
    /// 16-bit signed PCM.
    Pcm16,
}

/// Reads a WAV file from disk.
///
/// Accepts 32-bit float and 8/16/24/32-bit integer PCM. Integer samples are
/// scaled to `[-1.0, 1.0)`.
pub fn read_wav_file(path: impl AsRef<Path>) -> Result<AudioBuffer> {
    let reader = WavReader::open(path)?;
    read_wav(reader)
}

/// Reads WAV data from any reader.
pub fn read_wav<R: std::io::Read>(reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let data: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => {
            if spec.bits_per_sample != 32 {
                return Err(HarmonizerError::InvalidInput(format!(
                    "unsupported float width: {} bits",
                    spec.bits_per_sample
                )));
            }
            reader.into_samples::<f32>().collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(HarmonizerError::InvalidInput(format!(
                    "unsupported PCM width: {} bits",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| (v as f64 * scale) as f32))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    AudioBuffer::new(data, spec.channels, spec.sample_rate)
}

/// Writes an audio buffer to disk.
pub fn write_wav_file(
    path: impl AsRef<Path>,
    buffer: &AudioBuffer,
    encoding: WavEncoding,
) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: match encoding {
            WavEncoding::Float32 => 32,
            WavEncoding::Pcm16 => 16,
        },
        sample_format: match encoding {
            WavEncoding::Float32 => SampleFormat::Float,
            WavEncoding::Pcm16 => SampleFormat::Int,
        },
    };
    let mut writer = WavWriter::create(path, spec)?;
    match encoding {
        WavEncoding::Float32 => {
            for &s in &buffer.data {
                writer.write_sample(s)?;
            }
        }
        WavEncoding::Pcm16 => {
            for &s in &buffer.data {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                writer.write_sample(v)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}
