//! Waveform extraction from source record values
//!
//! Accepted shapes for the audio column:
//!
//! - an array of numbers (samples)
//! - an object with an `array` field, optionally with `sampling_rate`/`path`
//! - an object with only a `path` field, or a plain string path, to a WAV file
//!
//! WAV files are decoded with `hound`. Integer PCM is normalised to [-1, 1]
//! and multi-channel audio is averaged down to mono.
//!
//! Every waveform leaves here at the model's sample rate. WAV headers and
//! `sampling_rate` fields that differ are resampled with `rubato`; a bare
//! sample array carries no rate and is taken to be at the model rate already.

use crate::error::{PipelineError, Result};
use hound::{SampleFormat, WavReader};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Extract mono f32 samples at `sample_rate` Hz from an audio column value
pub fn decode_audio(value: &Value, base_dir: Option<&Path>, sample_rate: u32) -> Result<Vec<f32>> {
    match value {
        Value::Array(samples) => samples_from_array(samples),
        Value::Object(obj) => {
            if let Some(array) = obj.get("array") {
                let Value::Array(samples) = array else {
                    return Err(PipelineError::Audio(format!(
                        "'array' must be a list of samples, got {}",
                        value_kind(array)
                    )));
                };
                let samples = samples_from_array(samples)?;
                match obj.get("sampling_rate") {
                    None | Some(Value::Null) => Ok(samples),
                    Some(rate) => {
                        let rate = rate
                            .as_u64()
                            .and_then(|r| u32::try_from(r).ok())
                            .ok_or_else(|| {
                                PipelineError::Audio(format!("invalid sampling_rate {}", rate))
                            })?;
                        resample(samples, rate, sample_rate)
                    }
                }
            } else if let Some(Value::String(path)) = obj.get("path") {
                load_wav(&resolve(path, base_dir), sample_rate)
            } else {
                Err(PipelineError::Audio(
                    "audio object has neither 'array' nor 'path'".to_string(),
                ))
            }
        }
        Value::String(path) => load_wav(&resolve(path, base_dir), sample_rate),
        other => Err(PipelineError::Audio(format!(
            "unsupported audio value type: {}",
            value_kind(other)
        ))),
    }
}

fn load_wav(path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
    let (samples, rate) = read_wav(path)?;
    resample(samples, rate, sample_rate)
}

/// Resample mono audio from `from_rate` to `to_rate`
///
/// Returns the input untouched when the rates already match.
pub fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(PipelineError::Audio(format!(
            "cannot resample from {} Hz to {} Hz",
            from_rate, to_rate
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }

    tracing::trace!(
        "Resampling {} samples from {} Hz to {} Hz",
        samples.len(),
        from_rate,
        to_rate
    );

    // One chunk covering the whole clip
    let mut resampler = FastFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        samples.len(),
        1,
    )
    .map_err(|e| PipelineError::Audio(format!("Failed to create resampler: {}", e)))?;

    let output = resampler
        .process(&[samples], None)
        .map_err(|e| PipelineError::Audio(format!("Resampling failed: {}", e)))?;
    Ok(output.into_iter().next().unwrap_or_default())
}

fn samples_from_array(samples: &[Value]) -> Result<Vec<f32>> {
    samples
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().map(|s| s as f32).ok_or_else(|| {
                PipelineError::Audio(format!("sample {} is not a number", i))
            })
        })
        .collect()
}

fn resolve(path: &str, base_dir: Option<&Path>) -> PathBuf {
    let path = Path::new(path);
    match base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode a WAV file to mono f32 samples and its native sample rate
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path)
        .map_err(|e| PipelineError::Audio(format!("Failed to open {:?}: {}", path, e)))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok((downmix(&interleaved, spec.channels as usize), spec.sample_rate))
}

/// Average interleaved channels into one
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use serde_json::json;

    const RATE: u32 = 22050;

    fn assert_len_near(samples: &[f32], expected: usize) {
        let diff = samples.len().abs_diff(expected);
        assert!(diff <= 16, "expected ~{} samples, got {}", expected, samples.len());
    }

    fn one_second(rate: u32) -> Vec<f32> {
        (0..rate)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_decode_array() {
        let samples = decode_audio(&json!([0.0, 0.5, -0.5]), None, RATE).unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn test_decode_hf_style_object() {
        let value = json!({"array": [0.25, 0.75], "sampling_rate": 22050});
        assert_eq!(decode_audio(&value, None, RATE).unwrap(), vec![0.25, 0.75]);
    }

    #[test]
    fn test_decode_rejects_bad_values() {
        assert!(decode_audio(&json!(null), None, RATE).is_err());
        assert!(decode_audio(&json!([0.1, "x"]), None, RATE).is_err());
        assert!(decode_audio(&json!({"sampling_rate": 16000}), None, RATE).is_err());
        assert!(decode_audio(&json!({"array": [0.1], "sampling_rate": "fast"}), None, RATE).is_err());
    }

    #[test]
    fn test_16khz_array_is_upsampled() {
        let value = json!({"array": one_second(16000), "sampling_rate": 16000});
        let samples = decode_audio(&value, None, RATE).unwrap();
        assert_len_near(&samples, 22050);
    }

    #[test]
    fn test_44khz_array_is_downsampled() {
        let value = json!({"array": one_second(44100), "sampling_rate": 44100});
        let samples = decode_audio(&value, None, RATE).unwrap();
        assert_len_near(&samples, 22050);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(input.clone(), RATE, RATE).unwrap(), input);
        assert!(resample(input, 0, RATE).is_err());
    }

    #[test]
    fn test_wav_header_rate_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(dir.path().join("16k.wav"), spec).unwrap();
        for s in one_second(16000) {
            writer.write_sample((s * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let samples = decode_audio(&json!({"path": "16k.wav"}), Some(dir.path()), RATE).unwrap();
        assert_len_near(&samples, 22050);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn test_read_int16_wav_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(dir.path().join("clip.wav"), spec).unwrap();
        writer.write_sample(16384i16).unwrap();
        writer.write_sample(-32768i16).unwrap();
        writer.finalize().unwrap();

        let samples = decode_audio(&json!("clip.wav"), Some(dir.path()), RATE).unwrap();
        assert_eq!(samples, vec![0.5, -1.0]);
        assert_eq!(read_wav(dir.path().join("clip.wav")).unwrap().1, 22050);
    }

    #[test]
    fn test_missing_wav_is_audio_error() {
        let err = read_wav("/nonexistent/clip.wav").unwrap_err();
        assert!(matches!(err, PipelineError::Audio(_)));
    }
}
