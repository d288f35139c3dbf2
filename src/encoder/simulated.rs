//! Simulated encoder devices
//!
//! Produces deterministic tokens from the waveform so that runs can be
//! checked end to end without an accelerator. Each frame of `frame_size`
//! samples yields one token per layer, derived from the frame's mean
//! absolute amplitude.

use super::{AudioEncoder, EncodedAudio, EncoderBackend, TokenTensor};
use crate::error::{PipelineError, Result};
use crate::types::LAYER_COUNT;

/// Token vocabulary size per layer
pub const SIMULATED_CODEBOOK_SIZE: i64 = 4032;

/// Backend exposing `devices` simulated devices
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    devices: usize,
    frame_size: usize,
}

impl SimulatedBackend {
    pub fn new(devices: usize, frame_size: usize) -> Self {
        Self {
            devices,
            frame_size: frame_size.max(1),
        }
    }
}

impl EncoderBackend for SimulatedBackend {
    fn device_count(&self) -> usize {
        self.devices
    }

    fn load(&self, device: usize, model_id: &str) -> Result<Box<dyn AudioEncoder>> {
        if device >= self.devices {
            return Err(PipelineError::Encode(format!(
                "device {} does not exist ({} simulated)",
                device, self.devices
            )));
        }
        tracing::debug!("Simulated device {} loaded model {}", device, model_id);
        Ok(Box::new(SimulatedEncoder {
            device,
            frame_size: self.frame_size,
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// One simulated device
#[derive(Debug, Clone)]
pub struct SimulatedEncoder {
    device: usize,
    frame_size: usize,
}

impl SimulatedEncoder {
    pub fn device(&self) -> usize {
        self.device
    }

    fn frame_token(frame: &[f32], layer: usize) -> i64 {
        let mean_abs = frame.iter().map(|s| s.abs()).sum::<f32>() / frame.len() as f32;
        let level = (mean_abs.clamp(0.0, 1.0) * 1000.0) as i64;
        (level * (layer as i64 + 1) + layer as i64) % SIMULATED_CODEBOOK_SIZE
    }
}

impl AudioEncoder for SimulatedEncoder {
    fn encode(&mut self, waveform: &[f32]) -> Result<EncodedAudio> {
        if waveform.is_empty() {
            return Err(PipelineError::Encode("empty waveform".to_string()));
        }
        if waveform.iter().any(|s| !s.is_finite()) {
            return Err(PipelineError::Encode("waveform contains non-finite samples".to_string()));
        }

        let frames: Vec<&[f32]> = waveform.chunks(self.frame_size).collect();
        let layers = (0..LAYER_COUNT)
            .map(|layer| TokenTensor {
                shape: vec![1, frames.len()],
                data: frames
                    .iter()
                    .map(|frame| Self::frame_token(frame, layer))
                    .collect(),
            })
            .collect();

        Ok(EncodedAudio {
            layers,
            encoded_len: frames.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_round_up() {
        let backend = SimulatedBackend::new(1, 4);
        let mut encoder = backend.load(0, "model").unwrap();
        let audio = encoder.encode(&[0.5; 10]).unwrap();
        assert_eq!(audio.encoded_len, 3);
        assert_eq!(audio.layers.len(), LAYER_COUNT);
        assert!(audio.layers.iter().all(|l| l.data.len() == 3));
    }

    #[test]
    fn test_deterministic_tokens() {
        let backend = SimulatedBackend::new(2, 8);
        let mut a = backend.load(0, "model").unwrap();
        let mut b = backend.load(1, "model").unwrap();
        let wave: Vec<f32> = (0..32).map(|i| (i as f32 / 32.0).sin()).collect();
        assert_eq!(a.encode(&wave).unwrap(), b.encode(&wave).unwrap());
    }

    #[test]
    fn test_rejects_empty_and_nan() {
        let mut encoder = SimulatedBackend::new(1, 4).load(0, "model").unwrap();
        assert!(encoder.encode(&[]).is_err());
        assert!(encoder.encode(&[0.1, f32::NAN]).is_err());
    }

    #[test]
    fn test_unknown_device() {
        let backend = SimulatedBackend::new(1, 4);
        assert!(backend.load(1, "model").is_err());
    }

    #[test]
    fn test_tokens_in_codebook() {
        let mut encoder = SimulatedBackend::new(1, 2).load(0, "model").unwrap();
        let audio = encoder.encode(&[1.0, -1.0, 0.3, 0.2]).unwrap();
        for layer in audio.layers {
            assert!(layer.data.iter().all(|t| (0..SIMULATED_CODEBOOK_SIZE).contains(t)));
        }
    }
}
