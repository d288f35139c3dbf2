//! Encoder interface between the worker threads and the codec model
//!
//! The codec model is external. The worker only needs two seams:
//!
//! - [`EncoderBackend`] - reports how many devices exist and loads one
//!   [`AudioEncoder`] bound to a given device
//! - [`AudioEncoder`] - a blocking `encode(waveform)` call on that device
//!
//! # Backends
//!
//! - [`CommandBackend`] - one external encoder process per device, JSON lines
//!   over stdin/stdout
//! - [`SimulatedBackend`] - deterministic in-process devices for dry runs and
//!   tests

pub mod command;
pub mod simulated;

pub use command::CommandBackend;
pub use simulated::SimulatedBackend;

use crate::config::{EncoderConfig, EncoderKind};
use crate::error::{PipelineError, Result};
use crate::types::LAYER_COUNT;
use serde::{Deserialize, Serialize};

/// One token layer as returned by the model, in row-major order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTensor {
    /// Array shape; empty means a flat vector
    #[serde(default)]
    pub shape: Vec<usize>,
    pub data: Vec<i64>,
}

impl TokenTensor {
    /// A flat 1-D layer
    pub fn flat(data: Vec<i64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Flatten to 1-D, checking the shape against the data length
    pub fn flatten(self) -> Result<Vec<i64>> {
        if !self.shape.is_empty() {
            let expected: usize = self.shape.iter().product();
            if expected != self.data.len() {
                return Err(PipelineError::Encode(format!(
                    "layer shape {:?} implies {} tokens but {} were returned",
                    self.shape,
                    expected,
                    self.data.len()
                )));
            }
        }
        Ok(self.data)
    }
}

/// Output of one encode call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedAudio {
    pub layers: Vec<TokenTensor>,
    pub encoded_len: i64,
}

impl EncodedAudio {
    /// Flatten every layer, requiring exactly [`LAYER_COUNT`] of them
    pub fn into_flat_layers(self) -> Result<([Vec<i64>; LAYER_COUNT], i64)> {
        let count = self.layers.len();
        let layers: Vec<Vec<i64>> = self
            .layers
            .into_iter()
            .map(TokenTensor::flatten)
            .collect::<Result<_>>()?;

        let layers: [Vec<i64>; LAYER_COUNT] = layers.try_into().map_err(|_| {
            PipelineError::Encode(format!(
                "expected {} token layers, got {}",
                LAYER_COUNT, count
            ))
        })?;

        Ok((layers, self.encoded_len))
    }
}

/// A codec model bound to one device
#[cfg_attr(test, mockall::automock)]
pub trait AudioEncoder: Send {
    /// Encode one mono waveform
    fn encode(&mut self, waveform: &[f32]) -> Result<EncodedAudio>;
}

/// Source of device-bound encoders
pub trait EncoderBackend: Send + Sync {
    /// Number of devices available
    fn device_count(&self) -> usize;

    /// Load the model onto `device`
    fn load(&self, device: usize, model_id: &str) -> Result<Box<dyn AudioEncoder>>;

    /// Short name for log lines
    fn name(&self) -> &str;
}

/// Build the backend described by the encoder config
pub fn build_backend(config: &EncoderConfig) -> Result<Box<dyn EncoderBackend>> {
    config.validate()?;
    let backend: Box<dyn EncoderBackend> = match config.backend {
        EncoderKind::Command => Box::new(CommandBackend::new(config.command.clone(), config.devices)?),
        EncoderKind::Simulated => Box::new(SimulatedBackend::new(config.devices, config.frame_size)),
    };
    Ok(backend)
}
