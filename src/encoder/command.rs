//! External encoder processes
//!
//! Each device gets its own child process, started from `encoder.command`
//! with these environment variables:
//!
//! - `ENCODER_DEVICE` / `CUDA_VISIBLE_DEVICES` - the device rank
//! - `ENCODER_MODEL_ID` - the configured model identifier
//!
//! The protocol is JSON lines. After loading the model the process prints
//! `{"status": "ready"}`. Each request is `{"waveform": [...]}` and each
//! response is either `{"layers": [{"shape": [...], "data": [...]}, ...],
//! "encoded_len": N}` or `{"error": "..."}`.
//!
//! An `{"error": ...}` response fails only that item. A process that exits or
//! closes its pipes fails with [`PipelineError::EncoderLost`], which ends the
//! worker bound to it.

use super::{AudioEncoder, EncodedAudio, EncoderBackend};
use crate::error::{PipelineError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// Backend that launches one encoder process per device
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    devices: usize,
}

impl CommandBackend {
    pub fn new(command: Vec<String>, devices: usize) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts.next().ok_or_else(|| {
            PipelineError::Config("encoder command is empty".to_string())
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
            devices,
        })
    }
}

impl EncoderBackend for CommandBackend {
    fn device_count(&self) -> usize {
        self.devices
    }

    fn load(&self, device: usize, model_id: &str) -> Result<Box<dyn AudioEncoder>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("ENCODER_DEVICE", device.to_string())
            .env("CUDA_VISIBLE_DEVICES", device.to_string())
            .env("ENCODER_MODEL_ID", model_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawning encoder '{}' for device {}", self.program, device))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(PipelineError::Encode(
                "encoder process has no stdio pipes".to_string(),
            ));
        };

        let mut encoder = CommandEncoder {
            device,
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        };
        encoder.wait_ready()?;
        tracing::info!("Encoder process for device {} is ready", device);
        Ok(Box::new(encoder))
    }

    fn name(&self) -> &str {
        "command"
    }
}

#[derive(Serialize)]
struct EncodeRequest<'a> {
    waveform: &'a [f32],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EncodeResponse {
    Error { error: String },
    Status { status: String },
    Encoded(EncodedAudio),
}

/// One running encoder process
pub struct CommandEncoder {
    device: usize,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl CommandEncoder {
    fn lost(&mut self, what: impl std::fmt::Display) -> PipelineError {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => format!(" ({})", status),
            _ => String::new(),
        };
        PipelineError::EncoderLost(format!(
            "encoder process on device {}: {}{}",
            self.device, what, status
        ))
    }

    fn read_response(&mut self) -> Result<EncodeResponse> {
        let mut line = String::new();
        let n = match self.stdout.read_line(&mut line) {
            Ok(n) => n,
            Err(e) => return Err(self.lost(format_args!("read failed: {}", e))),
        };
        if n == 0 {
            return Err(self.lost("exited"));
        }
        Ok(serde_json::from_str(&line)?)
    }

    fn send_request(&mut self, waveform: &[f32]) -> Result<()> {
        serde_json::to_writer(&mut self.stdin, &EncodeRequest { waveform }).map_err(|e| {
            if e.is_io() {
                self.lost(format_args!("write failed: {}", e))
            } else {
                PipelineError::from(e)
            }
        })?;
        let sent = self
            .stdin
            .write_all(b"\n")
            .and_then(|()| self.stdin.flush());
        if let Err(e) = sent {
            return Err(self.lost(format_args!("write failed: {}", e)));
        }
        Ok(())
    }

    fn wait_ready(&mut self) -> Result<()> {
        match self.read_response()? {
            EncodeResponse::Status { status } if status == "ready" => Ok(()),
            EncodeResponse::Error { error } => Err(PipelineError::Encode(format!(
                "encoder on device {} failed to start: {}",
                self.device, error
            ))),
            _ => Err(PipelineError::Encode(format!(
                "encoder on device {} sent an unexpected greeting",
                self.device
            ))),
        }
    }
}

impl AudioEncoder for CommandEncoder {
    fn encode(&mut self, waveform: &[f32]) -> Result<EncodedAudio> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(PipelineError::EncoderLost(format!(
                "encoder process on device {} exited ({})",
                self.device, status
            )));
        }
        self.send_request(waveform)?;

        match self.read_response()? {
            EncodeResponse::Encoded(audio) => Ok(audio),
            EncodeResponse::Error { error } => Err(PipelineError::Encode(error)),
            EncodeResponse::Status { status } => Err(PipelineError::Encode(format!(
                "unexpected status '{}' in place of an encode result",
                status
            ))),
        }
    }
}

impl Drop for CommandEncoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
