//! Transcode invoker: a thin adapter around the external encoder process.
//!
//! Owns the timeout and the classification of process failures. The central
//! resource-safety contract: the child process never outlives
//! [`TranscodeInvoker::convert`] on any exit path. Timeout and cancellation
//! both kill the child and reap it before returning, and `kill_on_drop`
//! covers the task-abort path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EncoderConfig;
use crate::error::ConvertError;

/// Requested output format and codec parameters for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeParams {
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Output file extension (also selects the container ffmpeg writes).
    pub extension: String,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            extension: "aac".to_string(),
        }
    }
}

/// stderr fragments that indicate the encoder rejected the input itself
/// rather than crashing. Matched case-sensitively against ffmpeg output.
const UNSUPPORTED_MARKERS: &[&str] = &[
    "Invalid data found when processing input",
    "could not find codec parameters",
    "Decoder not found",
    "Unknown format",
];

pub struct TranscodeInvoker {
    program: PathBuf,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl TranscodeInvoker {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            timeout,
        }
    }

    pub fn from_config(encoder: &EncoderConfig, timeout: Duration) -> Self {
        Self {
            program: PathBuf::from(&encoder.program),
            extra_args: encoder.extra_args.clone(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve the encoder binary on PATH (or verify an absolute path).
    ///
    /// Called eagerly at startup so a misconfigured encoder is fatal before
    /// any job is accepted; spawn failures are still classified lazily in
    /// case the binary disappears later.
    pub fn resolve(&self) -> Result<PathBuf, ConvertError> {
        which::which(&self.program)
            .map_err(|_| ConvertError::EncoderNotFound(self.program.display().to_string()))
    }

    fn build_args(&self, input: &Path, output: &Path, params: &EncodeParams) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:a".to_string(),
            params.audio_codec.clone(),
            "-b:a".to_string(),
            params.audio_bitrate.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.extend([
            "-y".to_string(), // Overwrite
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    /// Run the encoder for one job.
    ///
    /// Blocks (asynchronously) for up to the configured timeout. On timeout
    /// the child is killed and reaped and `Timeout` is returned; if `cancel`
    /// fires first the child is killed and `Cancelled` is returned. A child
    /// that exits non-zero is classified as `UnsupportedInput` when its
    /// stderr matches a known rejection, otherwise `EncoderCrashed`.
    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        params: &EncodeParams,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        let args = self.build_args(input, output, params);
        debug!("Encoder args: {:?}", args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConvertError::EncoderNotFound(self.program.display().to_string())
                } else {
                    ConvertError::Io(e)
                }
            })?;

        // Drain stderr concurrently so a chatty encoder cannot fill the pipe
        // and deadlock against our wait().
        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            res = child.wait() => res?,
            _ = tokio::time::sleep(self.timeout) => {
                warn!("Encoder exceeded {:?}, killing process", self.timeout);
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ConvertError::Timeout(self.timeout));
            }
            _ = cancel.cancelled() => {
                debug!("Conversion cancelled, killing encoder process");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ConvertError::Cancelled);
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        if let Some(marker) = UNSUPPORTED_MARKERS.iter().find(|m| stderr.contains(**m)) {
            return Err(ConvertError::UnsupportedInput((*marker).to_string()));
        }

        Err(ConvertError::EncoderCrashed {
            status,
            stderr: tail(&stderr, 512),
        })
    }
}

/// Last `max` bytes of encoder stderr, trimmed on a char boundary.
fn tail(s: &str, max: usize) -> String {
    let trimmed = s.trim_end();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
