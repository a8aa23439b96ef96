use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::invoker::EncodeParams;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Maximum number of jobs waiting in the queue before admission rejects.
    #[serde(default = "default_queue_depth")]
    pub max_queue_depth: usize,

    /// Fixed number of concurrent workers.
    #[serde(default = "default_workers")]
    pub max_workers: usize,

    /// Largest accepted input, in bytes.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Per-job encoder timeout, in seconds.
    #[serde(default = "default_convert_timeout")]
    pub convert_timeout_secs: u64,

    /// How long terminal jobs stay queryable before eviction, in seconds.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Grace period for in-flight jobs to drain at shutdown, in seconds.
    #[serde(default = "default_drain_grace")]
    pub drain_grace_secs: u64,
}

fn default_queue_depth() -> usize {
    16
}
fn default_workers() -> usize {
    2
}
fn default_max_input_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_convert_timeout() -> u64 {
    300
}
fn default_retention() -> u64 {
    3600
}
fn default_drain_grace() -> u64 {
    10
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: default_queue_depth(),
            max_workers: default_workers(),
            max_input_bytes: default_max_input_bytes(),
            convert_timeout_secs: default_convert_timeout(),
            retention_secs: default_retention(),
            drain_grace_secs: default_drain_grace(),
        }
    }
}

impl JobsConfig {
    pub fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root for per-job scratch slots; swept for orphans at startup.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// Durable root where successful outputs are moved for retrieval.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Byte quota for concurrently staged inputs.
    #[serde(default = "default_staging_quota")]
    pub max_staging_bytes: u64,

    /// Registry snapshot file. Defaults to `recast-state.json` next to the
    /// config file when unset.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

fn default_staging_root() -> PathBuf {
    PathBuf::from("/tmp/recast/staging")
}
fn default_output_root() -> PathBuf {
    PathBuf::from("/tmp/recast/converted")
}
fn default_staging_quota() -> u64 {
    1024 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            staging_root: default_staging_root(),
            output_root: default_output_root(),
            max_staging_bytes: default_staging_quota(),
            state_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    /// Encoder binary, resolved on PATH or given as an absolute path.
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_codec")]
    pub audio_codec: String,

    #[serde(default = "default_bitrate")]
    pub audio_bitrate: String,

    /// Output extension; also selects the container.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Extra arguments appended before the output path.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_program() -> String {
    "ffmpeg".to_string()
}
fn default_codec() -> String {
    "aac".to_string()
}
fn default_bitrate() -> String {
    "192k".to_string()
}
fn default_extension() -> String {
    "aac".to_string()
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            audio_codec: default_codec(),
            audio_bitrate: default_bitrate(),
            extension: default_extension(),
            extra_args: Vec::new(),
        }
    }
}

impl EncoderConfig {
    /// Per-job parameters derived from the configured defaults.
    pub fn default_params(&self) -> EncodeParams {
        EncodeParams {
            audio_codec: self.audio_codec.clone(),
            audio_bitrate: self.audio_bitrate.clone(),
            extension: self.extension.clone(),
        }
    }
}
