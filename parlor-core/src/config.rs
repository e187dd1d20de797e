use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Configuration for the streaming core. Every field carries a working
/// default so the server can run without a config file at all.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub binaries: BinariesSection,
    pub transcode: TranscodeSection,
    pub session: SessionSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinariesSection {
    /// Encoder binary, resolved via PATH unless overridden with an
    /// absolute path.
    pub ffmpeg_path: PathBuf,
    /// Inspector binary used for probing source files.
    pub ffprobe_path: PathBuf,
}

impl Default for BinariesSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscodeSection {
    /// Ceiling on encoder processes alive across all sessions.
    pub max_concurrent: usize,
    pub segment_duration_s: f64,
    /// How long a segment request may wait for the encoder to produce
    /// the file before the boundary reports it missing.
    pub segment_wait_s: u64,
    pub poll_interval_ms: u64,
}

impl Default for TranscodeSection {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            segment_duration_s: 6.0,
            segment_wait_s: 10,
            poll_interval_ms: 250,
        }
    }
}

impl TranscodeSection {
    pub fn segment_wait(&self) -> Duration {
        Duration::from_secs(self.segment_wait_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub idle_timeout_s: u64,
    pub reap_interval_s: u64,
    /// Bounded wait for in-flight segment reads before a destroy
    /// force-stops the session anyway.
    pub destroy_grace_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_timeout_s: 60,
            reap_interval_s: 15,
            destroy_grace_ms: 2000,
        }
    }
}

impl SessionSection {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_s)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_s)
    }

    pub fn destroy_grace(&self) -> Duration {
        Duration::from_millis(self.destroy_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub segment_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            segment_dir: std::env::temp_dir().join("parlor-segments"),
        }
    }
}

pub fn load_stream_config<P: AsRef<Path>>(path: P) -> Result<StreamConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
