use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::exec::CommandExecutor;

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to invoke inspector for {path}: {source}")]
    Spawn {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("inspector exited with status {status:?}: {stderr}")]
    CommandFailure {
        status: Option<i32>,
        stderr: String,
    },
    #[error("inspector timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid inspector payload: {0}")]
    Parse(String),
    #[error("no video stream found in {0}")]
    MissingVideoStream(PathBuf),
}

impl From<serde_json::Error> for ProbeError {
    fn from(source: serde_json::Error) -> Self {
        ProbeError::Parse(source.to_string())
    }
}

/// Immutable result of inspecting a source file. Produced once per session
/// and never mutated afterwards.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MediaProbe {
    pub duration_s: f64,
    pub framerate: f64,
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub bitrate_bps: u64,
    pub container: String,
}

/// Runs the inspector binary against a source file and parses its JSON
/// payload. Deliberately has no retry: a malformed file does not become
/// readable by probing it again.
pub struct MediaProber {
    ffprobe: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    probe_timeout: Duration,
}

impl MediaProber {
    pub fn new(ffprobe: PathBuf, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            ffprobe,
            executor,
            probe_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub async fn probe(&self, path: &Path) -> ProbeResult<MediaProbe> {
        let mut command = Command::new(&self.ffprobe);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path);

        let output = match timeout(self.probe_timeout, self.executor.run(&mut command)).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ProbeError::Spawn {
                    source,
                    path: path.to_path_buf(),
                })
            }
            Err(_) => return Err(ProbeError::Timeout(self.probe_timeout)),
        };

        if !output.status.success() {
            return Err(ProbeError::CommandFailure {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let payload: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        probe_from_payload(path, &payload)
    }
}

fn probe_from_payload(path: &Path, payload: &FfprobeOutput) -> ProbeResult<MediaProbe> {
    let video = payload
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::MissingVideoStream(path.to_path_buf()))?;
    let audio = payload
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("audio"));

    let framerate = parse_rate(video.avg_frame_rate.as_deref())
        .or_else(|| parse_rate(video.r_frame_rate.as_deref()))
        .unwrap_or(0.0);
    let bitrate_bps = video
        .bit_rate
        .as_deref()
        .and_then(|value| value.parse::<u64>().ok())
        .or_else(|| {
            payload
                .format
                .bit_rate
                .as_deref()
                .and_then(|value| value.parse::<u64>().ok())
        })
        .unwrap_or(0);
    let duration_s = payload
        .format
        .duration
        .as_deref()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or_default();
    let container = payload
        .format
        .format_name
        .as_deref()
        .map(|name| name.split(',').next().unwrap_or(name).to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Ok(MediaProbe {
        duration_s,
        framerate,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        video_codec: video
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        audio_codec: audio.and_then(|stream| stream.codec_name.clone()),
        bitrate_bps,
        container,
    })
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    format_name: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

fn parse_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    if rate.contains('/') {
        let mut parts = rate.split('/');
        let numerator = parts.next()?.parse::<f64>().ok()?;
        let denominator = parts.next()?.parse::<f64>().ok()?;
        if denominator == 0.0 {
            return None;
        }
        Some(numerator / denominator)
    } else {
        rate.parse::<f64>().ok()
    }
}
