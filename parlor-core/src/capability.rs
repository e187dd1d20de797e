use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::exec::CommandExecutor;

/// Hardware encoder names worth reporting when the encoder build lists them.
const KNOWN_HW_ENCODERS: &[&str] = &[
    "h264_nvenc",
    "hevc_nvenc",
    "h264_qsv",
    "hevc_qsv",
    "h264_vaapi",
    "hevc_vaapi",
    "h264_videotoolbox",
    "hevc_videotoolbox",
];

/// Acceleration methods in preference order.
const ACCELERATOR_PRIORITY: &[&str] = &["cuda", "qsv", "videotoolbox", "vaapi"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct HardwareCapability {
    pub available: bool,
    pub accelerator: Option<String>,
    pub encoders: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EncoderCapabilities {
    pub encoder_available: bool,
    pub hardware: HardwareCapability,
}

impl EncoderCapabilities {
    pub fn is_encoder_available(&self) -> bool {
        self.encoder_available
    }

    pub fn hardware_capability(&self) -> &HardwareCapability {
        &self.hardware
    }
}

/// Probes the encoder binary once at startup. A missing or broken binary is
/// recorded as unavailable and surfaced through the health report, never as
/// an error to callers.
pub struct CapabilityDetector {
    ffmpeg: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl CapabilityDetector {
    pub fn new(ffmpeg: PathBuf, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { ffmpeg, executor }
    }

    pub async fn detect(&self) -> EncoderCapabilities {
        let Some(_) = self.run(&["-hide_banner", "-version"]).await else {
            warn!(binary = %self.ffmpeg.display(), "encoder binary unavailable");
            return EncoderCapabilities::default();
        };

        let accelerator = self
            .run(&["-hide_banner", "-hwaccels"])
            .await
            .and_then(|stdout| pick_accelerator(&stdout));

        let encoders = match self.run(&["-hide_banner", "-encoders"]).await {
            Some(stdout) => KNOWN_HW_ENCODERS
                .iter()
                .filter(|name| stdout.contains(*name))
                .map(|name| name.to_string())
                .collect(),
            None => Vec::new(),
        };

        let hardware = HardwareCapability {
            available: accelerator.is_some(),
            accelerator,
            encoders,
        };
        info!(
            hw_available = hardware.available,
            accelerator = hardware.accelerator.as_deref().unwrap_or("none"),
            "encoder capabilities detected"
        );
        EncoderCapabilities {
            encoder_available: true,
            hardware,
        }
    }

    /// Runs the encoder with introspection flags, returning stdout on
    /// success and `None` for any spawn or exit failure.
    async fn run(&self, args: &[&str]) -> Option<String> {
        let mut command = Command::new(&self.ffmpeg);
        command.args(args).kill_on_drop(true);
        match self.executor.run(&mut command).await {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(output) => {
                warn!(
                    status = output.status.code(),
                    "encoder introspection returned non-zero status"
                );
                None
            }
            Err(error) => {
                warn!(%error, "failed to invoke encoder binary");
                None
            }
        }
    }
}

fn pick_accelerator(stdout: &str) -> Option<String> {
    let methods: Vec<&str> = stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    ACCELERATOR_PRIORITY
        .iter()
        .find(|candidate| methods.contains(*candidate))
        .map(|candidate| candidate.to_string())
}
