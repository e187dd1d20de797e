use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the source is turned into the streaming output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeMode {
    /// Source is stream-ready as is.
    Passthrough,
    /// Container changes, streams are copied bit for bit.
    Remux,
    /// Full re-encode into the target codec family.
    Transcode,
}

impl TranscodeMode {
    /// True when the video/audio streams are copied rather than re-encoded.
    pub fn is_copy(&self) -> bool {
        !matches!(self, TranscodeMode::Transcode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    MpegTs,
    Fmp4,
}

impl ContainerFormat {
    pub fn segment_extension(&self) -> &'static str {
        match self {
            ContainerFormat::MpegTs => "ts",
            ContainerFormat::Fmp4 => "m4s",
        }
    }

    pub fn hls_version(&self) -> u8 {
        match self {
            ContainerFormat::MpegTs => 3,
            ContainerFormat::Fmp4 => 6,
        }
    }

    pub fn segment_content_type(&self) -> &'static str {
        match self {
            ContainerFormat::MpegTs => "video/mp2t",
            ContainerFormat::Fmp4 => "video/mp4",
        }
    }

    /// Name of the initialization segment, for containers that need one.
    pub fn init_segment(&self) -> Option<&'static str> {
        match self {
            ContainerFormat::MpegTs => None,
            ContainerFormat::Fmp4 => Some("init.mp4"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPolicy {
    /// Full ladder, client switches renditions on bandwidth.
    #[default]
    Adaptive,
    /// Only the best rendition the source and caps allow.
    Highest,
    /// Only the cheapest rendition.
    Lowest,
}

/// Client-supplied streaming preferences. Decision input only, never
/// mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingOptions {
    pub quality: QualityPolicy,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub max_bitrate_bps: Option<u64>,
    pub supported_codecs: Vec<String>,
    pub audio_language: Option<String>,
    pub subtitle_language: Option<String>,
}

impl StreamingOptions {
    pub fn supports_codec(&self, codec: &str) -> bool {
        self.supported_codecs
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(codec))
    }
}

/// Outcome of the decision engine. Immutable for the session lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscodeDecision {
    pub mode: TranscodeMode,
    /// Target video codec family; for copy modes this is the source family
    /// (it still drives the CODECS playlist attribute).
    pub video_codec: String,
    pub audio_codec: String,
    pub container: ContainerFormat,
    /// Segments are cut independent of the source keyframe cadence, so
    /// boundaries must be forced to stay independently decodable.
    pub needs_keyframe_alignment: bool,
}

/// One ABR rendition. The label doubles as the on-disk and URL path
/// segment for the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityVariant {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
}

impl QualityVariant {
    pub fn bandwidth(&self) -> u64 {
        self.video_bitrate + self.audio_bitrate
    }
}

/// Everything one encoder invocation needs. Built fresh for every seek and
/// never mutated.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub seek_offset_s: f64,
    pub segment_duration_s: f64,
    pub framerate: f64,
    pub has_audio: bool,
    pub variant: QualityVariant,
    pub decision: TranscodeDecision,
}

/// A request resolved against the environment: which binary runs and where
/// its chunked output lands.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub request: TranscodeRequest,
    pub encoder: PathBuf,
    pub output_dir: PathBuf,
}

impl TranscodeJob {
    pub fn new(request: TranscodeRequest, encoder: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            request,
            encoder,
            output_dir,
        }
    }

    /// Index of the first segment this invocation produces, derived from
    /// the seek offset so file names line up with the VOD playlist.
    pub fn start_index(&self) -> u64 {
        if self.request.segment_duration_s <= 0.0 {
            return 0;
        }
        (self.request.seek_offset_s / self.request.segment_duration_s).floor() as u64
    }
}
