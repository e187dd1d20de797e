use crate::probe::MediaProbe;

use super::types::{QualityPolicy, QualityVariant, StreamingOptions, TranscodeDecision};

/// Fixed rung table, best first. Bitrates follow the usual software-encode
/// rates for each height.
const RUNGS: &[Rung] = &[
    Rung {
        height: 1080,
        width: 1920,
        video_bitrate: 4_000_000,
        audio_bitrate: 128_000,
    },
    Rung {
        height: 720,
        width: 1280,
        video_bitrate: 2_500_000,
        audio_bitrate: 128_000,
    },
    Rung {
        height: 480,
        width: 854,
        video_bitrate: 1_000_000,
        audio_bitrate: 96_000,
    },
    Rung {
        height: 360,
        width: 640,
        video_bitrate: 600_000,
        audio_bitrate: 64_000,
    },
];

struct Rung {
    height: u32,
    width: u32,
    video_bitrate: u64,
    audio_bitrate: u64,
}

impl Rung {
    fn to_variant(&self) -> QualityVariant {
        QualityVariant {
            label: label_for(self.height),
            width: self.width,
            height: self.height,
            video_bitrate: self.video_bitrate,
            audio_bitrate: self.audio_bitrate,
        }
    }
}

fn label_for(height: u32) -> String {
    format!("{height}p")
}

/// Computes the rendition set for a session. Copy modes get a single
/// variant mirroring the source (there is nothing to re-encode); transcode
/// sessions get every rung the source and the client caps leave room for,
/// in descending order. No rung ever exceeds the source's native bitrate.
pub fn build_ladder(
    probe: &MediaProbe,
    decision: &TranscodeDecision,
    options: &StreamingOptions,
) -> Vec<QualityVariant> {
    if decision.mode.is_copy() {
        return vec![source_variant(probe)];
    }

    let mut rungs: Vec<QualityVariant> = RUNGS
        .iter()
        .filter(|rung| rung.height <= probe.height || probe.height == 0)
        .filter(|rung| options.max_height.map_or(true, |max| rung.height <= max))
        .filter(|rung| options.max_width.map_or(true, |max| rung.width <= max))
        .filter(|rung| probe.bitrate_bps == 0 || rung.video_bitrate <= probe.bitrate_bps)
        .filter(|rung| {
            options
                .max_bitrate_bps
                .map_or(true, |max| rung.video_bitrate + rung.audio_bitrate <= max)
        })
        .map(Rung::to_variant)
        .collect();

    if rungs.is_empty() {
        rungs.push(fallback_variant(probe, options));
    }

    match options.quality {
        QualityPolicy::Adaptive => rungs,
        QualityPolicy::Highest => rungs.into_iter().take(1).collect(),
        QualityPolicy::Lowest => {
            let last = rungs.pop();
            last.into_iter().collect()
        }
    }
}

/// Replacement rung used when a variant's encoder dies on startup: same
/// label and directory, one step down in cost. Returns `None` from the
/// bottom rung.
pub fn downgraded_variant(variant: &QualityVariant) -> Option<QualityVariant> {
    RUNGS
        .iter()
        .find(|rung| rung.height < variant.height && rung.video_bitrate < variant.video_bitrate)
        .map(|rung| QualityVariant {
            label: variant.label.clone(),
            ..rung.to_variant()
        })
}

fn source_variant(probe: &MediaProbe) -> QualityVariant {
    QualityVariant {
        label: if probe.height > 0 {
            label_for(probe.height)
        } else {
            "default".to_string()
        },
        width: probe.width,
        height: probe.height,
        video_bitrate: probe.bitrate_bps,
        audio_bitrate: 0,
    }
}

/// Synthetic single variant for sources smaller or cheaper than the lowest
/// rung: clamp everything to the source so we never upscale.
fn fallback_variant(probe: &MediaProbe, options: &StreamingOptions) -> QualityVariant {
    let height = options
        .max_height
        .map_or(probe.height, |max| probe.height.min(max));
    let width = options
        .max_width
        .map_or(probe.width, |max| probe.width.min(max));
    let video_bitrate = match (probe.bitrate_bps, options.max_bitrate_bps) {
        (0, Some(max)) => max,
        (0, None) => 600_000,
        (source, Some(max)) => source.min(max),
        (source, None) => source,
    };
    QualityVariant {
        label: "default".to_string(),
        width,
        height,
        video_bitrate,
        audio_bitrate: 64_000,
    }
}
