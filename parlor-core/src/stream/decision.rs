use crate::probe::MediaProbe;

use super::types::{ContainerFormat, StreamingOptions, TranscodeDecision, TranscodeMode};

/// Codec families the encoder can target, in preference order when the
/// client list leaves a choice.
const TRANSCODE_TARGETS: &[&str] = &["h264", "hevc"];

/// Chooses how a source gets served: untouched, repackaged, or re-encoded.
///
/// Passthrough requires the client to support the source codec family, the
/// source to respect every client cap, and the source container to already
/// be segment-ready. A supported codec in the wrong container only needs a
/// remux. Everything else is a transcode.
pub fn decide(probe: &MediaProbe, options: &StreamingOptions) -> TranscodeDecision {
    let source_family = normalize_codec(&probe.video_codec);
    let codec_ok = options.supports_codec(&source_family);
    let caps_ok = within_caps(probe, options);

    if codec_ok && caps_ok {
        if container_is_stream_ready(&probe.container) {
            return TranscodeDecision {
                mode: TranscodeMode::Passthrough,
                video_codec: source_family,
                audio_codec: "copy".to_string(),
                container: ContainerFormat::MpegTs,
                needs_keyframe_alignment: false,
            };
        }
        let container = container_for(&source_family, options);
        return TranscodeDecision {
            mode: TranscodeMode::Remux,
            video_codec: source_family,
            audio_codec: "copy".to_string(),
            container,
            needs_keyframe_alignment: true,
        };
    }

    let target = transcode_target(options);
    TranscodeDecision {
        mode: TranscodeMode::Transcode,
        video_codec: target.to_string(),
        audio_codec: "aac".to_string(),
        container: container_for(target, options),
        needs_keyframe_alignment: true,
    }
}

fn within_caps(probe: &MediaProbe, options: &StreamingOptions) -> bool {
    if options.max_width.is_some_and(|max| probe.width > max) {
        return false;
    }
    if options.max_height.is_some_and(|max| probe.height > max) {
        return false;
    }
    if options
        .max_bitrate_bps
        .is_some_and(|max| probe.bitrate_bps > max)
    {
        return false;
    }
    true
}

fn container_is_stream_ready(container: &str) -> bool {
    container.eq_ignore_ascii_case("mpegts")
}

/// Fragmented MP4 suits modern codec families; MPEG-TS stays the maximum
/// compatibility fallback, including when the client codec list is unknown.
fn container_for(family: &str, options: &StreamingOptions) -> ContainerFormat {
    if options.supported_codecs.is_empty() {
        return ContainerFormat::MpegTs;
    }
    match family {
        "hevc" | "av1" | "vp9" => ContainerFormat::Fmp4,
        _ => ContainerFormat::MpegTs,
    }
}

fn transcode_target(options: &StreamingOptions) -> &'static str {
    if options.supported_codecs.is_empty() {
        return "h264";
    }
    TRANSCODE_TARGETS
        .iter()
        .find(|family| options.supports_codec(family))
        .copied()
        .unwrap_or("h264")
}

pub fn normalize_codec(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "avc" | "avc1" | "h264" => "h264".to_string(),
        "h265" | "hvc1" | "hev1" | "hevc" => "hevc".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(codec: &str, container: &str, height: u32, bitrate: u64) -> MediaProbe {
        MediaProbe {
            duration_s: 3600.0,
            framerate: 23.976,
            width: height * 16 / 9,
            height,
            video_codec: codec.to_string(),
            audio_codec: Some("aac".to_string()),
            bitrate_bps: bitrate,
            container: container.to_string(),
        }
    }

    fn options(codecs: &[&str]) -> StreamingOptions {
        StreamingOptions {
            supported_codecs: codecs.iter().map(|c| c.to_string()).collect(),
            ..StreamingOptions::default()
        }
    }

    #[test]
    fn supported_h264_in_mp4_remuxes_to_mpegts() {
        let decision = decide(&probe("h264", "mov", 1080, 5_000_000), &options(&["h264"]));
        assert_eq!(decision.mode, TranscodeMode::Remux);
        assert_eq!(decision.container, ContainerFormat::MpegTs);
        assert!(decision.needs_keyframe_alignment);
        assert_eq!(decision.video_codec, "h264");
        assert_eq!(decision.audio_codec, "copy");
    }

    #[test]
    fn stream_ready_source_passes_through() {
        let decision = decide(
            &probe("h264", "mpegts", 720, 3_000_000),
            &options(&["h264"]),
        );
        assert_eq!(decision.mode, TranscodeMode::Passthrough);
        assert!(!decision.needs_keyframe_alignment);
    }

    #[test]
    fn unsupported_codec_forces_transcode() {
        let decision = decide(&probe("av1", "mov", 1080, 6_000_000), &options(&["h264"]));
        assert_eq!(decision.mode, TranscodeMode::Transcode);
        assert_eq!(decision.video_codec, "h264");
        assert_eq!(decision.audio_codec, "aac");
        assert_eq!(decision.container, ContainerFormat::MpegTs);
        assert!(decision.needs_keyframe_alignment);
    }

    #[test]
    fn exceeded_bitrate_cap_forces_transcode() {
        let mut opts = options(&["h264"]);
        opts.max_bitrate_bps = Some(2_000_000);
        let decision = decide(&probe("h264", "mov", 1080, 8_000_000), &opts);
        assert_eq!(decision.mode, TranscodeMode::Transcode);
    }

    #[test]
    fn exceeded_resolution_cap_forces_transcode() {
        let mut opts = options(&["h264"]);
        opts.max_height = Some(720);
        let decision = decide(&probe("h264", "mov", 2160, 8_000_000), &opts);
        assert_eq!(decision.mode, TranscodeMode::Transcode);
    }

    #[test]
    fn hevc_capable_client_gets_fmp4() {
        let decision = decide(&probe("hevc", "matroska", 2160, 20_000_000), &options(&["hevc"]));
        assert_eq!(decision.mode, TranscodeMode::Remux);
        assert_eq!(decision.container, ContainerFormat::Fmp4);
    }

    #[test]
    fn unknown_client_codecs_fall_back_to_mpegts_transcode() {
        let decision = decide(&probe("hevc", "matroska", 1080, 8_000_000), &options(&[]));
        assert_eq!(decision.mode, TranscodeMode::Transcode);
        assert_eq!(decision.video_codec, "h264");
        assert_eq!(decision.container, ContainerFormat::MpegTs);
    }

    #[test]
    fn codec_names_normalize_across_aliases() {
        assert_eq!(normalize_codec("AVC1"), "h264");
        assert_eq!(normalize_codec("h265"), "hevc");
        assert_eq!(normalize_codec("av1"), "av1");
    }
}
