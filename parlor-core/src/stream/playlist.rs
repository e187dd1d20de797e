use super::types::{ContainerFormat, QualityVariant, TranscodeDecision};

/// Builds the master manifest: one stream entry per quality variant,
/// pointing at the variant's own media playlist. Output is byte-stable for
/// identical input so intermediate layers may cache it.
pub fn master_playlist(decision: &TranscodeDecision, variants: &[QualityVariant]) -> String {
    let mut manifest = String::from("#EXTM3U\n");
    manifest.push_str(&format!(
        "#EXT-X-VERSION:{}\n",
        decision.container.hls_version()
    ));
    for variant in variants {
        manifest.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},CODECS=\"{},{}\"\n",
            variant.bandwidth(),
            variant.width,
            variant.height,
            video_codec_attr(&decision.video_codec),
            AUDIO_CODEC_ATTR,
        ));
        manifest.push_str(&format!("{}/stream.m3u8\n", variant.label));
    }
    manifest
}

/// Builds a variant's media manifest. The segment set is fully determined
/// by the source duration and the segment length, so the text is identical
/// for every variant and every call.
pub fn media_playlist(
    decision: &TranscodeDecision,
    duration_s: f64,
    segment_duration_s: f64,
) -> String {
    let container = decision.container;
    let mut manifest = String::from("#EXTM3U\n");
    manifest.push_str(&format!("#EXT-X-VERSION:{}\n", container.hls_version()));
    manifest.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        segment_duration_s.ceil() as u64
    ));
    manifest.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    manifest.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    if let Some(init) = container.init_segment() {
        manifest.push_str(&format!("#EXT-X-MAP:URI=\"{init}\"\n"));
    }

    for (index, duration) in segment_durations(duration_s, segment_duration_s)
        .iter()
        .enumerate()
    {
        manifest.push_str(&format!("#EXTINF:{duration:.3},\n"));
        manifest.push_str(&format!(
            "{index:05}.{}\n",
            container.segment_extension()
        ));
    }
    manifest.push_str("#EXT-X-ENDLIST\n");
    manifest
}

fn segment_durations(duration_s: f64, segment_duration_s: f64) -> Vec<f64> {
    if duration_s <= 0.0 || segment_duration_s <= 0.0 {
        return vec![segment_duration_s.max(0.0)];
    }
    let full = (duration_s / segment_duration_s).floor() as usize;
    let remainder = duration_s - full as f64 * segment_duration_s;
    let mut durations = vec![segment_duration_s; full];
    if remainder > 1e-9 {
        durations.push(remainder);
    }
    if durations.is_empty() {
        durations.push(duration_s);
    }
    durations
}

const AUDIO_CODEC_ATTR: &str = "mp4a.40.2";

fn video_codec_attr(family: &str) -> &str {
    match family {
        "h264" => "avc1.640029",
        "hevc" => "hvc1.1.6.L120.90",
        "av1" => "av01.0.08M.08",
        "vp9" => "vp09.00.10.08",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::TranscodeMode;

    fn decision(container: ContainerFormat) -> TranscodeDecision {
        TranscodeDecision {
            mode: TranscodeMode::Transcode,
            video_codec: "h264".to_string(),
            audio_codec: "aac".to_string(),
            container,
            needs_keyframe_alignment: true,
        }
    }

    fn variants() -> Vec<QualityVariant> {
        vec![
            QualityVariant {
                label: "720p".into(),
                width: 1280,
                height: 720,
                video_bitrate: 2_500_000,
                audio_bitrate: 128_000,
            },
            QualityVariant {
                label: "480p".into(),
                width: 854,
                height: 480,
                video_bitrate: 1_000_000,
                audio_bitrate: 96_000,
            },
        ]
    }

    #[test]
    fn master_playlist_is_byte_exact() {
        let manifest = master_playlist(&decision(ContainerFormat::MpegTs), &variants());
        assert_eq!(
            manifest,
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2628000,RESOLUTION=1280x720,CODECS=\"avc1.640029,mp4a.40.2\"\n\
             720p/stream.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1096000,RESOLUTION=854x480,CODECS=\"avc1.640029,mp4a.40.2\"\n\
             480p/stream.m3u8\n"
        );
    }

    #[test]
    fn media_playlist_is_byte_exact_for_mpegts() {
        let manifest = media_playlist(&decision(ContainerFormat::MpegTs), 14.0, 6.0);
        assert_eq!(
            manifest,
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-TARGETDURATION:6\n\
             #EXT-X-MEDIA-SEQUENCE:0\n\
             #EXT-X-PLAYLIST-TYPE:VOD\n\
             #EXTINF:6.000,\n\
             00000.ts\n\
             #EXTINF:6.000,\n\
             00001.ts\n\
             #EXTINF:2.000,\n\
             00002.ts\n\
             #EXT-X-ENDLIST\n"
        );
    }

    #[test]
    fn fmp4_playlist_declares_version_six_and_init_map() {
        let manifest = media_playlist(&decision(ContainerFormat::Fmp4), 6.0, 6.0);
        assert!(manifest.contains("#EXT-X-VERSION:6\n"));
        assert!(manifest.contains("#EXT-X-MAP:URI=\"init.mp4\"\n"));
        assert!(manifest.contains("00000.m4s\n"));
        assert!(!manifest.contains(".ts\n"));
    }

    #[test]
    fn exact_multiple_has_no_stub_segment() {
        let durations = segment_durations(12.0, 6.0);
        assert_eq!(durations, vec![6.0, 6.0]);
    }

    #[test]
    fn short_source_yields_single_partial_segment() {
        let durations = segment_durations(2.5, 6.0);
        assert_eq!(durations, vec![2.5]);
    }

    #[test]
    fn identical_input_produces_identical_bytes() {
        let a = media_playlist(&decision(ContainerFormat::MpegTs), 3600.0, 6.0);
        let b = media_playlist(&decision(ContainerFormat::MpegTs), 3600.0, 6.0);
        assert_eq!(a, b);
    }

    #[test]
    fn hevc_master_uses_hvc1_attribute() {
        let mut d = decision(ContainerFormat::Fmp4);
        d.video_codec = "hevc".into();
        let manifest = master_playlist(&d, &variants());
        assert!(manifest.contains("CODECS=\"hvc1.1.6.L120.90,mp4a.40.2\""));
        assert!(manifest.starts_with("#EXTM3U\n#EXT-X-VERSION:6\n"));
    }
}
