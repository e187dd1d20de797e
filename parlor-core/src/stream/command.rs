use super::types::{ContainerFormat, TranscodeJob, TranscodeMode};

/// Translates a job into the full encoder argument list. Pure and
/// deterministic: identical jobs always produce identical argv, and no
/// process is touched here, which keeps the flag logic exhaustively
/// testable.
pub fn build_args(job: &TranscodeJob) -> Vec<String> {
    let request = &job.request;
    let decision = &request.decision;
    let variant = &request.variant;
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

    if request.seek_offset_s > 0.0 {
        args.push("-ss".into());
        args.push(format!("{:.3}", request.seek_offset_s));
    }
    args.push("-i".into());
    args.push(request.source.to_string_lossy().to_string());

    args.push("-map".into());
    args.push("0:v:0".into());
    if request.has_audio {
        args.push("-map".into());
        args.push("0:a:0".into());
    } else {
        args.push("-an".into());
    }

    match decision.mode {
        TranscodeMode::Transcode => {
            args.push("-c:v".into());
            args.push(encoder_for(&decision.video_codec).into());
            args.push("-preset".into());
            args.push("veryfast".into());
            args.push("-b:v".into());
            args.push(variant.video_bitrate.to_string());
            args.push("-maxrate".into());
            args.push(variant.video_bitrate.to_string());
            args.push("-bufsize".into());
            args.push((variant.video_bitrate * 2).to_string());
            args.push("-vf".into());
            args.push(format!("scale={}:{}", variant.width, variant.height));
            args.push("-pix_fmt".into());
            args.push("yuv420p".into());
            if decision.needs_keyframe_alignment {
                args.push("-force_key_frames".into());
                args.push(format!(
                    "expr:gte(t,n_forced*{})",
                    trim_float(request.segment_duration_s)
                ));
                args.push("-sc_threshold".into());
                args.push("0".into());
            }
        }
        TranscodeMode::Passthrough | TranscodeMode::Remux => {
            args.push("-c:v".into());
            args.push("copy".into());
        }
    }

    if request.has_audio {
        if decision.mode.is_copy() {
            args.push("-c:a".into());
            args.push("copy".into());
        } else {
            args.push("-c:a".into());
            args.push(decision.audio_codec.clone());
            args.push("-b:a".into());
            args.push(variant.audio_bitrate.to_string());
            args.push("-ac".into());
            args.push("2".into());
        }
    }

    args.push("-f".into());
    args.push("hls".into());
    args.push("-hls_time".into());
    args.push(trim_float(request.segment_duration_s));
    args.push("-hls_playlist_type".into());
    args.push("vod".into());
    args.push("-start_number".into());
    args.push(job.start_index().to_string());
    match decision.container {
        ContainerFormat::MpegTs => {
            args.push("-hls_segment_type".into());
            args.push("mpegts".into());
        }
        ContainerFormat::Fmp4 => {
            args.push("-hls_segment_type".into());
            args.push("fmp4".into());
            args.push("-hls_fmp4_init_filename".into());
            args.push("init.mp4".into());
        }
    }
    args.push("-hls_segment_filename".into());
    args.push(
        job.output_dir
            .join(format!("%05d.{}", decision.container.segment_extension()))
            .to_string_lossy()
            .to_string(),
    );
    args.push(
        job.output_dir
            .join("live.m3u8")
            .to_string_lossy()
            .to_string(),
    );

    args
}

fn encoder_for(family: &str) -> &'static str {
    match family {
        "hevc" => "libx265",
        "av1" => "libsvtav1",
        _ => "libx264",
    }
}

/// "6" instead of "6.000" for whole-second durations.
fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.3}")
    }
}
