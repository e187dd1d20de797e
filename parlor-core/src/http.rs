use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::capability::EncoderCapabilities;
use crate::stream::{
    SessionCoordinator, SessionSummary, StoreError, StreamError, StreamingOptions,
};

const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub capabilities: EncoderCapabilities,
}

/// The streaming surface. Control plane under `/api`, playback assets
/// addressed by session id (and optionally variant label) at the root, the
/// way HLS clients expect relative playlist URIs to resolve.
pub fn stream_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/:session", delete(destroy_session))
        .route("/api/sessions/:session/seek", post(seek_session))
        .route("/:session/:part", get(session_asset))
        .route("/:session/:part/:name", get(variant_asset))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub media_id: String,
    #[serde(default)]
    pub options: StreamingOptions,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub master_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    pub position_s: f64,
}

async fn health(State(state): State<AppState>) -> Json<EncoderCapabilities> {
    Json(state.capabilities.clone())
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let session = state
        .coordinator
        .create_session(&request.media_id, request.options)
        .await?;
    Ok(Json(CreateSessionResponse {
        master_url: format!("/{}/master.m3u8", session.id()),
        session_id: session.id().to_string(),
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.coordinator.list_sessions())
}

async fn seek_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(request): Json<SeekRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .seek_session(&session, request.position_s)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn destroy_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.destroy_session(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn session_asset(
    State(state): State<AppState>,
    Path((session, part)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    match part.as_str() {
        "master.m3u8" => Ok(playlist_response(
            state.coordinator.master_playlist(&session)?,
        )),
        "stream.m3u8" => Ok(playlist_response(
            state.coordinator.media_playlist(&session, None)?,
        )),
        name => {
            let (bytes, content_type) =
                state.coordinator.serve_segment(&session, None, name).await?;
            Ok(segment_response(bytes, content_type))
        }
    }
}

async fn variant_asset(
    State(state): State<AppState>,
    Path((session, variant, name)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    match name.as_str() {
        "stream.m3u8" => Ok(playlist_response(
            state.coordinator.media_playlist(&session, Some(&variant))?,
        )),
        name => {
            let (bytes, content_type) = state
                .coordinator
                .serve_segment(&session, Some(&variant), name)
                .await?;
            Ok(segment_response(bytes, content_type))
        }
    }
}

fn playlist_response(manifest: String) -> Response {
    ([(header::CONTENT_TYPE, HLS_CONTENT_TYPE)], manifest).into_response()
}

fn segment_response(bytes: Vec<u8>, content_type: &'static str) -> Response {
    ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
}

/// Boundary translation of the core error taxonomy into status codes.
pub struct ApiError(StreamError);

impl From<StreamError> for ApiError {
    fn from(error: StreamError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StreamError::UnknownMedia(_)
            | StreamError::SessionNotFound(_)
            | StreamError::VariantNotFound(_)
            | StreamError::InitSegmentUnavailable
            | StreamError::Store(StoreError::SegmentNotFound { .. }) => StatusCode::NOT_FOUND,
            StreamError::Store(StoreError::InvalidSegmentPath(_)) => StatusCode::BAD_REQUEST,
            StreamError::MaxConcurrentTranscodes(_) => StatusCode::SERVICE_UNAVAILABLE,
            StreamError::Probe(_) | StreamError::Process(_) | StreamError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::exec::CommandExecutor;
    use crate::probe::MediaProber;
    use crate::stream::SourceResolver;
    use axum::body::Body;
    use axum::http::Request;
    use std::io;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;
    use std::path::PathBuf;
    use std::process::{ExitStatus, Output};
    use tempfile::TempDir;
    use tokio::process::Command;
    use tower::ServiceExt;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "avg_frame_rate": "24/1", "bit_rate": "5000000"},
            {"codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"format_name": "mov,mp4", "duration": "30.0"}
    }"#;

    struct FakeProbeExecutor;

    #[async_trait::async_trait]
    impl CommandExecutor for FakeProbeExecutor {
        async fn run(&self, _command: &mut Command) -> io::Result<Output> {
            Ok(Output {
                status: ExitStatus::from_raw(0),
                stdout: PROBE_JSON.as_bytes().to_vec(),
                stderr: Vec::new(),
            })
        }
    }

    struct FixedResolver {
        source: PathBuf,
    }

    impl SourceResolver for FixedResolver {
        fn resolve(&self, media_id: &str) -> Option<PathBuf> {
            (media_id == "movie-1").then(|| self.source.clone())
        }
    }

    struct Harness {
        state: AppState,
        _base: TempDir,
    }

    fn harness() -> Harness {
        let base = TempDir::new().unwrap();
        let source = base.path().join("movie.mp4");
        std::fs::write(&source, b"source").unwrap();

        // Stand-in encoder that stays alive like a real one would.
        let encoder = base.path().join("fake-encoder.sh");
        std::fs::write(&encoder, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&encoder, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = StreamConfig::default();
        config.binaries.ffmpeg_path = encoder;
        config.storage.segment_dir = base.path().join("segments");
        config.transcode.segment_wait_s = 0;
        config.transcode.poll_interval_ms = 10;

        let prober = MediaProber::new(PathBuf::from("ffprobe"), Arc::new(FakeProbeExecutor));
        let coordinator = Arc::new(SessionCoordinator::new(
            config,
            prober,
            Arc::new(FixedResolver { source }),
        ));
        Harness {
            state: AppState {
                coordinator,
                capabilities: EncoderCapabilities::default(),
            },
            _base: base,
        }
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = stream_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn create(state: &AppState) -> String {
        let request = Request::builder()
            .method("POST")
            .uri("/api/sessions")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"media_id": "movie-1"}"#))
            .unwrap();
        let (status, body) = send(state, request).await;
        assert_eq!(status, StatusCode::OK);
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        payload["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let harness = harness();
        let (status, _) = send(
            &harness.state,
            Request::builder()
                .uri("/no-such-session/master.m3u8")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_then_fetch_master_playlist() {
        let harness = harness();
        let session = create(&harness.state).await;
        let (status, body) = send(
            &harness.state,
            Request::builder()
                .uri(format!("/{session}/master.m3u8"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("#EXTM3U"));
        assert!(text.contains("#EXT-X-STREAM-INF:BANDWIDTH="));
        assert!(text.contains("stream.m3u8"));
    }

    #[tokio::test]
    async fn media_playlist_lists_segments_for_variant() {
        let harness = harness();
        let session = create(&harness.state).await;
        // Client codec list was empty, so this is an MPEG-TS transcode.
        let (status, body) = send(
            &harness.state,
            Request::builder()
                .uri(format!("/{session}/1080p/stream.m3u8"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("#EXTINF:6.000,\n00000.ts"));
        assert!(text.contains("#EXT-X-ENDLIST"));

        let (status, _) = send(
            &harness.state,
            Request::builder()
                .uri(format!("/{session}/999p/stream.m3u8"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn produced_segment_is_served_with_ts_content_type() {
        let harness = harness();
        let session = create(&harness.state).await;
        let variant_dir = harness
            .state
            .coordinator
            .store()
            .variant_dir(&session, "1080p")
            .await
            .unwrap();
        std::fs::write(variant_dir.join("00000.ts"), b"mpegts bytes").unwrap();

        let response = stream_router(harness.state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/{session}/1080p/00000.ts"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp2t"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"mpegts bytes");
    }

    #[tokio::test]
    async fn missing_segment_times_out_to_404() {
        let harness = harness();
        let session = create(&harness.state).await;
        let (status, _) = send(
            &harness.state,
            Request::builder()
                .uri(format!("/{session}/1080p/00099.ts"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn init_segment_on_mpegts_session_is_404() {
        let harness = harness();
        let session = create(&harness.state).await;
        let (status, _) = send(
            &harness.state,
            Request::builder()
                .uri(format!("/{session}/init.mp4"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_media_is_404_on_create() {
        let harness = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/api/sessions")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"media_id": "nope"}"#))
            .unwrap();
        let (status, _) = send(&harness.state, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn destroy_then_playlist_is_404() {
        let harness = harness();
        let session = create(&harness.state).await;
        let (status, _) = send(
            &harness.state,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/sessions/{session}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &harness.state,
            Request::builder()
                .uri(format!("/{session}/master.m3u8"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_capabilities() {
        let harness = harness();
        let (status, body) = send(
            &harness.state,
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["encoder_available"], false);
    }
}
