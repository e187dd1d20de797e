use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::probe::MediaProbe;

use super::process::TranscodeHandle;
use super::types::{QualityVariant, StreamingOptions, TranscodeDecision, TranscodeMode};

/// Aggregate root for one playback session. The immutable half (probe,
/// decision, variants) is fixed at creation; the mutable half (seek
/// position, handles, access tracking) is guarded independently so one
/// session's seek never blocks another session's reads.
pub struct StreamSession {
    id: String,
    media_id: String,
    source: PathBuf,
    probe: MediaProbe,
    decision: TranscodeDecision,
    options: StreamingOptions,
    variants: Vec<QualityVariant>,
    created_at: DateTime<Utc>,
    last_accessed: StdMutex<Instant>,
    position_s: StdMutex<f64>,
    active_requests: AtomicUsize,
    pub(crate) handles: Mutex<HashMap<String, TranscodeHandle>>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("media_id", &self.media_id)
            .field("decision", &self.decision)
            .field("variants", &self.variants)
            .field("position_s", &self.position())
            .finish()
    }
}

impl StreamSession {
    pub(crate) fn new(
        media_id: String,
        source: PathBuf,
        probe: MediaProbe,
        decision: TranscodeDecision,
        options: StreamingOptions,
        variants: Vec<QualityVariant>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            media_id,
            source,
            probe,
            decision,
            options,
            variants,
            created_at: Utc::now(),
            last_accessed: StdMutex::new(Instant::now()),
            position_s: StdMutex::new(0.0),
            active_requests: AtomicUsize::new(0),
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn media_id(&self) -> &str {
        &self.media_id
    }

    pub fn source(&self) -> &PathBuf {
        &self.source
    }

    pub fn probe(&self) -> &MediaProbe {
        &self.probe
    }

    pub fn decision(&self) -> &TranscodeDecision {
        &self.decision
    }

    pub fn options(&self) -> &StreamingOptions {
        &self.options
    }

    pub fn variants(&self) -> &[QualityVariant] {
        &self.variants
    }

    pub fn variant(&self, label: &str) -> Option<&QualityVariant> {
        self.variants.iter().find(|variant| variant.label == label)
    }

    /// The variant served when the client does not name one. The ladder is
    /// never empty, so this is total.
    pub fn default_variant(&self) -> &QualityVariant {
        &self.variants[0]
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn touch(&self) {
        *self.last_accessed.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_accessed.lock().unwrap().elapsed()
    }

    pub fn position(&self) -> f64 {
        *self.position_s.lock().unwrap()
    }

    pub(crate) fn set_position(&self, position_s: f64) {
        *self.position_s.lock().unwrap() = position_s;
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Current encoder handle for a variant label, if one is registered.
    pub async fn handle(&self, label: &str) -> Option<TranscodeHandle> {
        self.handles.lock().await.get(label).cloned()
    }

    pub async fn handle_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Marks a boundary request in flight for as long as the guard lives,
    /// which defers idle reaping and the destroy grace window.
    pub fn request_guard(self: &Arc<Self>) -> ActiveRequestGuard {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        ActiveRequestGuard {
            session: Arc::clone(self),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            media_id: self.media_id.clone(),
            mode: self.decision.mode,
            variants: self
                .variants
                .iter()
                .map(|variant| variant.label.clone())
                .collect(),
            position_s: self.position(),
            active_requests: self.active_requests(),
            created_at: self.created_at,
        }
    }
}

/// Decrements the session's in-flight counter on every exit path.
pub struct ActiveRequestGuard {
    session: Arc<StreamSession>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.session.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub media_id: String,
    pub mode: TranscodeMode,
    pub variants: Vec<String>,
    pub position_s: f64,
    pub active_requests: usize,
    pub created_at: DateTime<Utc>,
}
