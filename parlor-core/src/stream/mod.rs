pub mod command;
pub mod decision;
pub mod error;
pub mod ladder;
pub mod locks;
pub mod playlist;
pub mod process;
pub mod session;
pub mod store;
pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{BinariesSection, SessionSection, StreamConfig, TranscodeSection};
use crate::probe::MediaProber;

pub use error::{StreamError, StreamResult};
pub use process::{HandleStatus, ProcessError, ProcessManager, TranscodeHandle};
pub use session::{ActiveRequestGuard, SessionSummary, StreamSession};
pub use store::{SegmentStore, StoreError};
pub use types::{
    ContainerFormat, QualityPolicy, QualityVariant, StreamingOptions, TranscodeDecision,
    TranscodeJob, TranscodeMode, TranscodeRequest,
};

use locks::KeyedLocks;

/// Maps a catalog media identifier to a playable file on disk. The catalog
/// itself lives outside this crate; the coordinator only needs this seam.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, media_id: &str) -> Option<PathBuf>;
}

/// Owns the session registry and composes probing, decisioning, ladder
/// construction, encoder supervision, segment storage, and playlist
/// generation behind the three mutating operations the boundary calls:
/// create, seek, destroy.
pub struct SessionCoordinator {
    binaries: BinariesSection,
    transcode: TranscodeSection,
    session_cfg: SessionSection,
    prober: MediaProber,
    resolver: Arc<dyn SourceResolver>,
    store: SegmentStore,
    processes: ProcessManager,
    sessions: StdMutex<HashMap<String, Arc<StreamSession>>>,
    session_locks: KeyedLocks,
    media_locks: KeyedLocks,
    capacity: Arc<Semaphore>,
}

impl SessionCoordinator {
    pub fn new(
        config: StreamConfig,
        prober: MediaProber,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        let store = SegmentStore::new(
            config.storage.segment_dir.clone(),
            config.transcode.poll_interval(),
        );
        let capacity = Arc::new(Semaphore::new(config.transcode.max_concurrent));
        Self {
            binaries: config.binaries,
            transcode: config.transcode,
            session_cfg: config.session,
            prober,
            resolver,
            store,
            processes: ProcessManager::new(),
            sessions: StdMutex::new(HashMap::new()),
            session_locks: KeyedLocks::new(),
            media_locks: KeyedLocks::new(),
            capacity,
        }
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Creates a session for a media item, or returns the one already
    /// serving it. The per-media lock makes concurrent creates for the
    /// same file collapse onto a single probe and job set.
    pub async fn create_session(
        &self,
        media_id: &str,
        options: StreamingOptions,
    ) -> StreamResult<Arc<StreamSession>> {
        let _media_guard = self.media_locks.lock(media_id).await;

        if let Some(existing) = self.session_for_media(media_id) {
            existing.touch();
            return Ok(existing);
        }

        let source = self
            .resolver
            .resolve(media_id)
            .ok_or_else(|| StreamError::UnknownMedia(media_id.to_string()))?;
        let probe = self.prober.probe(&source).await?;
        let decision = decision::decide(&probe, &options);
        let variants = ladder::build_ladder(&probe, &decision, &options);

        let session = StreamSession::new(
            media_id.to_string(),
            source,
            probe,
            decision,
            options,
            variants,
        );
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id().to_string(), Arc::clone(&session));

        let _session_guard = self.session_locks.lock(session.id()).await;
        for variant in session.variants().to_vec() {
            if let Err(error) = self.start_variant(&session, &variant, 0.0).await {
                self.sessions.lock().unwrap().remove(session.id());
                self.stop_all_handles(&session).await;
                let _ = self.store.delete_session(session.id()).await;
                return Err(error);
            }
        }

        info!(
            session = session.id(),
            media = media_id,
            mode = ?session.decision().mode,
            variants = session.variants().len(),
            "session created"
        );
        Ok(session)
    }

    /// Repositions a session. Serialized per session id so overlapping
    /// seeks can never leak an encoder process.
    pub async fn seek_session(&self, session_id: &str, position_s: f64) -> StreamResult<()> {
        let session = self.session(session_id)?;
        let _guard = self.session_locks.lock(session_id).await;
        session.set_position(position_s.max(0.0));
        for variant in session.variants().to_vec() {
            self.start_variant(&session, &variant, session.position())
                .await?;
        }
        info!(session = session_id, position = position_s, "seek applied");
        Ok(())
    }

    /// Tears a session down: waits a bounded grace for in-flight reads,
    /// then stops every encoder and removes the segment tree. The encoder
    /// processes are confirmed gone before this returns.
    pub async fn destroy_session(&self, session_id: &str) -> StreamResult<()> {
        let _guard = self.session_locks.lock(session_id).await;
        let session = self
            .sessions
            .lock()
            .unwrap()
            .remove(session_id)
            .ok_or_else(|| StreamError::SessionNotFound(session_id.to_string()))?;

        let deadline = tokio::time::Instant::now() + self.session_cfg.destroy_grace();
        while session.active_requests() > 0 && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(50)).await;
        }
        if session.active_requests() > 0 {
            warn!(
                session = session_id,
                in_flight = session.active_requests(),
                "destroying session with requests still in flight"
            );
        }

        self.teardown(&session).await;
        info!(session = session_id, "session destroyed");
        Ok(())
    }

    pub fn session(&self, session_id: &str) -> StreamResult<Arc<StreamSession>> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| StreamError::SessionNotFound(session_id.to_string()))?;
        session.touch();
        Ok(session)
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .map(|session| session.summary())
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    pub fn master_playlist(&self, session_id: &str) -> StreamResult<String> {
        let session = self.session(session_id)?;
        Ok(playlist::master_playlist(
            session.decision(),
            session.variants(),
        ))
    }

    pub fn media_playlist(
        &self,
        session_id: &str,
        variant: Option<&str>,
    ) -> StreamResult<String> {
        let session = self.session(session_id)?;
        if let Some(label) = variant {
            session
                .variant(label)
                .ok_or_else(|| StreamError::VariantNotFound(label.to_string()))?;
        }
        Ok(playlist::media_playlist(
            session.decision(),
            session.probe().duration_s,
            self.transcode.segment_duration_s,
        ))
    }

    /// Waits (bounded) for a segment and returns its bytes plus content
    /// type. Holds the session's active-request guard across the wait and
    /// the read so reaping never deletes files out from under a client.
    pub async fn serve_segment(
        &self,
        session_id: &str,
        variant: Option<&str>,
        name: &str,
    ) -> StreamResult<(Vec<u8>, &'static str)> {
        let session = self.session(session_id)?;
        let _guard = session.request_guard();

        let container = session.decision().container;
        let label = match variant {
            Some(label) => {
                session
                    .variant(label)
                    .ok_or_else(|| StreamError::VariantNotFound(label.to_string()))?
                    .label
                    .clone()
            }
            None => session.default_variant().label.clone(),
        };

        let is_init = container.init_segment() == Some(name);
        if name == "init.mp4" && !is_init {
            return Err(StreamError::InitSegmentUnavailable);
        }
        if !is_init && !name.ends_with(container.segment_extension()) {
            return Err(StoreError::SegmentNotFound {
                session: session_id.to_string(),
                name: name.to_string(),
            }
            .into());
        }

        let relative = format!("{label}/{name}");
        let found = self
            .store
            .wait_for_segment(session_id, &relative, self.transcode.segment_wait())
            .await?;
        if !found {
            return Err(StoreError::SegmentNotFound {
                session: session_id.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        let bytes = self.store.read_segment(session_id, &relative).await?;
        let content_type = if is_init {
            "video/mp4"
        } else {
            container.segment_content_type()
        };
        Ok((bytes, content_type))
    }

    /// One sweep of the idle reaper: destroys every session idle past the
    /// timeout, skipping any with a boundary request in flight. Takes the
    /// same per-session lock as seek/destroy so a reap never races an
    /// in-flight operation.
    pub async fn reap_idle_once(&self) -> usize {
        let idle_timeout = self.session_cfg.idle_timeout();
        let candidates: Vec<Arc<StreamSession>> =
            self.sessions.lock().unwrap().values().cloned().collect();
        let mut reaped = 0;
        for session in candidates {
            if session.idle_for() < idle_timeout || session.active_requests() > 0 {
                continue;
            }
            let _guard = self.session_locks.lock(session.id()).await;
            // Recheck under the lock; a request may have arrived meanwhile.
            if session.idle_for() < idle_timeout || session.active_requests() > 0 {
                continue;
            }
            if self.sessions.lock().unwrap().remove(session.id()).is_none() {
                continue;
            }
            self.teardown(&session).await;
            info!(session = session.id(), "idle session reaped");
            reaped += 1;
        }
        reaped
    }

    /// Background sweep driving `reap_idle_once` on the configured
    /// interval.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let interval = coordinator.session_cfg.reap_interval();
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                coordinator.reap_idle_once().await;
            }
        })
    }

    fn session_for_media(&self, media_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .find(|session| session.media_id() == media_id)
            .cloned()
    }

    /// Starts (or restarts) the encoder for one variant at the given
    /// position. Any previous handle for the (session, variant) pair is
    /// stopped first, so at most one lives at a time. A variant whose
    /// encoder cannot start is retried once on the next rung down, never
    /// with the identical job again.
    async fn start_variant(
        &self,
        session: &Arc<StreamSession>,
        variant: &QualityVariant,
        position_s: f64,
    ) -> StreamResult<()> {
        let previous = session.handles.lock().await.remove(&variant.label);
        if let Some(previous) = previous {
            self.processes.stop(&previous).await;
        }

        match self.launch(session, variant, position_s).await {
            Ok(handle) => {
                session
                    .handles
                    .lock()
                    .await
                    .insert(variant.label.clone(), handle);
                Ok(())
            }
            Err(StreamError::Process(error)) => {
                warn!(
                    session = session.id(),
                    variant = %variant.label,
                    %error,
                    "encoder failed to start, trying one rung down"
                );
                let lower = ladder::downgraded_variant(variant)
                    .ok_or(StreamError::Process(error))?;
                let handle = self.launch(session, &lower, position_s).await?;
                session
                    .handles
                    .lock()
                    .await
                    .insert(variant.label.clone(), handle);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn launch(
        &self,
        session: &Arc<StreamSession>,
        variant: &QualityVariant,
        position_s: f64,
    ) -> StreamResult<TranscodeHandle> {
        let permit = self
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| StreamError::MaxConcurrentTranscodes(self.transcode.max_concurrent))?;

        let output_dir = self
            .store
            .variant_dir(session.id(), &variant.label)
            .await?;
        let probe = session.probe();
        let request = TranscodeRequest {
            source: session.source().clone(),
            seek_offset_s: position_s,
            segment_duration_s: self.transcode.segment_duration_s,
            framerate: probe.framerate,
            has_audio: probe.audio_codec.is_some(),
            variant: variant.clone(),
            decision: session.decision().clone(),
        };
        let job = TranscodeJob::new(request, self.binaries.ffmpeg_path.clone(), output_dir);
        let args = command::build_args(&job);
        let handle = self
            .processes
            .start(&job.encoder, &args, &job.output_dir, Some(permit))
            .await?;
        Ok(handle)
    }

    async fn stop_all_handles(&self, session: &Arc<StreamSession>) {
        let handles: Vec<TranscodeHandle> =
            session.handles.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            self.processes.stop(&handle).await;
        }
    }

    async fn teardown(&self, session: &Arc<StreamSession>) {
        self.stop_all_handles(session).await;
        if let Err(error) = self.store.delete_session(session.id()).await {
            warn!(session = session.id(), %error, "failed to remove segment directory");
        }
    }
}
