use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::fs;
use tokio::time::{sleep, Instant};
use tracing::debug;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("segment {name} not found for session {session}")]
    SegmentNotFound { session: String, name: String },
    #[error("segment path escapes the session directory: {0}")]
    InvalidSegmentPath(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// On-disk home of every session's chunked output: one directory per
/// session, one nested directory per quality variant. The encoder writes
/// segments here directly; this component only resolves, reads, waits, and
/// deletes. Existing segments are never rewritten, which is what makes
/// concurrent reads and polling waits safe.
pub struct SegmentStore {
    base: PathBuf,
    poll_interval: Duration,
}

impl SegmentStore {
    pub fn new(base: PathBuf, poll_interval: Duration) -> Self {
        Self {
            base,
            poll_interval,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Creates (if needed) and returns the session's directory.
    pub async fn output_dir(&self, session_id: &str) -> StoreResult<PathBuf> {
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir).await.map_err(|source| StoreError::Io {
            source,
            path: dir.clone(),
        })?;
        Ok(dir)
    }

    /// Creates (if needed) and returns the per-variant directory the
    /// encoder writes into.
    pub async fn variant_dir(&self, session_id: &str, label: &str) -> StoreResult<PathBuf> {
        validate_component(label)?;
        let dir = self.session_dir(session_id)?.join(label);
        fs::create_dir_all(&dir).await.map_err(|source| StoreError::Io {
            source,
            path: dir.clone(),
        })?;
        Ok(dir)
    }

    pub async fn read_segment(&self, session_id: &str, name: &str) -> StoreResult<Vec<u8>> {
        let path = self.resolve(session_id, name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::SegmentNotFound {
                    session: session_id.to_string(),
                    name: name.to_string(),
                })
            }
            Err(source) => Err(StoreError::Io { source, path }),
        }
    }

    pub async fn segment_exists(&self, session_id: &str, name: &str) -> StoreResult<bool> {
        let path = self.resolve(session_id, name)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    /// Polls for the segment at a fixed interval until it appears or the
    /// timeout elapses. Returns `true` iff the segment exists at or before
    /// the deadline; never sleeps past the deadline by more than one poll
    /// interval. Deliberately blocking so the boundary can turn "not yet
    /// produced" into a bounded wait instead of an instant 404.
    pub async fn wait_for_segment(
        &self,
        session_id: &str,
        name: &str,
        wait: Duration,
    ) -> StoreResult<bool> {
        let deadline = Instant::now() + wait;
        loop {
            if self.segment_exists(session_id, name).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Recursively removes the session's directory tree. Removing an
    /// already-absent session is not an error.
    pub async fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        let dir = self.session_dir(session_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(session = session_id, "segment directory removed");
                Ok(())
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { source, path: dir }),
        }
    }

    fn session_dir(&self, session_id: &str) -> StoreResult<PathBuf> {
        validate_component(session_id)?;
        Ok(self.base.join(session_id))
    }

    /// Resolves a segment name inside the session sandbox. Every component
    /// must be a plain path segment; anything that could climb out of the
    /// session directory is rejected before any filesystem call.
    fn resolve(&self, session_id: &str, name: &str) -> StoreResult<PathBuf> {
        let dir = self.session_dir(session_id)?;
        if name.is_empty() {
            return Err(StoreError::InvalidSegmentPath(name.to_string()));
        }
        let relative = Path::new(name);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StoreError::InvalidSegmentPath(name.to_string())),
            }
        }
        Ok(dir.join(relative))
    }
}

fn validate_component(value: &str) -> StoreResult<()> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StoreError::InvalidSegmentPath(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(base: &Path) -> SegmentStore {
        SegmentStore::new(base.to_path_buf(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn read_returns_bytes_written_by_the_encoder() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let variant = store.variant_dir("sess", "720p").await.unwrap();
        std::fs::write(variant.join("00000.ts"), b"segment bytes").unwrap();

        assert!(store.segment_exists("sess", "720p/00000.ts").await.unwrap());
        let bytes = store.read_segment("sess", "720p/00000.ts").await.unwrap();
        assert_eq!(bytes, b"segment bytes");
    }

    #[tokio::test]
    async fn missing_segment_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.output_dir("sess").await.unwrap();
        let err = store.read_segment("sess", "720p/00000.ts").await.unwrap_err();
        assert!(matches!(err, StoreError::SegmentNotFound { .. }));
    }

    #[tokio::test]
    async fn traversal_names_are_rejected_before_any_io() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        for name in [
            "../outside.ts",
            "720p/../../outside.ts",
            "/etc/passwd",
            "..",
            "",
        ] {
            let err = store.read_segment("sess", name).await.unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidSegmentPath(_)),
                "expected rejection for {name:?}"
            );
        }
        let err = store.read_segment("../sess", "00000.ts").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSegmentPath(_)));
    }

    #[tokio::test]
    async fn wait_returns_true_when_segment_appears() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let variant = store.variant_dir("sess", "720p").await.unwrap();
        let target = variant.join("00001.ts");

        tokio::spawn(async move {
            sleep(Duration::from_millis(60)).await;
            std::fs::write(target, b"late").unwrap();
        });

        let found = store
            .wait_for_segment("sess", "720p/00001.ts", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(found);
    }

    #[tokio::test]
    async fn wait_returns_false_at_timeout_and_does_not_overrun() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.variant_dir("sess", "720p").await.unwrap();

        let started = std::time::Instant::now();
        let found = store
            .wait_for_segment("sess", "720p/none.ts", Duration::from_millis(100))
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(!found);
        assert!(elapsed >= Duration::from_millis(100));
        // timeout plus at most one poll interval, with scheduling slack
        assert!(elapsed < Duration::from_millis(400), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn delete_then_recreate_yields_fresh_empty_directory() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let variant = store.variant_dir("sess", "720p").await.unwrap();
        std::fs::write(variant.join("00000.ts"), b"x").unwrap();

        store.delete_session("sess").await.unwrap();
        assert!(!dir.path().join("sess").exists());
        // deleting again is a no-op
        store.delete_session("sess").await.unwrap();

        let fresh = store.output_dir("sess").await.unwrap();
        assert!(fresh.exists());
        assert_eq!(std::fs::read_dir(&fresh).unwrap().count(), 0);
    }
}
