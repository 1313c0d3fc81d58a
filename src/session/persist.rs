// src/session/persist.rs

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::ExamConfig;
use crate::models::attempt::{ExamSession, SessionSnapshot};
use crate::models::question::{QuestionBank, QuestionKey};

/// Fixed key under which the running session is snapshotted.
pub const SESSION_STATE_KEY: &str = "exam_session_state";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot store I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Best-effort local durable store.
///
/// Persistence is a resilience aid, not a correctness dependency: every
/// caller must keep working in memory when these operations fail, so the
/// interface is explicit about fallibility instead of swallowing it.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Snapshots as JSON files under a directory, one file per key.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path(key), value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fallback used when no durable store is available. The engine runs
/// purely in memory; restore always comes back empty.
pub struct NoopStore;

#[async_trait]
impl SnapshotStore for NoopStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Writes one autosave snapshot. Failures are logged and swallowed; the
/// session continues in memory.
pub async fn autosave(store: &dyn SnapshotStore, snapshot: &SessionSnapshot) {
    let raw = match serde_json::to_string(snapshot) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("could not serialize session snapshot: {}", e);
            return;
        }
    };
    if let Err(e) = store.set(SESSION_STATE_KEY, &raw).await {
        tracing::warn!("could not save session snapshot: {}", e);
    }
}

/// Deletes the snapshot on a terminal transition.
pub async fn clear(store: &dyn SnapshotStore) {
    if let Err(e) = store.delete(SESSION_STATE_KEY).await {
        tracing::warn!("could not clear session snapshot: {}", e);
    }
}

/// Attempts to recover a previously saved session.
///
/// A snapshot is rejected (treated as absent, and removed) when it is older
/// than the configured staleness bound, when its saved position is not a
/// valid question in the supplied bank, or when it fails to parse. A valid
/// snapshot resumes directly into `InProgress` instead of re-running
/// `start()`.
pub async fn restore(
    store: &dyn SnapshotStore,
    config: &ExamConfig,
    bank: &QuestionBank,
) -> Option<ExamSession> {
    let raw = match store.get(SESSION_STATE_KEY).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("could not read session snapshot: {}", e);
            return None;
        }
    };

    let snapshot: SessionSnapshot = match serde_json::from_str(&raw) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("discarding unparseable session snapshot: {}", e);
            clear(store).await;
            return None;
        }
    };

    let age = Utc::now().timestamp() - snapshot.saved_at_unix;
    if age < 0 || age as u64 > config.snapshot_staleness_secs {
        tracing::warn!(age_secs = age, "saved session is too old, ignoring");
        clear(store).await;
        return None;
    }

    // The saved position must still be a valid key in the current bank;
    // papers can be re-uploaded with fewer questions between sessions.
    let session = snapshot.session;
    let position = QuestionKey::new(&session.current_section, session.current_ordinal);
    if bank.question(&position).is_none() {
        tracing::warn!(
            position = %position,
            "saved session position is not in the current paper, ignoring"
        );
        clear(store).await;
        return None;
    }

    tracing::info!(attempt_id = %session.attempt_id, "session restored from snapshot");
    Some(session)
}
