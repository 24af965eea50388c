//! Session snapshots for save/load.
//!
//! A snapshot is the whole [`SessionState`] plus the party, serialized as
//! JSON. Loading a path that does not exist is not an error; the caller
//! gets `None` and starts a fresh session.

use crate::party::Party;
use crate::state::{Phase, SessionState};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Inconsistent session state: {0}")]
    InvalidState(String),
}

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to resume a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Format version for compatibility checking.
    pub version: u32,

    /// Seconds since the Unix epoch when the snapshot was taken.
    pub saved_at: String,

    pub state: SessionState,

    pub party: Option<Party>,
}

impl SessionSnapshot {
    pub fn new(state: SessionState, party: Option<Party>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: timestamp_now(),
            state,
            party,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode and check a snapshot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistError> {
        let snapshot: Self = serde_json::from_slice(bytes)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }

        snapshot.state.check().map_err(PersistError::InvalidState)?;
        if snapshot.state.phase != Phase::Start && snapshot.party.is_none() {
            return Err(PersistError::InvalidState(format!(
                "phase {} without a party",
                snapshot.state.phase
            )));
        }

        Ok(snapshot)
    }

    /// Write the snapshot to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        fs::write(path, self.to_bytes()?).await?;
        Ok(())
    }

    /// Read a snapshot, returning `None` when the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Option<Self>, PersistError> {
        match fs::read(path).await {
            Ok(bytes) => Self::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn timestamp_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}
