use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionStatus;

/// Core error type for the orchestration engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("research session {0} not found")]
    SessionNotFound(Uuid),
    #[error("invalid status transition {from:?} -> {to:?} for session {session_id}")]
    InvalidTransition {
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("parent chain of session {0} revisits session {1}")]
    LineageCycle(Uuid, Uuid),
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}
