use crate::types::ActorId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Presentation error: {0}")]
    Presentation(#[from] PresentationError),

    /// A session or index entry references actors that cannot be valid.
    #[error("Integrity violation: {detail}")]
    Integrity { detail: String },

    #[error("Storage unavailable: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    pub fn integrity(detail: impl Into<String>) -> Self {
        Self::Integrity { detail: detail.into() }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

/// Raised by a presentation collaborator when it cannot render for an actor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("presentation failed for {actor}: {detail}")]
pub struct PresentationError {
    pub actor:  ActorId,
    pub detail: String,
}

pub type SimResult<T> = Result<T, SimError>;
