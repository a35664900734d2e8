//! Error types for the epochal-core crate.

use crate::training::split::Split;
use thiserror::Error;

/// Top-level error type for training and evaluation runs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The iteration runner failed while producing a split's batches.
    #[error("Iteration error: {0}")]
    Iteration(String),

    /// The checkpoint sink failed to write a snapshot.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// A split produced no batches (or no examples), so its metrics are undefined.
    #[error("Split '{split}' produced no batches; check the data configuration")]
    EmptySplit { split: Split },

    /// Labels and prediction scores do not line up.
    #[error("Misaligned batch: {0}")]
    Misaligned(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl EngineError {
    pub fn iteration(msg: impl Into<String>) -> Self {
        Self::Iteration(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn misaligned(msg: impl Into<String>) -> Self {
        Self::Misaligned(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from a collaborator (runner or sink) rather
    /// than from the orchestrator's own checks.
    pub fn is_collaborator_fault(&self) -> bool {
        matches!(self, Self::Iteration(_) | Self::Checkpoint(_))
    }
}
