//! # epochal-core: epoch orchestration for supervised classifiers
//!
//! Drives a model through train/validate epochs, reduces per-batch losses and
//! scores into split metrics, and snapshots the model whenever validation
//! accuracy or validation loss reaches a new best.
//!
//! The model, data pipeline, and optimizer stay behind two traits:
//! [`IterationRunner`] yields batches for a split, and [`CheckpointSink`]
//! writes the current model state to a path.

pub mod config;
pub mod error;
pub mod persistence;
pub mod training;

// Re-exports
pub use config::{ConfigOverrides, EngineConfig, load_config};
pub use error::EngineError;
pub use training::{
    Batch, BatchStream, BestTracker, CheckpointManager, CheckpointNaming, CheckpointSink,
    ClassificationResult, Criterion, EpochOrchestrator, IterationRunner, LossBatch, Split,
    SplitMetrics, TestReport, TrainingReport,
};
