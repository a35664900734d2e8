//! Training infrastructure: runners, reduction, metrics, checkpoints, orchestration.

pub mod checkpoint;
pub mod metrics;
pub mod orchestrator;
pub mod reduce;
pub mod runner;
pub mod split;
pub mod tracker;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointNaming, CheckpointSink, Criterion};
pub use metrics::{ClassificationResult, SplitMetrics};
pub use orchestrator::{EpochOrchestrator, EpochRecord, Phase, TestReport, TrainingReport};
pub use reduce::{SplitAccumulator, argmax, mean_loss, round_to};
pub use runner::{Batch, BatchStream, IterationRunner, LossBatch};
pub use split::Split;
pub use tracker::BestTracker;
