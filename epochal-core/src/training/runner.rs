//! Iteration runner: the collaborator that owns the model, optimizer, and data.
//!
//! The orchestrator never touches model state directly. It asks the runner for
//! a split's batch sequence, drains it, and reduces what comes back.

use crate::error::EngineError;

/// One batch of model output for a split.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<I> {
    /// The input batch as the runner fed it to the model. The orchestrator
    /// does not inspect it.
    pub input: I,
    /// Ground-truth class index per example.
    pub labels: Vec<usize>,
    /// Raw class scores per example, one row per label.
    pub scores: Vec<Vec<f64>>,
}

impl<I> Batch<I> {
    pub fn new(input: I, labels: Vec<usize>, scores: Vec<Vec<f64>>) -> Self {
        Self {
            input,
            labels,
            scores,
        }
    }

    /// Attach the batch loss (train/validate splits).
    pub fn with_loss(self, loss: f64) -> LossBatch<I> {
        LossBatch { batch: self, loss }
    }
}

/// A batch from the train or validate split, which also carries the loss.
#[derive(Debug, Clone, PartialEq)]
pub struct LossBatch<I> {
    pub batch: Batch<I>,
    pub loss: f64,
}

/// Lazy, finite sequence of batches. Any item may be a collaborator fault.
pub type BatchStream<'a, B> = Box<dyn Iterator<Item = Result<B, EngineError>> + 'a>;

/// Produces per-batch results for each split.
///
/// Each call starts a fresh pass: the returned stream is consumed exactly once
/// per split per epoch and is not reused.
pub trait IterationRunner {
    /// Input batch type, passed through untouched.
    type Input;

    /// One training pass (forward, loss, backward, optimizer step per batch).
    fn train(&mut self) -> Result<BatchStream<'_, LossBatch<Self::Input>>, EngineError>;

    /// One validation pass. No parameter updates.
    fn validate(&mut self) -> Result<BatchStream<'_, LossBatch<Self::Input>>, EngineError>;

    /// One pass over the held-out test split. No loss is reported.
    fn test(&mut self) -> Result<BatchStream<'_, Batch<Self::Input>>, EngineError>;
}
