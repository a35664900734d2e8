//! Reduction of per-batch results into split-level metrics.

use crate::error::EngineError;
use crate::training::metrics::{ClassificationResult, SplitMetrics};
use crate::training::runner::{Batch, LossBatch};
use crate::training::split::Split;

/// Decimal places kept on the mean loss. This is the value compared against
/// the running best.
pub const LOSS_DECIMALS: i32 = 6;

/// Decimal places used when logging accuracy.
pub const DISPLAY_DECIMALS: i32 = 4;

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Index of the largest score. Ties go to the lowest index and NaN never beats
/// a number. `None` for an empty row.
pub fn argmax(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            None => best = Some((i, score)),
            Some((_, current)) if score > current || (current.is_nan() && !score.is_nan()) => {
                best = Some((i, score))
            }
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

/// Arithmetic mean of batch losses, rounded to [`LOSS_DECIMALS`].
pub fn mean_loss(losses: &[f64], split: Split) -> Result<f64, EngineError> {
    if losses.is_empty() {
        return Err(EngineError::EmptySplit { split });
    }
    let mean = losses.iter().sum::<f64>() / losses.len() as f64;
    Ok(round_to(mean, LOSS_DECIMALS))
}

/// Collects a split's batches in order, then reduces them in one step.
#[derive(Debug)]
pub struct SplitAccumulator {
    split: Split,
    losses: Vec<f64>,
    labels: Vec<usize>,
    scores: Vec<Vec<f64>>,
    batches: usize,
    num_classes: Option<usize>,
}

impl SplitAccumulator {
    pub fn new(split: Split) -> Self {
        Self {
            split,
            losses: Vec::new(),
            labels: Vec::new(),
            scores: Vec::new(),
            batches: 0,
            num_classes: None,
        }
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Append a train/validate batch and its loss.
    pub fn push_with_loss<I>(&mut self, batch: LossBatch<I>) -> Result<(), EngineError> {
        if !batch.loss.is_finite() {
            tracing::warn!(
                split = %self.split,
                batch = self.batches,
                loss = batch.loss,
                "Non-finite batch loss"
            );
        }
        self.push(batch.batch)?;
        self.losses.push(batch.loss);
        Ok(())
    }

    /// Append a batch's labels and score rows.
    pub fn push<I>(&mut self, batch: Batch<I>) -> Result<(), EngineError> {
        let Batch { labels, scores, .. } = batch;
        if labels.len() != scores.len() {
            return Err(EngineError::misaligned(format!(
                "{} batch {}: {} labels but {} score rows",
                self.split,
                self.batches,
                labels.len(),
                scores.len()
            )));
        }
        for row in &scores {
            let width = *self.num_classes.get_or_insert(row.len());
            if row.is_empty() || row.len() != width {
                return Err(EngineError::misaligned(format!(
                    "{} batch {}: score row has {} classes, expected {}",
                    self.split,
                    self.batches,
                    row.len(),
                    width.max(1)
                )));
            }
        }
        self.labels.extend(labels);
        self.scores.extend(scores);
        self.batches += 1;
        Ok(())
    }

    /// Reduce everything collected so far into split metrics.
    pub fn finish(self) -> Result<SplitMetrics, EngineError> {
        if self.batches == 0 || self.labels.is_empty() {
            return Err(EngineError::EmptySplit { split: self.split });
        }
        let loss = if self.split.has_loss() {
            Some(mean_loss(&self.losses, self.split)?)
        } else {
            None
        };

        // Rows were validated as non-empty on push.
        let predictions: Vec<usize> = self
            .scores
            .iter()
            .map(|row| argmax(row).unwrap_or_default())
            .collect();
        let examples = self.labels.len();
        let result = ClassificationResult::new(predictions, self.labels)?;
        let accuracy = result
            .accuracy()
            .ok_or(EngineError::EmptySplit { split: self.split })?;

        Ok(SplitMetrics {
            split: self.split,
            loss,
            accuracy,
            class_accuracy: result.accuracy_by_class(),
            confusion_matrix: result.confusion_matrix(),
            examples,
            batches: self.batches,
        })
    }
}
