//! Classification metrics over one split.

use crate::error::EngineError;
use crate::training::split::Split;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Predicted classes paired index-for-index with true labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    predictions: Vec<usize>,
    labels: Vec<usize>,
}

impl ClassificationResult {
    pub fn new(predictions: Vec<usize>, labels: Vec<usize>) -> Result<Self, EngineError> {
        if predictions.len() != labels.len() {
            return Err(EngineError::misaligned(format!(
                "{} predictions for {} labels",
                predictions.len(),
                labels.len()
            )));
        }
        Ok(Self {
            predictions,
            labels,
        })
    }

    pub fn predictions(&self) -> &[usize] {
        &self.predictions
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of examples whose prediction matches the label.
    pub fn correct(&self) -> usize {
        self.pairs().filter(|(p, l)| p == l).count()
    }

    /// Fraction of correct predictions; `None` when there are no examples.
    pub fn accuracy(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.correct() as f64 / self.len() as f64)
    }

    /// Accuracy restricted to each true class.
    ///
    /// Keys cover every class seen in either labels or predictions. A class that
    /// only ever appears as a prediction has no true examples, so its accuracy
    /// is `None`.
    pub fn accuracy_by_class(&self) -> BTreeMap<usize, Option<f64>> {
        let mut counts: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
        for (&pred, &label) in self.pairs() {
            let entry = counts.entry(label).or_default();
            entry.1 += 1;
            if pred == label {
                entry.0 += 1;
            }
            counts.entry(pred).or_default();
        }
        counts
            .into_iter()
            .map(|(class, (correct, total))| {
                let acc = (total > 0).then(|| correct as f64 / total as f64);
                (class, acc)
            })
            .collect()
    }

    /// One past the largest class index seen in labels or predictions.
    pub fn num_classes(&self) -> usize {
        self.labels
            .iter()
            .chain(self.predictions.iter())
            .max()
            .map_or(0, |&max| max + 1)
    }

    /// Counts indexed `[true class][predicted class]`.
    pub fn confusion_matrix(&self) -> Vec<Vec<usize>> {
        let n = self.num_classes();
        let mut matrix = vec![vec![0usize; n]; n];
        for (&pred, &label) in self.pairs() {
            matrix[label][pred] += 1;
        }
        matrix
    }

    fn pairs(&self) -> impl Iterator<Item = (&usize, &usize)> {
        self.predictions.iter().zip(self.labels.iter())
    }
}

/// Reduced metrics for one split of one epoch (or the test pass).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub split: Split,
    /// Mean batch loss rounded to 6 decimals; `None` for the test split.
    pub loss: Option<f64>,
    pub accuracy: f64,
    /// Per-class accuracy; `None` for classes without true examples.
    pub class_accuracy: BTreeMap<usize, Option<f64>>,
    /// Counts indexed `[true class][predicted class]`.
    #[serde(default)]
    pub confusion_matrix: Vec<Vec<usize>>,
    pub examples: usize,
    pub batches: usize,
}
