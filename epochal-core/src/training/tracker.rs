//! Running best validation metrics.

use crate::training::checkpoint::Criterion;
use serde::{Deserialize, Serialize};

/// Highest validation accuracy and lowest validation loss seen in a run.
///
/// Both values only ever move in their improving direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestTracker {
    pub highest_validation_acc: f64,
    pub lowest_validation_loss: f64,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self {
            highest_validation_acc: f64::NEG_INFINITY,
            lowest_validation_loss: f64::INFINITY,
        }
    }
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current best for a criterion.
    pub fn best(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Accuracy => self.highest_validation_acc,
            Criterion::Loss => self.lowest_validation_loss,
        }
    }

    pub fn is_improvement(&self, criterion: Criterion, value: f64) -> bool {
        criterion.improves(value, self.best(criterion))
    }

    /// Take `value` as the new best if it strictly improves on the current one.
    /// Returns the previous best when it does.
    pub fn update(&mut self, criterion: Criterion, value: f64) -> Option<f64> {
        if !self.is_improvement(criterion, value) {
            return None;
        }
        let slot = match criterion {
            Criterion::Accuracy => &mut self.highest_validation_acc,
            Criterion::Loss => &mut self.lowest_validation_loss,
        };
        Some(std::mem::replace(slot, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_extrema() {
        let tracker = BestTracker::new();
        assert_eq!(tracker.highest_validation_acc, f64::NEG_INFINITY);
        assert_eq!(tracker.lowest_validation_loss, f64::INFINITY);
    }

    #[test]
    fn test_update_returns_previous() {
        let mut tracker = BestTracker::new();
        assert_eq!(tracker.update(Criterion::Accuracy, 0.5), Some(f64::NEG_INFINITY));
        assert_eq!(tracker.update(Criterion::Accuracy, 0.5), None);
        assert_eq!(tracker.update(Criterion::Accuracy, 0.4), None);
        assert_eq!(tracker.update(Criterion::Accuracy, 0.7), Some(0.5));
        assert_eq!(tracker.highest_validation_acc, 0.7);

        assert_eq!(tracker.update(Criterion::Loss, 0.9), Some(f64::INFINITY));
        assert_eq!(tracker.update(Criterion::Loss, 1.2), None);
        assert_eq!(tracker.lowest_validation_loss, 0.9);
    }

    #[test]
    fn test_nan_never_improves() {
        let mut tracker = BestTracker::new();
        assert_eq!(tracker.update(Criterion::Accuracy, f64::NAN), None);
        assert_eq!(tracker.update(Criterion::Loss, f64::NAN), None);
        assert_eq!(tracker.highest_validation_acc, f64::NEG_INFINITY);
        assert_eq!(tracker.lowest_validation_loss, f64::INFINITY);
    }
}
