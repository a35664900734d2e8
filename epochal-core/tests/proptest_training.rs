//! Property-based tests for reduction and best-model selection using proptest.

use proptest::prelude::*;

use epochal_core::training::{SplitAccumulator, argmax, mean_loss};
use epochal_core::{
    Batch, BatchStream, CheckpointSink, EngineConfig, EngineError, EpochOrchestrator,
    IterationRunner, LossBatch, Split,
};
use std::collections::VecDeque;
use std::path::Path;

/// Runner whose validation split yields one batch per epoch with the given
/// number of correct examples (out of 4) and loss.
struct ScriptRunner {
    validate: VecDeque<(usize, f64)>,
    saves: usize,
}

impl IterationRunner for ScriptRunner {
    type Input = ();

    fn train(&mut self) -> Result<BatchStream<'_, LossBatch<()>>, EngineError> {
        Ok(Box::new(std::iter::once(Ok::<_, EngineError>(
            Batch::new((), vec![0], vec![vec![1.0, 0.0]]).with_loss(1.0),
        ))))
    }

    fn validate(&mut self) -> Result<BatchStream<'_, LossBatch<()>>, EngineError> {
        let (correct, loss) = self
            .validate
            .pop_front()
            .ok_or_else(|| EngineError::iteration("script exhausted"))?;
        let scores = (0..4)
            .map(|i| if i < correct { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect();
        Ok(Box::new(std::iter::once(Ok::<_, EngineError>(
            Batch::new((), vec![0; 4], scores).with_loss(loss),
        ))))
    }

    fn test(&mut self) -> Result<BatchStream<'_, Batch<()>>, EngineError> {
        Ok(Box::new(std::iter::empty()))
    }
}

impl CheckpointSink for ScriptRunner {
    fn save(&mut self, _path: &Path) -> Result<(), EngineError> {
        self.saves += 1;
        Ok(())
    }
}

// --- Best-tracker properties ---

proptest! {
    #[test]
    fn trackers_are_monotonic_and_saves_match_improvements(
        script in prop::collection::vec((0usize..=4, 0.0f64..10.0), 1..20)
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = EngineConfig {
            train_epochs: script.len(),
            save_best_model: true,
            weights_dir: dir.path().to_path_buf(),
            ..EngineConfig::new("prop")
        };
        let runner = ScriptRunner { validate: script.iter().copied().collect(), saves: 0 };
        let mut orchestrator = EpochOrchestrator::new(config, runner).unwrap();

        let report = orchestrator.train().unwrap();

        let mut best_acc = f64::NEG_INFINITY;
        let mut best_loss = f64::INFINITY;
        let mut expected_saves = 0;
        for record in &report.epochs {
            let acc = record.validate.accuracy;
            let loss = record.validate.loss.unwrap();
            prop_assert_eq!(record.new_best_accuracy, acc > best_acc);
            prop_assert_eq!(record.new_best_loss, loss < best_loss);
            expected_saves += usize::from(acc > best_acc) + usize::from(loss < best_loss);
            prop_assert_eq!(
                record.checkpoints.len(),
                usize::from(acc > best_acc) + usize::from(loss < best_loss)
            );
            best_acc = best_acc.max(acc);
            best_loss = best_loss.min(loss);
        }
        prop_assert_eq!(report.best.highest_validation_acc, best_acc);
        prop_assert_eq!(report.best.lowest_validation_loss, best_loss);
        prop_assert_eq!(orchestrator.runner().saves, expected_saves);
    }
}

// --- Reduction properties ---

proptest! {
    #[test]
    fn mean_loss_is_within_bounds(losses in prop::collection::vec(0.0f64..100.0, 1..64)) {
        let mean = mean_loss(&losses, Split::Train).unwrap();
        let min = losses.iter().copied().fold(f64::INFINITY, f64::min);
        let max = losses.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(mean >= min - 1e-6 && mean <= max + 1e-6);
    }

    #[test]
    fn argmax_picks_first_maximum(scores in prop::collection::vec(-5i32..5, 1..16)) {
        let as_f64: Vec<f64> = scores.iter().map(|&s| f64::from(s)).collect();
        let idx = argmax(&as_f64).unwrap();
        let max = *scores.iter().max().unwrap();
        prop_assert_eq!(scores[idx], max);
        prop_assert!(scores[..idx].iter().all(|&s| s < max));
    }

    #[test]
    fn accuracy_is_a_fraction(
        labels in prop::collection::vec(0usize..3, 1..50),
        seed in any::<u64>(),
    ) {
        let scores: Vec<Vec<f64>> = labels
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let x = seed.wrapping_add(i as u64);
                vec![(x % 7) as f64, (x % 5) as f64, (x % 3) as f64]
            })
            .collect();
        let mut acc = SplitAccumulator::new(Split::Test);
        acc.push(Batch::new((), labels.clone(), scores)).unwrap();
        let metrics = acc.finish().unwrap();
        prop_assert!((0.0..=1.0).contains(&metrics.accuracy));
        prop_assert_eq!(metrics.examples, labels.len());
        for class in labels {
            prop_assert!(metrics.class_accuracy[&class].is_some());
        }
    }
}
