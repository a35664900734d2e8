//! Epoch orchestrator: drives train/validate epochs and the test pass.
//!
//! Every epoch runs the train split and then the validate split, draining
//! each batch stream completely before reducing it. After validation the
//! accuracy and loss are compared against the run's best values, and each
//! strict improvement writes a snapshot when `save_best_model` is on.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::training::checkpoint::{Checkpoint, CheckpointManager, CheckpointSink, Criterion};
use crate::training::metrics::SplitMetrics;
use crate::training::reduce::{DISPLAY_DECIMALS, SplitAccumulator, round_to};
use crate::training::runner::IterationRunner;
use crate::training::split::Split;
use crate::training::tracker::BestTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the orchestrator is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    RunningTrain,
    RunningValidate,
    RunningTest,
}

/// Metrics and snapshots for one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number.
    pub epoch: usize,
    pub train: SplitMetrics,
    pub validate: SplitMetrics,
    pub new_best_accuracy: bool,
    pub new_best_loss: bool,
    /// Snapshots written at the end of this epoch (zero, one, or two).
    pub checkpoints: Vec<Checkpoint>,
}

/// Outcome of a full `train()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: String,
    pub epochs: Vec<EpochRecord>,
    pub best: BestTracker,
    /// 1-based epoch of the highest validation accuracy.
    pub best_accuracy_epoch: Option<usize>,
    /// 1-based epoch of the lowest validation loss.
    pub best_loss_epoch: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TrainingReport {
    /// Every snapshot written during the run, in order.
    pub fn checkpoints(&self) -> impl Iterator<Item = &Checkpoint> {
        self.epochs.iter().flat_map(|e| e.checkpoints.iter())
    }
}

/// Outcome of a `test()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub run_id: String,
    pub metrics: SplitMetrics,
}

impl TestReport {
    pub fn accuracy(&self) -> f64 {
        self.metrics.accuracy
    }
}

#[derive(Debug, Default)]
struct Selection {
    new_best_accuracy: bool,
    new_best_loss: bool,
    checkpoints: Vec<Checkpoint>,
}

/// Drives a runner through epochs and applies the best-model policy.
pub struct EpochOrchestrator<R> {
    config: EngineConfig,
    runner: R,
    checkpoints: CheckpointManager,
    tracker: BestTracker,
    phase: Phase,
}

impl<R> EpochOrchestrator<R>
where
    R: IterationRunner + CheckpointSink,
{
    pub fn new(config: EngineConfig, runner: R) -> Result<Self, EngineError> {
        config.validate()?;
        let checkpoints = CheckpointManager::from_config(&config);
        Ok(Self {
            config,
            runner,
            checkpoints,
            tracker: BestTracker::new(),
            phase: Phase::Idle,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Best values of the current (or last) `train()` call.
    pub fn tracker(&self) -> &BestTracker {
        &self.tracker
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run `train_epochs` epochs of train then validate.
    ///
    /// The best trackers and, when saving, the run's checkpoint manifest start
    /// fresh on every call. Any fault from the runner or the sink aborts the run
    /// immediately and is returned unchanged.
    pub fn train(&mut self) -> Result<TrainingReport, EngineError> {
        self.tracker = BestTracker::new();
        let result = self.run_epochs();
        self.phase = Phase::Idle;
        if let Err(e) = &result {
            tracing::error!(run_id = %self.config.run_id, error = %e, "Training aborted");
        }
        result
    }

    /// One pass over the test split. Never writes checkpoints.
    pub fn test(&mut self) -> Result<TestReport, EngineError> {
        let result = self.run_test();
        self.phase = Phase::Idle;
        if let Err(e) = &result {
            tracing::error!(run_id = %self.config.run_id, error = %e, "Test aborted");
        }
        result
    }

    fn run_epochs(&mut self) -> Result<TrainingReport, EngineError> {
        let num_epochs = self.config.train_epochs;
        let started_at = Utc::now();
        let mut epochs = Vec::with_capacity(num_epochs);
        let mut best_accuracy_epoch = None;
        let mut best_loss_epoch = None;

        // The manifest describes this call only, matching the fresh trackers.
        if self.config.save_best_model {
            self.checkpoints.reset_manifest()?;
        }

        for epoch in 0..num_epochs {
            tracing::info!("========== Epoch {}/{} ==========", epoch + 1, num_epochs);

            self.phase = Phase::RunningTrain;
            let train = self.run_loss_split(Split::Train)?;

            self.phase = Phase::RunningValidate;
            let validate = self.run_loss_split(Split::Validate)?;

            let selection = self.select_best(epoch, &validate)?;
            if selection.new_best_accuracy {
                best_accuracy_epoch = Some(epoch + 1);
            }
            if selection.new_best_loss {
                best_loss_epoch = Some(epoch + 1);
            }

            epochs.push(EpochRecord {
                epoch: epoch + 1,
                train,
                validate,
                new_best_accuracy: selection.new_best_accuracy,
                new_best_loss: selection.new_best_loss,
                checkpoints: selection.checkpoints,
            });

            tracing::info!("========== End epoch {}/{} ==========", epoch + 1, num_epochs);
        }

        Ok(TrainingReport {
            run_id: self.config.run_id.clone(),
            epochs,
            best: self.tracker,
            best_accuracy_epoch,
            best_loss_epoch,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn run_loss_split(&mut self, split: Split) -> Result<SplitMetrics, EngineError> {
        debug_assert!(split.has_loss());
        tracing::info!(split = %split, "Running {split}...");

        let mut acc = SplitAccumulator::new(split);
        let stream = if split == Split::Train {
            self.runner.train()?
        } else {
            self.runner.validate()?
        };
        for item in stream {
            acc.push_with_loss(item?)?;
        }

        let metrics = acc.finish()?;
        log_split(&metrics);
        Ok(metrics)
    }

    fn run_test(&mut self) -> Result<TestReport, EngineError> {
        self.phase = Phase::RunningTest;
        tracing::info!("Running test set...");

        let mut acc = SplitAccumulator::new(Split::Test);
        for item in self.runner.test()? {
            acc.push(item?)?;
        }

        let metrics = acc.finish()?;
        log_split(&metrics);
        Ok(TestReport {
            run_id: self.config.run_id.clone(),
            metrics,
        })
    }

    fn select_best(
        &mut self,
        epoch: usize,
        validate: &SplitMetrics,
    ) -> Result<Selection, EngineError> {
        let loss = validate
            .loss
            .ok_or(EngineError::EmptySplit { split: validate.split })?;
        let persist = self.config.save_best_model;
        if persist {
            self.checkpoints.ensure_run_dir()?;
        }

        let mut selection = Selection::default();
        for (criterion, value) in [
            (Criterion::Accuracy, validate.accuracy),
            (Criterion::Loss, loss),
        ] {
            if !self.tracker.is_improvement(criterion, value) {
                continue;
            }
            match criterion {
                Criterion::Accuracy => {
                    tracing::info!(accuracy = value, "Highest validation accuracy!");
                    selection.new_best_accuracy = true;
                }
                Criterion::Loss => {
                    tracing::info!(loss = value, "Lowest validation loss!");
                    selection.new_best_loss = true;
                }
            }
            if persist {
                let checkpoint = self.persist(epoch, criterion, value)?;
                selection.checkpoints.push(checkpoint);
            } else {
                tracing::debug!(criterion = %criterion, "save_best_model is off; not saving");
            }
            self.tracker.update(criterion, value);
        }

        Ok(selection)
    }

    fn persist(
        &mut self,
        epoch: usize,
        criterion: Criterion,
        value: f64,
    ) -> Result<Checkpoint, EngineError> {
        let previous = self.tracker.best(criterion);
        let path = self.checkpoints.path_for(criterion, epoch, value, previous);
        tracing::info!(criterion = %criterion, path = %path.display(), "Saving...");
        self.runner.save(&path)?;
        self.checkpoints.record(epoch, criterion, value, &path)
    }
}

fn log_split(metrics: &SplitMetrics) {
    match metrics.loss {
        Some(loss) => tracing::info!(
            split = %metrics.split,
            loss,
            accuracy = round_to(metrics.accuracy, DISPLAY_DECIMALS),
            examples = metrics.examples,
            "Completed {}", metrics.split
        ),
        None => tracing::info!(
            split = %metrics.split,
            accuracy = round_to(metrics.accuracy, DISPLAY_DECIMALS),
            examples = metrics.examples,
            "Completed {}", metrics.split
        ),
    }
    for (class, accuracy) in &metrics.class_accuracy {
        match accuracy {
            Some(acc) => tracing::debug!(
                split = %metrics.split,
                class,
                accuracy = round_to(*acc, DISPLAY_DECIMALS),
                "Class accuracy"
            ),
            None => tracing::debug!(
                split = %metrics.split,
                class,
                "Class accuracy undefined: no examples"
            ),
        }
    }
    for (class, row) in metrics.confusion_matrix.iter().enumerate() {
        tracing::debug!(split = %metrics.split, class, predicted = ?row, "Confusion row");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::runner::{Batch, BatchStream, LossBatch};
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Every split is one correct example; validation losses come from a script.
    struct ScriptedRunner {
        validate_losses: VecDeque<f64>,
        saved: Vec<PathBuf>,
    }

    impl ScriptedRunner {
        fn new(validate_losses: &[f64]) -> Self {
            Self {
                validate_losses: validate_losses.iter().copied().collect(),
                saved: Vec::new(),
            }
        }
    }

    impl IterationRunner for ScriptedRunner {
        type Input = ();

        fn train(&mut self) -> Result<BatchStream<'_, LossBatch<()>>, EngineError> {
            let batch = Batch::new((), vec![0], vec![vec![1.0, 0.0]]).with_loss(0.5);
            Ok(Box::new(std::iter::once(Ok::<_, EngineError>(batch))))
        }

        fn validate(&mut self) -> Result<BatchStream<'_, LossBatch<()>>, EngineError> {
            let loss = self
                .validate_losses
                .pop_front()
                .ok_or_else(|| EngineError::iteration("script exhausted"))?;
            let batch = Batch::new((), vec![0], vec![vec![1.0, 0.0]]).with_loss(loss);
            Ok(Box::new(std::iter::once(Ok::<_, EngineError>(batch))))
        }

        fn test(&mut self) -> Result<BatchStream<'_, Batch<()>>, EngineError> {
            Ok(Box::new(std::iter::once(Ok::<_, EngineError>(Batch::new(
                (),
                vec![1],
                vec![vec![0.2, 0.8]],
            )))))
        }
    }

    impl CheckpointSink for ScriptedRunner {
        fn save(&mut self, path: &Path) -> Result<(), EngineError> {
            assert!(path.parent().unwrap().is_dir());
            self.saved.push(path.to_path_buf());
            Ok(())
        }
    }

    fn config(dir: &Path, epochs: usize, save: bool) -> EngineConfig {
        EngineConfig {
            train_epochs: epochs,
            save_best_model: save,
            weights_dir: dir.to_path_buf(),
            ..EngineConfig::new("unit")
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = EpochOrchestrator::new(EngineConfig::default(), ScriptedRunner::new(&[]));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_loss_improvements_drive_saves() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(&[0.9, 0.7, 0.7, 0.8, 0.6]);
        let mut orchestrator = EpochOrchestrator::new(config(dir.path(), 5, true), runner).unwrap();

        let report = orchestrator.train().unwrap();

        // Accuracy is 1.0 every epoch: only the first epoch improves it.
        // Loss improves at epochs 1, 2, and 5.
        let flags: Vec<(bool, bool)> = report
            .epochs
            .iter()
            .map(|e| (e.new_best_accuracy, e.new_best_loss))
            .collect();
        assert_eq!(
            flags,
            vec![
                (true, true),
                (false, true),
                (false, false),
                (false, false),
                (false, true)
            ]
        );
        assert_eq!(orchestrator.runner().saved.len(), 4);
        assert_eq!(report.best.highest_validation_acc, 1.0);
        assert_eq!(report.best.lowest_validation_loss, 0.6);
        assert_eq!(report.best_accuracy_epoch, Some(1));
        assert_eq!(report.best_loss_epoch, Some(5));
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[test]
    fn test_trackers_reset_between_train_calls() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(&[0.3, 0.9]);
        let mut orchestrator = EpochOrchestrator::new(config(dir.path(), 1, false), runner).unwrap();

        assert_eq!(orchestrator.train().unwrap().best.lowest_validation_loss, 0.3);
        assert_eq!(orchestrator.train().unwrap().best.lowest_validation_loss, 0.9);
    }

    #[test]
    fn test_runner_fault_resets_phase() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(&[0.5]);
        let mut orchestrator = EpochOrchestrator::new(config(dir.path(), 2, true), runner).unwrap();

        let err = orchestrator.train().unwrap_err();
        assert!(matches!(err, EngineError::Iteration(_)));
        assert_eq!(orchestrator.phase(), Phase::Idle);
        // The first epoch's snapshots were already written; nothing for the second.
        assert_eq!(orchestrator.runner().saved.len(), 2);
    }

    #[test]
    fn test_test_pass_reports_accuracy() {
        let dir = TempDir::new().unwrap();
        let mut orchestrator =
            EpochOrchestrator::new(config(dir.path(), 0, true), ScriptedRunner::new(&[])).unwrap();

        let report = orchestrator.test().unwrap();
        assert_eq!(report.accuracy(), 1.0);
        assert_eq!(report.metrics.loss, None);
        assert!(orchestrator.runner().saved.is_empty());
        assert!(!dir.path().join("unit").exists());
    }
}
