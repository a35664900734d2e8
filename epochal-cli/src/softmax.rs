//! Softmax-regression classifier that plugs into the epoch orchestrator.
//!
//! `SoftmaxRunner` owns the model, the data, and the optimizer settings. It
//! yields one batch at a time: the train pass takes an SGD step after scoring
//! each batch, the validate and test passes only score.

use crate::config::DemoConfig;
use crate::dataset::{Example, SyntheticDataset};
use epochal_core::persistence::{atomic_write_json, load_json};
use epochal_core::{Batch, BatchStream, CheckpointSink, EngineError, IterationRunner, LossBatch};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Feature rows of one batch.
pub type FeatureBatch = Vec<Vec<f64>>;

/// Linear model with a softmax over class logits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxModel {
    pub classes: usize,
    pub features: usize,
    /// `classes` rows of `features` weights.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl SoftmaxModel {
    pub fn zeros(classes: usize, features: usize) -> Self {
        Self {
            classes,
            features,
            weights: vec![vec![0.0; features]; classes],
            bias: vec![0.0; classes],
        }
    }

    /// Load a snapshot written by [`SoftmaxRunner`]'s checkpoint sink.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let model: Self = load_json(path)?.ok_or_else(|| {
            EngineError::config(format!("weights file {} does not exist", path.display()))
        })?;
        if model.weights.len() != model.classes
            || model.bias.len() != model.classes
            || model.weights.iter().any(|row| row.len() != model.features)
        {
            return Err(EngineError::config(format!(
                "weights file {} has inconsistent dimensions",
                path.display()
            )));
        }
        Ok(model)
    }

    pub fn logits(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, xi)| w * xi).sum::<f64>() + b)
            .collect()
    }

    /// Class probabilities, shifted by the max logit for stability.
    pub fn probabilities(&self, x: &[f64]) -> Vec<f64> {
        let logits = self.logits(x);
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }

    /// One SGD step on the mean cross-entropy of the batch.
    fn step(&mut self, examples: &[&Example], probs: &[Vec<f64>], learning_rate: f64) {
        let scale = learning_rate / examples.len() as f64;
        for (example, p) in examples.iter().zip(probs) {
            for class in 0..self.classes {
                let target = if class == example.label { 1.0 } else { 0.0 };
                let delta = scale * (p[class] - target);
                for (w, x) in self.weights[class].iter_mut().zip(&example.features) {
                    *w -= delta * x;
                }
                self.bias[class] -= delta;
            }
        }
    }
}

fn cross_entropy(probs: &[f64], label: usize) -> f64 {
    -probs[label].max(1e-12).ln()
}

/// Score a batch: (input, labels, probabilities, mean loss).
fn score(model: &SoftmaxModel, examples: &[&Example]) -> (Batch<FeatureBatch>, f64) {
    let probs: Vec<Vec<f64>> = examples
        .iter()
        .map(|e| model.probabilities(&e.features))
        .collect();
    let loss = examples
        .iter()
        .zip(&probs)
        .map(|(e, p)| cross_entropy(p, e.label))
        .sum::<f64>()
        / examples.len() as f64;
    let batch = Batch::new(
        examples.iter().map(|e| e.features.clone()).collect(),
        examples.iter().map(|e| e.label).collect(),
        probs,
    );
    (batch, loss)
}

/// Demo runner: softmax regression over a synthetic dataset.
pub struct SoftmaxRunner {
    model: SoftmaxModel,
    data: SyntheticDataset,
    batch_size: usize,
    learning_rate: f64,
    rng: StdRng,
}

impl SoftmaxRunner {
    /// Fresh zero-initialised model for the dataset described by `config`.
    pub fn new(config: &DemoConfig) -> Self {
        let data = SyntheticDataset::generate(config);
        let model = SoftmaxModel::zeros(data.classes, data.features);
        Self::with_model(config, data, model)
    }

    pub fn with_model(config: &DemoConfig, data: SyntheticDataset, model: SoftmaxModel) -> Self {
        Self {
            model,
            data,
            batch_size: config.batch_size.max(1),
            learning_rate: config.learning_rate,
            // Offset so shuffling doesn't replay the dataset's own draws.
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
        }
    }

    /// Resume from a snapshot; its shape must match the configured dataset.
    pub fn from_snapshot(config: &DemoConfig, path: &Path) -> Result<Self, EngineError> {
        let model = SoftmaxModel::load(path)?;
        let data = SyntheticDataset::generate(config);
        if model.classes != data.classes || model.features != data.features {
            return Err(EngineError::config(format!(
                "snapshot is {}x{} but the demo dataset is {}x{}",
                model.classes, model.features, data.classes, data.features
            )));
        }
        Ok(Self::with_model(config, data, model))
    }

    pub fn model(&self) -> &SoftmaxModel {
        &self.model
    }

    fn eval_stream<'a>(
        model: &'a SoftmaxModel,
        examples: &'a [Example],
        batch_size: usize,
    ) -> impl Iterator<Item = (Batch<FeatureBatch>, f64)> + 'a {
        examples.chunks(batch_size).map(move |chunk| {
            let refs: Vec<&Example> = chunk.iter().collect();
            score(model, &refs)
        })
    }
}

/// Lazily walks a shuffled order, scoring each batch and then updating the model.
struct TrainPass<'a> {
    runner: &'a mut SoftmaxRunner,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for TrainPass<'_> {
    type Item = Result<LossBatch<FeatureBatch>, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.runner.batch_size).min(self.order.len());
        let runner = &mut *self.runner;
        let examples: Vec<&Example> = self.order[self.cursor..end]
            .iter()
            .map(|&i| &runner.data.train[i])
            .collect();
        self.cursor = end;

        let (batch, loss) = score(&runner.model, &examples);
        runner
            .model
            .step(&examples, &batch.scores, runner.learning_rate);
        Some(Ok(batch.with_loss(loss)))
    }
}

impl IterationRunner for SoftmaxRunner {
    type Input = FeatureBatch;

    fn train(&mut self) -> Result<BatchStream<'_, LossBatch<FeatureBatch>>, EngineError> {
        let mut order: Vec<usize> = (0..self.data.train.len()).collect();
        order.shuffle(&mut self.rng);
        Ok(Box::new(TrainPass {
            runner: self,
            order,
            cursor: 0,
        }))
    }

    fn validate(&mut self) -> Result<BatchStream<'_, LossBatch<FeatureBatch>>, EngineError> {
        Ok(Box::new(
            Self::eval_stream(&self.model, &self.data.validate, self.batch_size)
                .map(|(batch, loss)| Ok::<_, EngineError>(batch.with_loss(loss))),
        ))
    }

    fn test(&mut self) -> Result<BatchStream<'_, Batch<FeatureBatch>>, EngineError> {
        Ok(Box::new(
            Self::eval_stream(&self.model, &self.data.test, self.batch_size)
                .map(|(batch, _)| Ok::<_, EngineError>(batch)),
        ))
    }
}

impl CheckpointSink for SoftmaxRunner {
    fn save(&mut self, path: &Path) -> Result<(), EngineError> {
        atomic_write_json(path, &self.model)
            .map_err(|e| EngineError::checkpoint(format!("{}: {e}", path.display())))
    }
}
