//! Seeded synthetic classification data: one noisy blob per class.

use crate::config::DemoConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub features: Vec<f64>,
    pub label: usize,
}

#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub classes: usize,
    pub features: usize,
    pub train: Vec<Example>,
    pub validate: Vec<Example>,
    pub test: Vec<Example>,
}

impl SyntheticDataset {
    /// Same config, same data: every draw comes from one RNG seeded by `config.seed`.
    pub fn generate(config: &DemoConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let centres: Vec<Vec<f64>> = (0..config.classes)
            .map(|_| {
                (0..config.features)
                    .map(|_| rng.gen_range(-3.0..3.0))
                    .collect()
            })
            .collect();

        let mut draw = |per_class: usize| {
            let mut examples = Vec::with_capacity(per_class * config.classes);
            for _ in 0..per_class {
                for (label, centre) in centres.iter().enumerate() {
                    let features = centre
                        .iter()
                        .map(|c| c + config.spread * rng.sample::<f64, _>(StandardNormal))
                        .collect();
                    examples.push(Example { features, label });
                }
            }
            examples
        };

        let train = draw(config.train_per_class);
        let validate = draw(config.validate_per_class);
        let test = draw(config.test_per_class);

        Self {
            classes: config.classes,
            features: config.features,
            train,
            validate,
            test,
        }
    }
}
