//! Settings for the built-in synthetic classification demo.
//!
//! Lives under the `[demo]` table of the same file the engine config is read
//! from, and picks up `EPOCHAL_DEMO__*` environment overrides.

use epochal_core::config::{ConfigOverrides, layered_figment};
use epochal_core::{EngineConfig, EngineError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub classes: usize,
    pub features: usize,
    pub train_per_class: usize,
    pub validate_per_class: usize,
    pub test_per_class: usize,
    /// Standard deviation of the noise around each class centre.
    pub spread: f64,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            classes: 3,
            features: 4,
            train_per_class: 120,
            validate_per_class: 30,
            test_per_class: 30,
            spread: 1.0,
            batch_size: 16,
            learning_rate: 0.1,
            seed: 42,
        }
    }
}

impl DemoConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.classes < 2 {
            return Err(EngineError::config("demo.classes must be at least 2"));
        }
        if self.features == 0 {
            return Err(EngineError::config("demo.features must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(EngineError::config("demo.batch_size must be at least 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(EngineError::config("demo.learning_rate must be positive"));
        }
        if !(self.spread.is_finite() && self.spread >= 0.0) {
            return Err(EngineError::config("demo.spread must be non-negative"));
        }
        Ok(())
    }
}

/// Load the `[demo]` table from the same layers as the engine config.
pub fn load_demo_config(
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<DemoConfig, EngineError> {
    let demo: DemoConfig = layered_figment(config_file, overrides)?
        .focus("demo")
        .extract()
        .map_err(Box::new)?;
    demo.validate()?;
    Ok(demo)
}

#[derive(Serialize)]
struct ConfigFile<'a> {
    #[serde(flatten)]
    engine: &'a EngineConfig,
    demo: &'a DemoConfig,
}

/// Render an engine config and its `[demo]` table as one TOML document.
pub fn render_config(engine: &EngineConfig, demo: &DemoConfig) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(&ConfigFile { engine, demo })?)
}

/// Default configuration file contents, with a placeholder run id.
pub fn render_default_config() -> anyhow::Result<String> {
    render_config(&EngineConfig::new("baseline"), &DemoConfig::default())
}
