//! Configuration for training runs.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Environment variables use the `EPOCHAL_` prefix (`EPOCHAL_TRAIN_EPOCHS=5`,
//! `EPOCHAL_RUN_ID=baseline`, ...).

use crate::error::EngineError;
use crate::training::checkpoint::CheckpointNaming;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "EPOCHAL_";

/// Settings consumed by the epoch orchestrator.
///
/// `run_id` is required and has no usable default; every other field does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of train/validate epochs. Zero is a valid no-op run.
    #[serde(default = "default_train_epochs")]
    pub train_epochs: usize,
    /// Persist a snapshot whenever validation accuracy or loss improves.
    #[serde(default)]
    pub save_best_model: bool,
    /// Namespaces the checkpoint directory under `weights_dir`.
    #[serde(default)]
    pub run_id: String,
    /// Root directory for run-scoped checkpoint folders.
    #[serde(default = "default_weights_dir")]
    pub weights_dir: PathBuf,
    /// How checkpoint files are named.
    #[serde(default)]
    pub checkpoint_naming: CheckpointNaming,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            train_epochs: default_train_epochs(),
            save_best_model: false,
            run_id: String::new(),
            weights_dir: default_weights_dir(),
            checkpoint_naming: CheckpointNaming::default(),
        }
    }
}

impl EngineConfig {
    /// Config with the given run id and defaults for everything else.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    /// Directory that receives this run's checkpoints.
    pub fn run_dir(&self) -> PathBuf {
        self.weights_dir.join(&self.run_id)
    }

    /// Check required fields and reject values that would escape the weights directory.
    pub fn validate(&self) -> Result<(), EngineError> {
        let run_id = self.run_id.trim();
        if run_id.is_empty() {
            return Err(EngineError::config("run_id must be set"));
        }
        if run_id != self.run_id {
            return Err(EngineError::config(
                "run_id must not have leading or trailing whitespace",
            ));
        }
        if run_id == "." || run_id == ".." || run_id.contains(['/', '\\']) {
            return Err(EngineError::config(format!(
                "run_id '{run_id}' must be a single path component"
            )));
        }
        if self.weights_dir.as_os_str().is_empty() {
            return Err(EngineError::config("weights_dir must not be empty"));
        }
        Ok(())
    }
}

/// Explicit overrides, typically from command-line flags. `None` fields leave
/// the lower layers untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_epochs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_best_model: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights_dir: Option<PathBuf>,
}

fn default_train_epochs() -> usize {
    10
}

fn default_weights_dir() -> PathBuf {
    PathBuf::from("outputs/weights")
}

/// Build the layered figment without extracting it.
///
/// Exposed so callers can pull their own sections (e.g. `figment.focus("demo")`)
/// from the same sources the engine config comes from.
pub fn layered_figment(
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<Figment, EngineError> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(EngineError::config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    // Environment variables (EPOCHAL_TRAIN_EPOCHS, EPOCHAL_DEMO__SEED, etc.)
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    Ok(figment)
}

/// Load and validate the engine configuration.
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<EngineConfig, EngineError> {
    let config: EngineConfig = layered_figment(config_file, overrides)?
        .extract()
        .map_err(Box::new)?;
    config.validate()?;
    tracing::debug!(
        run_id = %config.run_id,
        train_epochs = config.train_epochs,
        save_best_model = config.save_best_model,
        "Loaded engine configuration"
    );
    Ok(config)
}
