//! Checkpoint management for training runs.
//!
//! The model snapshot itself is written by a [`CheckpointSink`]; this module
//! decides where it goes and keeps a `checkpoints.json` manifest per run.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::persistence::{atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "checkpoints.json";

/// Writes a snapshot of the current model state to a path.
///
/// The destination directory already exists when `save` is called.
pub trait CheckpointSink {
    fn save(&mut self, path: &Path) -> Result<(), EngineError>;
}

/// Which validation metric triggered a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Accuracy,
    Loss,
}

impl Criterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Loss => "loss",
        }
    }

    /// Strict improvement: higher accuracy, lower loss. Equal never counts.
    pub fn improves(&self, candidate: f64, best: f64) -> bool {
        match self {
            Self::Accuracy => candidate > best,
            Self::Loss => candidate < best,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How checkpoint file names are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointNaming {
    /// `best-<criterion>-epoch<NNN>-<value>.ckpt`, keyed on the value that
    /// triggered the save.
    #[default]
    EpochMetric,
    /// `<previous best>.pt`, matching files written by older tooling. The
    /// accuracy and loss saves can overwrite each other under this scheme.
    Legacy,
}

/// A snapshot recorded in the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub run_id: String,
    /// 1-based epoch that produced the snapshot.
    pub epoch: usize,
    pub criterion: Criterion,
    pub metric: f64,
    pub path: PathBuf,
    /// SHA-256 of the file contents, if the sink produced a file.
    pub hash: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint manager for one run directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    run_id: String,
    run_dir: PathBuf,
    naming: CheckpointNaming,
}

impl CheckpointManager {
    pub fn new(weights_dir: &Path, run_id: &str, naming: CheckpointNaming) -> Self {
        Self {
            run_id: run_id.to_string(),
            run_dir: weights_dir.join(run_id),
            naming,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.weights_dir, &config.run_id, config.checkpoint_naming)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join(MANIFEST_FILE)
    }

    /// Create the run directory if it is missing. Safe to call repeatedly.
    pub fn ensure_run_dir(&self) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.run_dir)?;
        Ok(())
    }

    /// Destination for a snapshot triggered by `criterion` in 0-based `epoch`.
    ///
    /// `value` is the metric that triggered the save; `previous` is the best
    /// value before it. Only [`CheckpointNaming::Legacy`] uses `previous`.
    pub fn path_for(&self, criterion: Criterion, epoch: usize, value: f64, previous: f64) -> PathBuf {
        let name = match self.naming {
            CheckpointNaming::EpochMetric => {
                format!("best-{criterion}-epoch{:03}-{value:.6}.ckpt", epoch + 1)
            }
            CheckpointNaming::Legacy => format!("{}.pt", legacy_float_repr(previous)),
        };
        self.run_dir.join(name)
    }

    /// Append a written snapshot to the manifest.
    pub fn record(
        &self,
        epoch: usize,
        criterion: Criterion,
        metric: f64,
        path: &Path,
    ) -> Result<Checkpoint, EngineError> {
        let (hash, size_bytes) = if path.exists() {
            let bytes = std::fs::read(path)?;
            let digest = Sha256::digest(&bytes);
            (Some(format!("{digest:x}")), bytes.len() as u64)
        } else {
            tracing::warn!(path = %path.display(), "Checkpoint sink produced no file");
            (None, 0)
        };

        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: self.run_id.clone(),
            epoch: epoch + 1,
            criterion,
            metric,
            path: path.to_path_buf(),
            hash,
            size_bytes,
            created_at: Utc::now(),
        };

        let mut checkpoints = self.list()?;
        checkpoints.push(checkpoint.clone());
        atomic_write_json(&self.manifest_path(), &checkpoints)?;

        Ok(checkpoint)
    }

    /// Drop the manifest so the next [`record`](Self::record) starts a new one.
    ///
    /// Snapshot files already on disk are left alone.
    pub fn reset_manifest(&self) -> Result<(), EngineError> {
        match std::fs::remove_file(self.manifest_path()) {
            Ok(()) => {
                tracing::debug!(run_id = %self.run_id, "Started a fresh checkpoint manifest");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All snapshots recorded for this run, oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>, EngineError> {
        Ok(load_json(&self.manifest_path())?.unwrap_or_default())
    }

    /// Best recorded snapshot for a criterion: highest accuracy or lowest loss.
    /// The earliest snapshot wins a tie.
    pub fn best(&self, criterion: Criterion) -> Result<Option<Checkpoint>, EngineError> {
        let best = self
            .list()?
            .into_iter()
            .filter(|c| c.criterion == criterion)
            .fold(None::<Checkpoint>, |best, c| match best {
                Some(b) if !criterion.improves(c.metric, b.metric) => Some(b),
                _ => Some(c),
            });
        Ok(best)
    }
}

/// Render a float the way the historical checkpoint names did: `inf`, `-inf`,
/// a trailing `.0` on whole numbers, and exponent form (`1e-06`, `1e+16`)
/// outside `[1e-4, 1e16)`.
fn legacy_float_repr(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        // Rust's `{:e}` keeps the shortest mantissa but writes `1e-6` / `1e16`.
        let formatted = format!("{value:e}");
        if let Some((mantissa, exponent)) = formatted.split_once('e') {
            if let Ok(exponent) = exponent.parse::<i32>() {
                let sign = if exponent < 0 { '-' } else { '+' };
                return format!("{mantissa}e{sign}{:02}", exponent.abs());
            }
        }
        return formatted;
    }
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}
