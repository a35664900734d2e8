//! CLI subcommand handlers.

use crate::config::{load_demo_config, render_config, render_default_config};
use crate::softmax::SoftmaxRunner;
use crate::{Commands, ConfigAction, TrainArgs};
use epochal_core::persistence::atomic_write_json;
use epochal_core::{
    ConfigOverrides, EpochOrchestrator, SplitMetrics, TestReport, TrainingReport, load_config,
};
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, config_file: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Train(args) => handle_train(args, config_file),
        Commands::Test { weights, run_id } => handle_test(&weights, run_id, config_file),
        Commands::Config { action } => handle_config(action, config_file),
    }
}

fn handle_train(args: TrainArgs, config_file: Option<&Path>) -> anyhow::Result<()> {
    let report_path = args.report.clone();
    let (training, test) = run_train(args, config_file)?;

    print_training_summary(&training);
    if let Some(test) = &test {
        print_test_summary(test);
    }

    if let Some(path) = report_path {
        atomic_write_json(&path, &training)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

/// Train, then (unless skipped) score the test split with the final model.
fn run_train(
    args: TrainArgs,
    config_file: Option<&Path>,
) -> anyhow::Result<(TrainingReport, Option<TestReport>)> {
    let overrides = ConfigOverrides {
        train_epochs: args.epochs,
        // Only an explicit flag overrides the file/env value.
        save_best_model: args.save_best.then_some(true),
        run_id: args.run_id,
        weights_dir: args.weights_dir,
    };
    let engine = load_config(config_file, Some(&overrides))?;
    let demo = load_demo_config(config_file, Some(&overrides))?;

    let runner = SoftmaxRunner::new(&demo);
    let mut orchestrator = EpochOrchestrator::new(engine, runner)?;

    let training = orchestrator.train()?;
    let test = if args.skip_test {
        None
    } else {
        Some(orchestrator.test()?)
    };
    Ok((training, test))
}

fn handle_test(
    weights: &Path,
    run_id: Option<String>,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    let report = run_test(weights, run_id, config_file)?;
    print_test_summary(&report);
    Ok(())
}

fn run_test(
    weights: &Path,
    run_id: Option<String>,
    config_file: Option<&Path>,
) -> anyhow::Result<TestReport> {
    let overrides = ConfigOverrides {
        run_id: run_id.or_else(|| snapshot_run_id(weights)),
        ..Default::default()
    };
    let engine = load_config(config_file, Some(&overrides))?;
    let demo = load_demo_config(config_file, Some(&overrides))?;

    let runner = SoftmaxRunner::from_snapshot(&demo, weights)?;
    let mut orchestrator = EpochOrchestrator::new(engine, runner)?;
    Ok(orchestrator.test()?)
}

/// Snapshots live in `<weights_dir>/<run_id>/`, so the parent directory names the run.
fn snapshot_run_id(weights: &Path) -> Option<String> {
    weights
        .parent()?
        .file_name()?
        .to_str()
        .map(str::to_string)
}

fn handle_config(action: ConfigAction, config_file: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { path } => {
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, render_default_config()?)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let engine = load_config(config_file, None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let demo = load_demo_config(config_file, None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", render_config(&engine, &demo)?);
            Ok(())
        }
    }
}

fn format_loss(metrics: &SplitMetrics) -> String {
    metrics
        .loss
        .map(|l| format!("{l:.4}"))
        .unwrap_or_else(|| "-".to_string())
}

fn print_training_summary(report: &TrainingReport) {
    println!();
    println!("Run '{}': {} epoch(s)", report.run_id, report.epochs.len());
    println!(
        "  {:>5}  {:>10}  {:>9}  {:>10}  {:>9}",
        "epoch", "train loss", "train acc", "valid loss", "valid acc"
    );
    for record in &report.epochs {
        let marker = match (record.new_best_accuracy, record.new_best_loss) {
            (true, true) => "  *acc *loss",
            (true, false) => "  *acc",
            (false, true) => "  *loss",
            (false, false) => "",
        };
        println!(
            "  {:>5}  {:>10}  {:>9.4}  {:>10}  {:>9.4}{}",
            record.epoch,
            format_loss(&record.train),
            record.train.accuracy,
            format_loss(&record.validate),
            record.validate.accuracy,
            marker
        );
    }

    if let Some(epoch) = report.best_accuracy_epoch {
        println!(
            "Best validation accuracy: {:.4} (epoch {epoch})",
            report.best.highest_validation_acc
        );
    }
    if let Some(epoch) = report.best_loss_epoch {
        println!(
            "Best validation loss: {:.4} (epoch {epoch})",
            report.best.lowest_validation_loss
        );
    }

    let saved: Vec<&PathBuf> = report.checkpoints().map(|c| &c.path).collect();
    if !saved.is_empty() {
        println!("Checkpoints:");
        for path in saved {
            println!("  {}", path.display());
        }
    }
}

fn print_test_summary(report: &TestReport) {
    let metrics = &report.metrics;
    println!(
        "Test accuracy: {:.4} ({} examples, {} batches)",
        report.accuracy(),
        metrics.examples,
        metrics.batches
    );
    for (class, accuracy) in &metrics.class_accuracy {
        match accuracy {
            Some(a) => println!("  class {class}: {a:.4}"),
            None => println!("  class {class}: n/a"),
        }
    }
    if !metrics.confusion_matrix.is_empty() {
        println!("Confusion matrix (rows: true class, columns: predicted):");
        for row in &metrics.confusion_matrix {
            let cells: Vec<String> = row.iter().map(|n| format!("{n:>5}")).collect();
            println!("  {}", cells.join(""));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epochal_core::Criterion;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("epochal.toml");
        std::fs::write(
            &path,
            "run_id = \"cli-test\"\ntrain_epochs = 3\n\n\
             [demo]\nclasses = 3\nfeatures = 2\ntrain_per_class = 30\n\
             validate_per_class = 10\ntest_per_class = 10\nspread = 0.3\n\
             batch_size = 8\nlearning_rate = 0.5\nseed = 11\n",
        )
        .unwrap();
        path
    }

    fn train_args(dir: &Path) -> TrainArgs {
        TrainArgs {
            save_best: true,
            weights_dir: Some(dir.join("weights")),
            ..Default::default()
        }
    }

    #[test]
    fn test_train_then_test() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());

        let (training, test) = run_train(train_args(dir.path()), Some(&config)).unwrap();

        assert_eq!(training.run_id, "cli-test");
        assert_eq!(training.epochs.len(), 3);
        assert!(training.epochs[0].new_best_accuracy);
        assert!(training.epochs[0].new_best_loss);
        for checkpoint in training.checkpoints() {
            assert!(checkpoint.path.exists(), "{:?}", checkpoint.path);
            assert!(
                checkpoint
                    .path
                    .starts_with(dir.path().join("weights").join("cli-test"))
            );
        }

        let test = test.unwrap();
        assert_eq!(test.metrics.examples, 30);
        assert_eq!(test.metrics.confusion_matrix.len(), 3);
        let counted: usize = test.metrics.confusion_matrix.iter().flatten().sum();
        assert_eq!(counted, 30);
        assert!(test.metrics.loss.is_none());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());
        let args = TrainArgs {
            run_id: Some("flagged".into()),
            epochs: Some(1),
            save_best: false,
            skip_test: true,
            ..train_args(dir.path())
        };

        let (training, test) = run_train(args, Some(&config)).unwrap();

        assert_eq!(training.run_id, "flagged");
        assert_eq!(training.epochs.len(), 1);
        assert_eq!(training.checkpoints().count(), 0);
        assert!(test.is_none());
        assert!(!dir.path().join("weights").exists());
    }

    #[test]
    fn test_saved_snapshot_scores_like_original() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());
        let (training, _) = run_train(
            TrainArgs {
                skip_test: true,
                ..train_args(dir.path())
            },
            Some(&config),
        )
        .unwrap();

        let last_acc = training
            .checkpoints()
            .filter(|c| c.criterion == Criterion::Accuracy)
            .last()
            .unwrap();
        let report = run_test(&last_acc.path, None, Some(&config)).unwrap();

        assert_eq!(report.run_id, "cli-test");
        assert_eq!(report.metrics.examples, 30);
        assert!((0.0..=1.0).contains(&report.accuracy()));
    }

    #[test]
    fn test_missing_weights_file() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());
        let result = run_test(&dir.path().join("nope.ckpt"), None, Some(&config));
        assert!(result.is_err());
    }

    #[test]
    fn test_report_written_as_json() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());
        let report = dir.path().join("out").join("report.json");
        let args = TrainArgs {
            report: Some(report.clone()),
            skip_test: true,
            ..train_args(dir.path())
        };

        handle_train(args, Some(&config)).unwrap();

        let content = std::fs::read_to_string(&report).unwrap();
        let parsed: TrainingReport = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.epochs.len(), 3);
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("epochal.toml");

        handle_config(ConfigAction::Init { path: path.clone() }, None).unwrap();

        assert!(path.exists());
        let engine = load_config(Some(&path), None).unwrap();
        assert_eq!(engine.run_id, "baseline");
    }

    #[test]
    fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epochal.toml");
        std::fs::write(&path, "run_id = \"mine\"\n").unwrap();

        handle_config(ConfigAction::Init { path: path.clone() }, None).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "run_id = \"mine\"\n");
    }

    #[test]
    fn test_snapshot_run_id() {
        let path = Path::new("outputs/weights/run-7/best-accuracy-epoch001-0.500000.ckpt");
        assert_eq!(snapshot_run_id(path).as_deref(), Some("run-7"));
        assert_eq!(snapshot_run_id(Path::new("best.ckpt")), None);
    }
}
