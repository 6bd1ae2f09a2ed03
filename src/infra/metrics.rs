// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records one CSV row per (stage, epoch, phase) as training
// runs, so learning curves of both tutorial stages end up in
// a single file.
//
// Output file: checkpoints/metrics.csv
//
// Example CSV output:
//   stage,epoch,phase,loss,accuracy,learning_rate
//   feature-extractor,0,train,0.681200,0.573770,0.010000
//   feature-extractor,0,val,0.598100,0.705882,0.010000
//   ...
//
// How to read the metrics:
//   - train loss should fall every epoch
//   - val accuracy rising then flattening is the usual shape
//   - the learning rate drops by 10× every 7 epochs

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

use crate::domain::phase::Phase;

const HEADER: &str = "stage,epoch,phase,loss,accuracy,learning_rate";

/// One row of metrics: a single phase of a single epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Which tutorial stage produced the row
    pub stage: String,

    /// Zero-based epoch, as printed in "Epoch e/N-1"
    pub epoch: usize,

    pub phase: Phase,

    /// Mean cross-entropy over every sample of the phase
    pub loss: f64,

    /// Fraction of samples classified correctly, in [0, 1]
    pub accuracy: f64,

    /// Learning rate the training phase of this epoch ran with
    pub learning_rate: f64,
}

impl EpochMetrics {
    /// True if this row beats the best validation accuracy so far
    pub fn is_improvement(&self, best_acc: f64) -> bool {
        self.phase == Phase::Val && self.accuracy > best_acc
    }

    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{:.6},{:.6},{:.6}",
            self.stage, self.epoch, self.phase, self.loss, self.accuracy, self.learning_rate,
        )
    }
}

/// Appends epoch metrics to `metrics.csv` in the given directory.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the directory and write the header if the file is new.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one row
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(f, "{}", m.to_csv_row())?;

        tracing::debug!(
            "Logged {} epoch {} {}: loss={:.4}, acc={:.4}",
            m.stage, m.epoch, m.phase, m.loss, m.accuracy,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn row(phase: Phase, accuracy: f64) -> EpochMetrics {
        EpochMetrics {
            stage: "qat".into(),
            epoch: 3,
            phase,
            loss: 0.25,
            accuracy,
            learning_rate: 0.001,
        }
    }

    #[test]
    fn test_is_improvement() {
        assert!(row(Phase::Val, 0.9).is_improvement(0.8));
        // Ties do not replace the snapshot
        assert!(!row(Phase::Val, 0.8).is_improvement(0.8));
        // Training accuracy never counts
        assert!(!row(Phase::Train, 0.99).is_improvement(0.1));
    }

    #[test]
    fn test_log_appends_rows_after_header() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&row(Phase::Train, 0.5)).unwrap();
        logger.log(&row(Phase::Val, 0.75)).unwrap();

        let csv   = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "qat,3,train,0.250000,0.500000,0.001000");
        assert_eq!(lines[2], "qat,3,val,0.250000,0.750000,0.001000");
    }

    #[test]
    fn test_reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        MetricsLogger::new(dir.path()).unwrap().log(&row(Phase::Val, 0.5)).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();

        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }
}
