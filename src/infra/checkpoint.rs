// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights with Burn's named
// MessagePack + gzip recorder at full precision. Half
// precision would round the observer ranges learned
// during quantization-aware training.
//
// What gets saved:
//   1. <stage>_best.mpk.gz  — best weights of a training stage
//   2. run_config.json      — the TransferConfig of the run
//
// The stage-2 checkpoint doubles as the device transfer:
// weights trained on the GPU are written here and loaded back
// into a CPU model for conversion.
//
// File layout:
//   checkpoints/
//     feature_extractor_best.mpk.gz
//     qat_best.mpk.gz
//     run_config.json
//     metrics.csv             ← written by MetricsLogger
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};

use crate::application::transfer_use_case::TransferConfig;

type CheckpointRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

const CONFIG_FILE: &str = "run_config.json";

/// Saves and loads checkpoints inside one directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the directory (like `mkdir -p`).
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Path without extension; the recorder appends `.mpk.gz`
    fn stem_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write a module's weights as `{dir}/{name}.mpk.gz`
    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M, name: &str) -> Result<PathBuf> {
        let path = self.stem_path(name);

        CheckpointRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        tracing::info!("Saved checkpoint '{}'", name);
        Ok(path.with_extension("mpk.gz"))
    }

    /// Load `{dir}/{name}.mpk.gz` into a module of the same structure.
    /// The module may live on a different backend than the one that saved it.
    pub fn load_model<B: Backend, M: Module<B>>(&self, model: M, name: &str, device: &B::Device) -> Result<M> {
        let path = self.stem_path(name);

        let record = CheckpointRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Has this stage been trained?", path.display())
            })?;

        tracing::debug!("Loaded checkpoint '{}'", name);
        Ok(model.load_record(record))
    }

    /// Save the run configuration as pretty JSON.
    pub fn save_config(&self, cfg: &TransferConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TransferConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{
        model::{ImageClassifier, TransferModelConfig},
        quant::FakeQuantize,
    };
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::Distribution,
    };

    type TestBackend = NdArray;

    #[test]
    fn test_config_round_trip() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("ckpt")).unwrap();

        let cfg = TransferConfig { epochs: 3, calibration_batches: 1, ..TransferConfig::default() };
        manager.save_config(&cfg).unwrap();

        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.epochs, 3);
        assert_eq!(loaded.calibration_batches, 1);
        assert_eq!(loaded.data_dir, cfg.data_dir);
    }

    #[test]
    fn test_model_round_trip_preserves_logits() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let device  = Default::default();
        let config  = TransferModelConfig::new(2);

        let model = config.init::<TestBackend>(&device);
        let path  = manager.save_model(&model, "toy").unwrap();
        assert!(path.exists());

        let fresh  = config.init::<TestBackend>(&device);
        let loaded = manager.load_model(fresh, "toy", &device).unwrap();

        let images = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let a: Vec<f32> = model.logits(images.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.logits(images).into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_observer_ranges_survive_backend_change() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let device  = Default::default();

        let fq = FakeQuantize::<Autodiff<TestBackend>>::activation(&device);
        fq.forward(Tensor::<Autodiff<TestBackend>, 1>::from_floats([-0.123456, 7.654321], &device));
        manager.save_model(&fq, "observer").unwrap();

        let loaded = manager
            .load_model(FakeQuantize::<TestBackend>::activation(&device), "observer", &device)
            .unwrap();
        assert_eq!(loaded.observed_range(), Some((-0.123456, 7.654321)));
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let model   = TransferModelConfig::new(2).init::<TestBackend>(&Default::default());
        assert!(manager.load_model(model, "nope", &Default::default()).is_err());
    }
}
