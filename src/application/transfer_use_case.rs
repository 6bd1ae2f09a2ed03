// ============================================================
// Layer 2 — TransferUseCase
// ============================================================
// Orchestrates the transfer-learning tutorial in order:
//
//   Step 1: Scan train/ and val/ image folders  (Layer 4 - data)
//   Step 2: Decode both splits once            (Layer 4 - data)
//   Step 3: Save run config, open metrics log  (Layer 6 - infra)
//   Step 4: Preview one training batch         (Layer 5 - ml)
//   Step 5: Stage 1, quantized feature extractor:
//             frozen int8 backbone + new head,
//             trained on the CPU               (Layer 5 - ml)
//   Step 6: Stage 2, quantization-aware fine-tuning of the
//             whole network on the chosen device,
//             moved to the CPU via checkpoint,
//             converted to an 8-bit model       (Layer 5 - ml)
//
// Each stage ends with a grid of validation predictions.
//
// Reference: Burn Book §5 (Training)

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice},
    data::dataset::Dataset,
    lr_scheduler::step::{StepLrScheduler, StepLrSchedulerConfig},
    module::AutodiffModule,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::{
    build_loader,
    dataset::ImageFolderDataset,
    loader::ImageFolder,
    preprocessor::Preprocessor,
    LoaderOptions,
};
use crate::domain::{image::ClassIndex, phase::Phase, traits::ImageSource};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    weights::load_backbone,
};
use crate::ml::{
    convert::{convert, WeightFootprint},
    model::{TransferModel, TransferModelConfig},
    qat::{prepare_for_qat, quantize_frozen},
    resnet::ResNetFeatures,
    trainer::{evaluate, sgd_optimizer, train_model, PhaseLoaders, TrainSettings},
    visualize::{show_batch, visualize_model},
    CpuAutodiff, CpuBackend, GpuAutodiff,
};

pub const FEATURE_EXTRACTOR_STAGE: &str = "feature-extractor";
pub const QAT_STAGE:               &str = "qat";

const FEATURE_EXTRACTOR_CHECKPOINT: &str = "feature_extractor_best";
const QAT_CHECKPOINT:               &str = "qat_best";

/// Which stages of the tutorial to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageSelection {
    All,
    FeatureExtractor,
    Qat,
}

impl StageSelection {
    pub fn runs_feature_extractor(self) -> bool {
        matches!(self, Self::All | Self::FeatureExtractor)
    }

    pub fn runs_qat(self) -> bool {
        matches!(self, Self::All | Self::Qat)
    }
}

/// Where stage 2 trains. Stage 1 and conversion always use the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    /// Wgpu on the best adapter the host exposes
    Auto,
    Cpu,
}

// ─── Run Configuration ───────────────────────────────────────────────────────
// Everything a run depends on. Saved next to the checkpoints so a
// later run can tell how they were produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub data_dir:             String,
    pub weights:              Option<String>,
    pub checkpoint_dir:       String,
    pub plots_dir:            String,
    pub stage:                StageSelection,
    pub device:               DeviceChoice,
    pub batch_size:           usize,
    pub num_workers:          usize,
    pub epochs:               usize,
    pub seed:                 u64,
    pub calibration_batches:  usize,
    pub feature_extractor_lr: f64,
    pub qat_lr:               f64,
    pub qat_weight_decay:     f64,
    pub lr_step_size:         usize,
    pub lr_gamma:             f64,
    pub dropout:              f64,
    /// rows × cols of the prediction grids
    pub prediction_grid:      (usize, usize),
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            data_dir:             "data/hymenoptera_data".to_string(),
            weights:              None,
            checkpoint_dir:       "checkpoints".to_string(),
            plots_dir:            "plots".to_string(),
            stage:                StageSelection::All,
            device:               DeviceChoice::Auto,
            batch_size:           16,
            num_workers:          8,
            epochs:               25,
            seed:                 42,
            calibration_batches:  4,
            feature_extractor_lr: 0.01,
            qat_lr:               1e-3,
            qat_weight_decay:     0.1,
            lr_step_size:         7,
            lr_gamma:             0.1,
            dropout:              0.5,
            prediction_grid:      (3, 3),
        }
    }
}

impl TransferConfig {
    fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            batch_size:  self.batch_size,
            num_workers: self.num_workers,
            seed:        self.seed,
        }
    }

    fn weights_path(&self) -> Option<&Path> {
        self.weights.as_deref().map(Path::new)
    }
}

// ─── Results ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct StageSummary {
    pub stage:            &'static str,
    pub best_acc:         f64,
    pub elapsed:          Duration,
    pub checkpoint:       PathBuf,
    pub predictions_plot: PathBuf,
    /// Validation accuracy of the converted 8-bit model (stage 2 only)
    pub quantized_acc:    Option<f64>,
    pub footprint:        Option<WeightFootprint>,
}

#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    pub preview_plot: Option<PathBuf>,
    pub stages:       Vec<StageSummary>,
}

/// Both decoded splits
struct Splits {
    train:   Arc<ImageFolderDataset>,
    val:     Arc<ImageFolderDataset>,
    classes: ClassIndex,
}

/// Per-run services shared by both stages
struct RunContext {
    splits:      Splits,
    checkpoints: CheckpointManager,
    metrics:     MetricsLogger,
}

// ─── TransferUseCase ─────────────────────────────────────────────────────────
pub struct TransferUseCase {
    config: TransferConfig,
}

impl TransferUseCase {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// Execute the selected stages end to end
    pub fn execute(&self) -> Result<TransferReport> {
        let cfg = &self.config;

        // ── Step 1 + 2: Scan and decode both splits ──────────────────────────
        let splits = self.load_splits()?;
        tracing::info!(
            "{} train / {} val images, classes {:?}",
            splits.train.len(),
            splits.val.len(),
            splits.classes.names()
        );

        // ── Step 3: Config + metrics next to the checkpoints ─────────────────
        let checkpoints = CheckpointManager::new(&cfg.checkpoint_dir)?;
        if let Ok(previous) = checkpoints.load_config() {
            tracing::info!(
                "Replacing checkpoints of a previous run ({:?}, {} epochs)",
                previous.stage,
                previous.epochs
            );
        }
        checkpoints.save_config(cfg)?;
        let metrics = MetricsLogger::new(&cfg.checkpoint_dir)?;
        tracing::info!("Logging metrics to '{}'", metrics.csv_path().display());
        let ctx = RunContext { splits, checkpoints, metrics };

        // ── Step 4: Preview a training batch ─────────────────────────────────
        let mut report = TransferReport { preview_plot: self.preview(&ctx.splits)?, ..Default::default() };

        // ── Step 5: Quantized feature extractor ──────────────────────────────
        if cfg.stage.runs_feature_extractor() {
            report.stages.push(self.run_feature_extractor(&ctx)?);
        }

        // ── Step 6: Quantization-aware fine-tuning ───────────────────────────
        if cfg.stage.runs_qat() {
            let summary = match cfg.device {
                DeviceChoice::Cpu  => self.run_qat::<CpuAutodiff>(&ctx, NdArrayDevice::Cpu)?,
                DeviceChoice::Auto => {
                    let device = WgpuDevice::default();
                    tracing::info!("Using WGPU device: {:?}", device);
                    self.run_qat::<GpuAutodiff>(&ctx, device)?
                }
            };
            report.stages.push(summary);
        }

        Ok(report)
    }

    fn load_splits(&self) -> Result<Splits> {
        let root  = Path::new(&self.config.data_dir);
        let train = ImageFolder::scan(root.join(Phase::Train.dir_name()))?;
        let val   = ImageFolder::scan_with_classes(root.join(Phase::Val.dir_name()), train.classes())?;

        let train = ImageFolderDataset::load(&train, Preprocessor::for_phase(Phase::Train))?;
        let val   = ImageFolderDataset::load(&val, Preprocessor::for_phase(Phase::Val))?;
        if train.is_empty() || val.is_empty() {
            bail!("Both splits under '{}' need at least one readable image", root.display());
        }

        let classes = train.classes().clone();
        Ok(Splits { train: Arc::new(train), val: Arc::new(val), classes })
    }

    fn loaders<B: AutodiffBackend>(&self, splits: &Splits, device: B::Device) -> PhaseLoaders<B> {
        let options = self.config.loader_options();
        PhaseLoaders {
            train: build_loader::<B>(splits.train.clone(), options, device.clone()),
            val:   build_loader::<B::InnerBackend>(splits.val.clone(), options, device),
        }
    }

    fn plot_path(&self, name: &str) -> PathBuf {
        Path::new(&self.config.plots_dir).join(name)
    }

    fn model_config(&self, splits: &Splits) -> TransferModelConfig {
        TransferModelConfig::new(splits.classes.len()).with_dropout(self.config.dropout)
    }

    /// StepLR over one stage's base rate, stepped once per epoch.
    fn schedule(&self, base_lr: f64) -> Result<StepLrScheduler> {
        StepLrSchedulerConfig::new(base_lr, self.config.lr_step_size)
            .with_gamma(self.config.lr_gamma)
            .init()
            .map_err(|e| anyhow!("Invalid learning-rate schedule: {}", e))
    }

    fn preview(&self, splits: &Splits) -> Result<Option<PathBuf>> {
        let loader = build_loader::<CpuBackend>(splits.train.clone(), self.config.loader_options(), NdArrayDevice::Cpu);
        let Some(batch) = loader.iter().next() else {
            tracing::warn!("Training split produced no batch to preview");
            return Ok(None);
        };
        show_batch(&batch, &splits.classes, &self.plot_path("batch_preview.png")).map(Some)
    }

    /// Stage 1: train a new head on a frozen, quantized backbone (CPU).
    fn run_feature_extractor(&self, ctx: &RunContext) -> Result<StageSummary> {
        let cfg     = &self.config;
        let device  = NdArrayDevice::Cpu;
        let loaders = self.loaders::<CpuAutodiff>(&ctx.splits, device);

        tracing::info!("[{}] quantizing the pretrained backbone", FEATURE_EXTRACTOR_STAGE);
        let backbone = load_backbone::<CpuAutodiff>(cfg.weights_path(), &device)?;
        let features = quantize_frozen(backbone, loaders.train.as_ref(), cfg.calibration_batches, &device);
        let model    = self.model_config(&ctx.splits).init_with(features, &device);

        let mut optim     = sgd_optimizer::<CpuAutodiff, TransferModel<CpuAutodiff>>(None);
        let mut scheduler = self.schedule(cfg.feature_extractor_lr)?;
        let settings      = TrainSettings { stage: FEATURE_EXTRACTOR_STAGE.to_string(), epochs: cfg.epochs };

        let (model, report) =
            train_model(model, &mut optim, &mut scheduler, &loaders, &settings, Some(&ctx.metrics))?;

        let checkpoint = ctx.checkpoints.save_model(&model, FEATURE_EXTRACTOR_CHECKPOINT)?;
        let predictions_plot = visualize_model(
            &model.valid(),
            loaders.val.as_ref(),
            &ctx.splits.classes,
            cfg.prediction_grid,
            &self.plot_path("feature_extractor_predictions.png"),
        )?;

        Ok(StageSummary {
            stage: FEATURE_EXTRACTOR_STAGE,
            best_acc: report.best_acc,
            elapsed: report.elapsed,
            checkpoint,
            predictions_plot,
            quantized_acc: None,
            footprint: None,
        })
    }

    /// Stage 2: fine-tune everything with fake quantization on `device`,
    /// then bring the weights to the CPU and convert.
    fn run_qat<B: AutodiffBackend>(&self, ctx: &RunContext, device: B::Device) -> Result<StageSummary> {
        let cfg          = &self.config;
        let model_config = self.model_config(&ctx.splits);
        let loaders      = self.loaders::<B>(&ctx.splits, device.clone());

        let backbone = load_backbone::<B>(cfg.weights_path(), &device)?;
        let model    = model_config.init_with(prepare_for_qat(backbone, &device), &device);

        let mut optim     = sgd_optimizer::<B, TransferModel<B>>(Some(cfg.qat_weight_decay as f32));
        let mut scheduler = self.schedule(cfg.qat_lr)?;
        let settings      = TrainSettings { stage: QAT_STAGE.to_string(), epochs: cfg.epochs };

        let (model, report) =
            train_model(model, &mut optim, &mut scheduler, &loaders, &settings, Some(&ctx.metrics))?;
        let checkpoint = ctx.checkpoints.save_model(&model, QAT_CHECKPOINT)?;

        // ── Move to the CPU through the checkpoint ───────────────────────────
        let cpu      = NdArrayDevice::Cpu;
        let skeleton = model_config.init_with(prepare_for_qat(ResNetFeatures::<CpuBackend>::new(&cpu), &cpu), &cpu);
        let cpu_model = ctx.checkpoints.load_model(skeleton, QAT_CHECKPOINT, &cpu)?;

        // ── Convert and evaluate the 8-bit model ─────────────────────────────
        let quantized = convert(cpu_model)?;
        let footprint = quantized.footprint();
        let cpu_val   = build_loader::<CpuBackend>(ctx.splits.val.clone(), cfg.loader_options(), cpu);
        let stats     = evaluate(&quantized, cpu_val.as_ref());
        tracing::info!("[{}] converted model val acc {:.4}", QAT_STAGE, stats.accuracy);

        let predictions_plot = visualize_model(
            &quantized,
            cpu_val.as_ref(),
            &ctx.splits.classes,
            cfg.prediction_grid,
            &self.plot_path("quantized_predictions.png"),
        )?;

        Ok(StageSummary {
            stage: QAT_STAGE,
            best_acc: report.best_acc,
            elapsed: report.elapsed,
            checkpoint,
            predictions_plot,
            quantized_acc: Some(stats.accuracy),
            footprint: Some(footprint),
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::lr_scheduler::LrScheduler;
    use image::RgbImage;
    use std::fs;

    fn write_image(path: &Path, shade: u8) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(40, 30, image::Rgb([shade, 255 - shade, 128])).save(path).unwrap();
    }

    fn image_folder(root: &Path, per_class: usize) {
        for phase in Phase::ALL {
            for (class, shade) in [("ants", 30u8), ("bees", 220u8)] {
                for i in 0..per_class {
                    write_image(&root.join(phase.dir_name()).join(class).join(format!("{i}.png")), shade);
                }
            }
        }
    }

    #[test]
    fn test_defaults_follow_the_tutorial() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.epochs, 25);
        assert_eq!(cfg.feature_extractor_lr, 0.01);
        assert_eq!(cfg.qat_lr, 1e-3);
        assert_eq!(cfg.qat_weight_decay, 0.1);
        assert_eq!((cfg.lr_step_size, cfg.lr_gamma), (7, 0.1));
        assert_eq!(cfg.prediction_grid, (3, 3));
    }

    #[test]
    fn test_schedule_decays_every_step_size_epochs() {
        let mut schedule = TransferUseCase::new(TransferConfig::default()).schedule(0.01).unwrap();
        let lrs: Vec<f64> = (0..15).map(|_| schedule.step()).collect();

        for (epoch, expected) in [(0, 0.01), (6, 0.01), (7, 0.001), (13, 0.001), (14, 0.0001)] {
            assert!((lrs[epoch] - expected).abs() < 1e-12, "epoch {epoch}: {}", lrs[epoch]);
        }
    }

    #[test]
    fn test_zero_step_size_is_rejected() {
        let cfg = TransferConfig { lr_step_size: 0, ..TransferConfig::default() };
        assert!(TransferUseCase::new(cfg).schedule(0.01).is_err());
    }

    #[test]
    fn test_stage_selection() {
        assert!(StageSelection::All.runs_feature_extractor() && StageSelection::All.runs_qat());
        assert!(!StageSelection::Qat.runs_feature_extractor());
        assert!(!StageSelection::FeatureExtractor.runs_qat());
    }

    #[test]
    fn test_config_serialises_stage_names() {
        let json = serde_json::to_string(&TransferConfig::default()).unwrap();
        assert!(json.contains("\"stage\":\"all\""));
        assert!(json.contains("\"device\":\"auto\""));
        let stage: StageSelection = serde_json::from_str("\"feature-extractor\"").unwrap();
        assert_eq!(stage, StageSelection::FeatureExtractor);
    }

    #[test]
    fn test_missing_data_dir_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TransferConfig {
            data_dir:       dir.path().join("nowhere").display().to_string(),
            checkpoint_dir: dir.path().join("ckpt").display().to_string(),
            ..TransferConfig::default()
        };
        assert!(TransferUseCase::new(cfg).execute().is_err());
    }

    #[test]
    fn test_splits_share_the_training_classes() {
        let dir = tempfile::tempdir().unwrap();
        image_folder(dir.path(), 2);
        let cfg = TransferConfig { data_dir: dir.path().display().to_string(), ..TransferConfig::default() };

        let splits = TransferUseCase::new(cfg).load_splits().unwrap();
        assert_eq!(splits.classes.names(), ["ants", "bees"]);
        assert_eq!(splits.train.len(), 4);
        assert_eq!(splits.val.len(), 4);
    }

    #[test]
    #[ignore = "trains ResNet-18 at 224×224 on the CPU"]
    fn test_full_pipeline_on_cpu() {
        let dir = tempfile::tempdir().unwrap();
        image_folder(&dir.path().join("data"), 2);
        let cfg = TransferConfig {
            data_dir:            dir.path().join("data").display().to_string(),
            checkpoint_dir:      dir.path().join("ckpt").display().to_string(),
            plots_dir:           dir.path().join("plots").display().to_string(),
            device:              DeviceChoice::Cpu,
            batch_size:          2,
            num_workers:         1,
            epochs:              1,
            calibration_batches: 1,
            prediction_grid:     (1, 2),
            ..TransferConfig::default()
        };

        let report = TransferUseCase::new(cfg).execute().unwrap();
        assert!(report.preview_plot.unwrap().exists());
        assert_eq!(report.stages.len(), 2);

        let qat = &report.stages[1];
        let footprint = qat.footprint.unwrap();
        assert_eq!(footprint.float_bytes, 4 * footprint.int8_bytes);
        assert!(qat.predictions_plot.exists());
        assert!(dir.path().join("ckpt").join("metrics.csv").exists());
    }
}
