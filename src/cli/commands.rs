// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `tensors` and `transfer`, and
// all their configurable flags.
//
// clap's derive macros generate --help text, error messages
// for bad values and the string → number conversions.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{builder::RangedU64ValueParser, Args, Subcommand, ValueEnum};

use crate::application::transfer_use_case::{DeviceChoice, StageSelection, TransferConfig};

/// The top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walk through tensor construction, arithmetic and ndarray interop
    Tensors,

    /// Transfer learning on an image folder, then quantization-aware fine-tuning
    Transfer(TransferArgs),
}

/// Which tutorial stages to run
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    All,
    /// New head on a frozen, quantized backbone (CPU)
    FeatureExtractor,
    /// Quantization-aware fine-tuning of the whole network
    Qat,
}

/// Device for the fine-tuning stage
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// GPU through wgpu when available
    Auto,
    Cpu,
}

/// All arguments for the `transfer` command.
#[derive(Args, Debug)]
pub struct TransferArgs {
    #[arg(long, value_enum, default_value_t = Stage::All)]
    pub stage: Stage,

    /// Directory with train/ and val/ class sub-folders
    #[arg(long, default_value = "data/hymenoptera_data")]
    pub data_dir: String,

    /// Pretrained ResNet-18 weights (.pt/.pth state dict or .mpk/.mpk.gz record)
    #[arg(long)]
    pub weights: Option<String>,

    /// Where best-weights checkpoints, the run config and metrics.csv go
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Where the PNG grids go
    #[arg(long, default_value = "plots")]
    pub plots_dir: String,

    #[arg(long, default_value_t = 16, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub batch_size: usize,

    /// Data loader worker threads
    #[arg(long, default_value_t = 8)]
    pub num_workers: usize,

    /// Epochs per stage
    #[arg(long, default_value_t = 25)]
    pub epochs: usize,

    #[arg(long, value_enum, default_value_t = Device::Auto)]
    pub device: Device,

    /// Shuffle seed of both loaders
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Batches used to calibrate the quantized feature extractor
    #[arg(long, default_value_t = 4)]
    pub calibration_batches: usize,
}

impl From<Stage> for StageSelection {
    fn from(s: Stage) -> Self {
        match s {
            Stage::All              => StageSelection::All,
            Stage::FeatureExtractor => StageSelection::FeatureExtractor,
            Stage::Qat              => StageSelection::Qat,
        }
    }
}

impl From<Device> for DeviceChoice {
    fn from(d: Device) -> Self {
        match d {
            Device::Auto => DeviceChoice::Auto,
            Device::Cpu  => DeviceChoice::Cpu,
        }
    }
}

/// Convert CLI TransferArgs into the application-layer TransferConfig.
/// The application layer never sees clap types; hyperparameters the CLI
/// does not expose keep their defaults.
impl From<TransferArgs> for TransferConfig {
    fn from(a: TransferArgs) -> Self {
        TransferConfig {
            data_dir:            a.data_dir,
            weights:             a.weights,
            checkpoint_dir:      a.checkpoint_dir,
            plots_dir:           a.plots_dir,
            stage:               a.stage.into(),
            device:              a.device.into(),
            batch_size:          a.batch_size,
            num_workers:         a.num_workers,
            epochs:              a.epochs,
            seed:                a.seed,
            calibration_batches: a.calibration_batches,
            ..TransferConfig::default()
        }
    }
}
