// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// The entry point for all user interaction. Parses arguments
// with clap, delegates to Layer 2 and prints what comes back.
//
//   1. `tensors`  — the tensor tour
//   2. `transfer` — the transfer-learning / QAT tutorial
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, TransferArgs};

use crate::application::transfer_use_case::TransferReport;

#[derive(Parser, Debug)]
#[command(
    name = "transfer-study",
    version = "0.1.0",
    about = "Burn tensor tour, ResNet-18 transfer learning and quantization-aware fine-tuning."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Tensors         => run_tensors(),
            Commands::Transfer(args)  => run_transfer(args),
        }
    }
}

fn run_tensors() -> Result<()> {
    use crate::application::tensor_use_case::TensorUseCase;

    for step in TensorUseCase.execute()? {
        println!("── {} ──", step.title);
        println!("{}\n", step.output);
    }
    Ok(())
}

fn run_transfer(args: TransferArgs) -> Result<()> {
    use crate::application::transfer_use_case::TransferUseCase;

    tracing::info!("Starting transfer learning on images in: {}", args.data_dir);

    let report = TransferUseCase::new(args.into()).execute()?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &TransferReport) {
    if let Some(plot) = &report.preview_plot {
        println!("Batch preview: {}", plot.display());
    }
    for stage in &report.stages {
        let secs = stage.elapsed.as_secs();
        println!(
            "\n[{}] best val Acc {:.4} ({}m {}s)",
            stage.stage,
            stage.best_acc,
            secs / 60,
            secs % 60
        );
        println!("  checkpoint:  {}", stage.checkpoint.display());
        println!("  predictions: {}", stage.predictions_plot.display());
        if let Some(acc) = stage.quantized_acc {
            println!("  converted 8-bit model val Acc: {:.4}", acc);
        }
        if let Some(fp) = stage.footprint {
            println!(
                "  conv weights: {} bytes as f32 → {} bytes as int8",
                fp.float_bytes, fp.int8_bytes
            );
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transfer_use_case::{DeviceChoice, StageSelection, TransferConfig};

    #[test]
    fn test_transfer_defaults() {
        let cli = Cli::try_parse_from(["transfer-study", "transfer"]).unwrap();
        let Commands::Transfer(args) = cli.command else { panic!("expected transfer") };
        let cfg: TransferConfig = args.into();

        assert_eq!(cfg.data_dir, "data/hymenoptera_data");
        assert_eq!(cfg.stage, StageSelection::All);
        assert_eq!(cfg.device, DeviceChoice::Auto);
        assert_eq!((cfg.batch_size, cfg.num_workers, cfg.epochs), (16, 8, 25));
        assert_eq!((cfg.seed, cfg.calibration_batches), (42, 4));
        assert!(cfg.weights.is_none());
    }

    #[test]
    fn test_transfer_flags() {
        let cli = Cli::try_parse_from([
            "transfer-study", "transfer",
            "--stage", "feature-extractor",
            "--device", "cpu",
            "--weights", "resnet18.pth",
            "--epochs", "3",
        ])
        .unwrap();
        let Commands::Transfer(args) = cli.command else { panic!("expected transfer") };
        let cfg: TransferConfig = args.into();

        assert_eq!(cfg.stage, StageSelection::FeatureExtractor);
        assert_eq!(cfg.device, DeviceChoice::Cpu);
        assert_eq!(cfg.weights.as_deref(), Some("resnet18.pth"));
        assert_eq!(cfg.epochs, 3);
        // Not exposed on the command line
        assert_eq!(cfg.qat_lr, 1e-3);
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        assert!(Cli::try_parse_from(["transfer-study", "transfer", "--stage", "bogus"]).is_err());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(Cli::try_parse_from(["transfer-study", "transfer", "--batch-size", "0"]).is_err());

        let cli = Cli::try_parse_from(["transfer-study", "transfer", "--batch-size", "1"]).unwrap();
        let Commands::Transfer(args) = cli.command else { panic!("expected transfer") };
        assert_eq!(args.batch_size, 1);
    }

    #[test]
    fn test_tensors_subcommand() {
        let cli = Cli::try_parse_from(["transfer-study", "tensors"]).unwrap();
        assert!(matches!(cli.command, Commands::Tensors));
    }
}
