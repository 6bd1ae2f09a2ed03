// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that touch the filesystem:
//
//   checkpoint.rs — Saving and loading model weights with
//                   Burn's full-precision file recorder, plus
//                   the run configuration as JSON.
//
//   weights.rs    — Reading pretrained backbone weights from
//                   a torchvision state dict or a Burn record.
//
//   metrics.rs    — Per-epoch, per-phase metrics appended to
//                   a CSV file for later plotting.
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)
//            Burn Book §8 (Importing PyTorch models)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Pretrained backbone weights
pub mod weights;

/// Training metrics CSV logger
pub mod metrics;
