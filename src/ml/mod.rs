// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that touches Burn modules, tensors or optimisers
// lives here. Other layers hand it data loaders and paths and
// get back trained models, reports and plots.
//
// What's in this layer:
//
//   tensor_tour.rs  — Tensor API walkthrough (construction,
//                     dtypes, arithmetic, indexing, ndarray)
//
//   quant.rs        — Fake quantization: observers, STE,
//                     int8 storage
//
//   resnet.rs       — ResNet-18 feature extractor with
//                     conv+BN folding and QAT hooks
//
//   model.rs        — New classification head and the
//                     combined transfer model
//
//   qat.rs          — Calibration, frozen quantized backbone,
//                     QAT preparation
//
//   trainer.rs      — Train / val loop with best snapshot
//
//   convert.rs      — QAT model → 8-bit inference model
//
//   visualize.rs    — PNG grids of batches and predictions
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            He et al. (2016) Deep Residual Learning
//            Jacob et al. (2018) Quantization and Training of
//            Neural Networks for Efficient Integer-Arithmetic-Only
//            Inference

/// Tensor API walkthrough
pub mod tensor_tour;

/// Observers, fake quantization and int8 tensors
pub mod quant;

/// ResNet-18 backbone
pub mod resnet;

/// Transfer head + combined model
pub mod model;

/// Calibration and QAT preparation
pub mod qat;

/// Training loop with validation and best-weights tracking
pub mod trainer;

/// Conversion to the quantized inference model
pub mod convert;

/// Image grids rendered to PNG
pub mod visualize;

use burn::backend::{Autodiff, NdArray, Wgpu};

/// CPU backend: stage 1, conversion and inference
pub type CpuBackend  = NdArray;
pub type CpuAutodiff = Autodiff<CpuBackend>;

/// GPU backend (best adapter the host exposes)
pub type GpuBackend  = Wgpu;
pub type GpuAutodiff = Autodiff<GpuBackend>;
