// ============================================================
// Layer 5 — Quantization-Aware Training Helpers
// ============================================================
// Two ways the backbone gets quantized:
//
//   quantize_frozen   "quantized pretrained feature extractor"
//     fuse → attach observers → calibrate on a few batches
//     → snap weights to the int8 grid → freeze observers
//     → no_grad. Only the new head learns on top of it.
//
//   prepare_for_qat   "quantization-aware fine-tuning"
//     fuse → attach observers, everything stays trainable;
//     observers keep learning ranges while the loss is
//     optimised, and convert() freezes them afterwards.
//
// Observers only update on an autodiff backend, so
// calibration runs on B: AutodiffBackend.

use burn::{
    data::dataloader::DataLoader,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::ImageBatch;
use crate::ml::resnet::ResNetFeatures;

/// Run up to `batches` batches through the features with observers enabled.
/// Returns the number of batches actually seen.
pub fn calibrate<B: AutodiffBackend>(
    features: &ResNetFeatures<B>,
    loader:   &dyn DataLoader<ImageBatch<B>>,
    batches:  usize,
) -> usize {
    let mut seen = 0;
    for batch in loader.iter().take(batches) {
        // Only the observer side effect matters
        let _ = features.forward(batch.images);
        seen += 1;
    }
    tracing::debug!("Calibrated observers on {} batches", seen);
    seen
}

/// Fused, calibrated, weight-snapped, frozen and gradient-free backbone
pub fn quantize_frozen<B: AutodiffBackend>(
    features: ResNetFeatures<B>,
    loader:   &dyn DataLoader<ImageBatch<B>>,
    batches:  usize,
    device:   &B::Device,
) -> ResNetFeatures<B> {
    let features = features.fuse().prepare_qat(device);
    let seen     = calibrate(&features, loader, batches);
    if seen == 0 {
        tracing::warn!("No calibration batches; activations stay unquantized");
    }

    features
        .snap_weights()
        .freeze_observers()
        .no_grad()
}

/// Fused backbone with live observers, ready for fine-tuning
pub fn prepare_for_qat<B: Backend>(features: ResNetFeatures<B>, device: &B::Device) -> ResNetFeatures<B> {
    features.fuse().prepare_qat(device)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{batcher::ImageBatcher, dataset::ImageItem};
    use burn::{
        backend::{Autodiff, NdArray},
        data::{dataloader::DataLoaderBuilder, dataset::InMemDataset},
    };

    type TestAutodiff = Autodiff<NdArray>;

    fn loader(count: usize) -> std::sync::Arc<dyn DataLoader<ImageBatch<TestAutodiff>>> {
        let items = (0..count)
            .map(|i| ImageItem {
                pixels: (0..3 * 32 * 32).map(|p| ((p + i) % 7) as f32 / 7.0 - 0.5).collect(),
                height: 32,
                width:  32,
                label:  i % 2,
            })
            .collect();
        DataLoaderBuilder::new(ImageBatcher::<TestAutodiff>::new(Default::default()))
            .batch_size(2)
            .build(InMemDataset::new(items))
    }

    #[test]
    fn test_calibration_stops_at_requested_batches() {
        let device   = Default::default();
        let features = prepare_for_qat(ResNetFeatures::<TestAutodiff>::new(&device), &device);
        assert_eq!(calibrate(&features, loader(6).as_ref(), 2), 2);
        assert_eq!(calibrate(&features, loader(2).as_ref(), 4), 1);
    }

    #[test]
    fn test_quantize_frozen_observes_then_freezes() {
        let device   = Default::default();
        let features = ResNetFeatures::<TestAutodiff>::new(&device);
        let frozen   = quantize_frozen(features, loader(4).as_ref(), 2, &device);

        let input = frozen.quant.as_ref().unwrap();
        assert!(!input.observe);
        assert!(input.observed_range().is_some());
        assert!(frozen.stem.bn.is_none());
        assert!(!frozen.stem.weight.val().is_require_grad());
    }
}
