// ============================================================
// Layer 4 — Image Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<ImageItem>
// into one image tensor and one label tensor.
//
//   Input:  N ImageItems, each C×H×W floats
//   Output: images  [N, C, H, W]
//           targets [N]
//
// Every item coming out of the same dataset has the same crop
// size, so stacking is a flatten + reshape.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::ImageItem;

/// A mini-batch ready for the forward pass.
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// Normalised pixels — shape: [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,

    /// Class labels — shape: [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Holds the target device so tensors are created where the model lives.
#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let batch_size = items.len();
        let (channels, height, width) = items
            .first()
            .map(|item| (item.channels(), item.height, item.width))
            .unwrap_or((3, 0, 0));

        // ── Flatten pixels in sample order ────────────────────────────────────
        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|item| item.pixels.iter().copied())
            .collect();

        let labels: Vec<i32> = items.iter().map(|item| item.label as i32).collect();

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([batch_size, channels, height, width]);

        let targets = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_batch_shapes_and_labels() {
        let item = |label: usize, value: f32| ImageItem {
            pixels: vec![value; 3 * 2 * 4],
            height: 2,
            width:  4,
            label,
        };
        let batcher = ImageBatcher::<NdArray>::new(Default::default());
        let batch   = batcher.batch(vec![item(1, 0.5), item(0, -0.5)]);

        assert_eq!(batch.images.dims(), [2, 3, 2, 4]);
        let targets: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(targets, vec![1, 0]);

        // Second sample's pixels land in the second row of the batch
        let second: Vec<f32> = batch.images.slice([1..2]).into_data().convert::<f32>().to_vec().unwrap();
        assert!(second.iter().all(|&v| v == -0.5));
    }
}
