// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from image files on disk to tensor batches:
//
//   image folder (train/ants/*.jpg ...)
//       │
//       ▼
//   ImageFolder          → lists files, assigns labels
//       │
//       ▼
//   ImageFolderDataset   → decodes + resizes once (Burn Dataset)
//       │
//       ▼
//   Preprocessor         → crop / flip / normalise per access
//       │
//       ▼
//   ImageBatcher         → stacks samples into tensors
//       │
//       ▼
//   DataLoader           → shuffled, multi-worker batches

/// Scans class-per-directory image folders
pub mod loader;

/// Resize / crop / flip / normalise transforms
pub mod preprocessor;

/// Implements Burn's Dataset trait for decoded images
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::transform::ShuffledDataset,
    },
    prelude::*,
};

use batcher::{ImageBatch, ImageBatcher};
use dataset::{ImageFolderDataset, ImageItem};

/// Loader configuration shared by both phases.
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub batch_size:  usize,
    pub num_workers: usize,
    pub seed:        u64,
}

/// Build a shuffled loader over a shared dataset.
/// The dataset sits behind an Arc so both training stages (and the
/// preview) can iterate it without decoding the images again.
///
/// Worker threads each take a contiguous slice of the dataset and only
/// shuffle inside it. Images are listed class by class, so the dataset
/// is permuted once up front to give every slice a mix of classes.
pub fn build_loader<B: Backend>(
    dataset: Arc<ImageFolderDataset>,
    options: LoaderOptions,
    device:  B::Device,
) -> Arc<dyn DataLoader<ImageBatch<B>>> {
    let mut builder = DataLoaderBuilder::new(ImageBatcher::<B>::new(device))
        .batch_size(options.batch_size)
        .shuffle(options.seed);

    if options.num_workers > 1 {
        builder = builder.num_workers(options.num_workers);
    }

    builder.build(ShuffledDataset::<_, ImageItem>::with_seed(dataset, options.seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{loader::ImageFolder, preprocessor::Preprocessor};
    use crate::domain::phase::Phase;
    use burn::backend::NdArray;
    use image::RgbImage;
    use std::collections::HashSet;

    #[test]
    fn test_multi_worker_batches_mix_classes() {
        let tmp = tempfile::tempdir().unwrap();
        for class in ["ants", "bees"] {
            let dir = tmp.path().join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..16 {
                RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]))
                    .save(dir.join(format!("{i:02}.png")))
                    .unwrap();
            }
        }

        let folder = ImageFolder::scan(tmp.path()).unwrap();
        let preprocessor = Preprocessor { resize: 8, crop_size: 8, ..Preprocessor::for_phase(Phase::Val) };
        let dataset = Arc::new(ImageFolderDataset::load(&folder, preprocessor).unwrap());

        let options = LoaderOptions { batch_size: 4, num_workers: 8, seed: 42 };
        let loader  = build_loader::<NdArray>(dataset, options, Default::default());

        let mut batches = 0;
        let mut mixed   = 0;
        let mut seen    = 0;
        for batch in loader.iter() {
            let labels: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
            seen += labels.len();
            batches += 1;
            if labels.iter().collect::<HashSet<_>>().len() > 1 {
                mixed += 1;
            }
        }

        assert_eq!(seen, 32);
        assert!(mixed * 2 > batches, "only {mixed} of {batches} batches mix both classes");
    }
}
