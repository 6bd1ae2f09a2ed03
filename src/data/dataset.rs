use anyhow::Result;
use burn::data::dataset::Dataset;
use image::RgbImage;

use crate::data::preprocessor::Preprocessor;
use crate::domain::image::{ClassIndex, LabeledImage};
use crate::domain::traits::ImageSource;

/// One transformed sample: normalised CHW pixels plus its label.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub height: usize,
    pub width:  usize,
    pub label:  usize,
}

impl ImageItem {
    pub fn channels(&self) -> usize {
        self.pixels.len() / (self.height * self.width).max(1)
    }
}

/// Images decoded and resized once, augmented on every `get`.
pub struct ImageFolderDataset {
    images:       Vec<(RgbImage, usize)>,
    preprocessor: Preprocessor,
    classes:      ClassIndex,
}

impl ImageFolderDataset {
    /// Decode every image the source lists. Files that fail to decode are
    /// logged and skipped so one corrupt download doesn't stop the run.
    pub fn load(source: &impl ImageSource, preprocessor: Preprocessor) -> Result<Self> {
        let listed = source.load_all()?;
        let mut images = Vec::with_capacity(listed.len());

        for LabeledImage { path, label } in listed {
            match image::open(&path) {
                Ok(img) => images.push((preprocessor.resize(&img.to_rgb8()), label)),
                Err(e) => tracing::warn!("Skipping '{}': {}", path.display(), e),
            }
        }

        tracing::info!("Decoded {} images", images.len());
        Ok(Self { images, preprocessor, classes: source.classes().clone() })
    }

    pub fn classes(&self) -> &ClassIndex {
        &self.classes
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let (img, label) = self.images.get(index)?;
        let side = self.preprocessor.crop_size as usize;
        let pixels = self.preprocessor.apply(img, &mut rand::thread_rng());

        Some(ImageItem { pixels, height: side, width: side, label: *label })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::ImageFolder;
    use crate::domain::phase::Phase;
    use std::fs;

    fn write_png(path: &std::path::Path, w: u32, h: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(w, h, image::Rgb([90, 120, 200])).save(path).unwrap();
    }

    #[test]
    fn test_items_are_cropped_to_224() {
        let tmp = tempfile::tempdir().unwrap();
        write_png(&tmp.path().join("ants/a.png"), 40, 30);
        write_png(&tmp.path().join("bees/b.png"), 30, 50);

        let folder  = ImageFolder::scan(tmp.path()).unwrap();
        let dataset = ImageFolderDataset::load(&folder, Preprocessor::for_phase(Phase::Train)).unwrap();
        assert_eq!(dataset.len(), 2);

        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, 1);
        assert_eq!((item.height, item.width, item.channels()), (224, 224, 3));
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn test_corrupt_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_png(&tmp.path().join("ants/good.png"), 8, 8);
        fs::write(tmp.path().join("ants/bad.png"), b"not a png").unwrap();

        let folder  = ImageFolder::scan(tmp.path()).unwrap();
        let dataset = ImageFolderDataset::load(&folder, Preprocessor::for_phase(Phase::Val)).unwrap();
        assert_eq!(dataset.len(), 1);
    }
}
