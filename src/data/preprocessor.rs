// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Turns a decoded RGB image into the normalised CHW float
// layout the convolutional backbone expects.
//
// Training pipeline (applied in order):
//   1. Resize so the shorter side is 224 px (aspect preserved)
//   2. Random 224×224 crop
//   3. Random horizontal flip (p = 0.5)
//   4. To tensor: HWC u8 → CHW f32 in [0, 1]
//   5. Normalise each channel with the ImageNet mean / std
//
// Validation pipeline:
//   1. Resize shorter side to 224 px
//   2. Centre 224×224 crop
//   3. To tensor
//   4. Normalise
//
// Step 1 is deterministic, so the dataset runs it once when
// the images are loaded (`resize`). Steps 2-5 run on every
// access (`apply`) so each epoch sees fresh augmentations.

use image::{imageops, imageops::FilterType, RgbImage};
use rand::Rng;

use crate::domain::phase::Phase;

/// Per-channel mean of the ImageNet training set (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation of the ImageNet training set (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Side length the backbone is trained on
pub const IMAGE_SIZE: u32 = 224;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crop {
    Random,
    Center,
}

/// The full per-phase transform.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    /// Target length of the shorter side after resizing
    pub resize:          u32,
    /// Square crop side
    pub crop_size:       u32,
    pub crop:            Crop,
    /// Mirror left-right with probability 0.5
    pub horizontal_flip: bool,
    pub mean:            [f32; 3],
    pub std:             [f32; 3],
}

impl Preprocessor {
    /// The augmentation pipeline for the given phase
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Train => Self {
                resize:          IMAGE_SIZE,
                crop_size:       IMAGE_SIZE,
                crop:            Crop::Random,
                horizontal_flip: true,
                mean:            IMAGENET_MEAN,
                std:             IMAGENET_STD,
            },
            Phase::Val => Self {
                resize:          IMAGE_SIZE,
                crop_size:       IMAGE_SIZE,
                crop:            Crop::Center,
                horizontal_flip: false,
                mean:            IMAGENET_MEAN,
                std:             IMAGENET_STD,
            },
        }
    }

    /// Deterministic first step: shorter side → `self.resize`.
    pub fn resize(&self, img: &RgbImage) -> RgbImage {
        resize_shorter_side(img, self.resize)
    }

    /// Crop, flip, convert and normalise an already resized image.
    /// Returns CHW floats of length 3 × crop_size × crop_size.
    pub fn apply<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let side = self.crop_size.min(width).min(height);

        // ── Crop ──────────────────────────────────────────────────────────────
        let (left, top) = match self.crop {
            Crop::Center => center_offsets(width, height, side),
            Crop::Random => (
                rng.gen_range(0..=width - side),
                rng.gen_range(0..=height - side),
            ),
        };
        let mut cropped = imageops::crop_imm(img, left, top, side, side).to_image();

        // A source image smaller than the crop (only possible when
        // resize < crop_size) is scaled up rather than padded.
        if side != self.crop_size {
            cropped = imageops::resize(&cropped, self.crop_size, self.crop_size, FilterType::Triangle);
        }

        // ── Flip ──────────────────────────────────────────────────────────────
        if self.horizontal_flip && rng.gen_bool(0.5) {
            imageops::flip_horizontal_in_place(&mut cropped);
        }

        self.to_tensor(&cropped)
    }

    /// HWC u8 → normalised CHW f32.
    pub fn to_tensor(&self, img: &RgbImage) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let plane = (width * height) as usize;
        let mut out = vec![0.0f32; 3 * plane];

        for (x, y, pixel) in img.enumerate_pixels() {
            let offset = (y * width + x) as usize;
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                out[c * plane + offset] = (value - self.mean[c]) / self.std[c];
            }
        }
        out
    }
}

/// Resize so that the shorter side equals `size`, keeping the aspect ratio.
pub fn resize_shorter_side(img: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let (new_w, new_h) = if width <= height {
        (size, ((size as u64 * height as u64) / width as u64) as u32)
    } else {
        (((size as u64 * width as u64) / height as u64) as u32, size)
    };

    if (new_w, new_h) == (width, height) {
        return img.clone();
    }
    imageops::resize(img, new_w, new_h, FilterType::Triangle)
}

/// Top-left corner of a centred `side`×`side` window.
pub fn center_offsets(width: u32, height: u32, side: u32) -> (u32, u32) {
    let left = ((width.saturating_sub(side)) as f32 / 2.0).round() as u32;
    let top  = ((height.saturating_sub(side)) as f32 / 2.0).round() as u32;
    (left, top)
}

/// Undo the ImageNet normalisation of one CHW image and clip to [0, 1],
/// producing a displayable RGB image.
pub fn denormalize(pixels: &[f32], height: usize, width: usize) -> RgbImage {
    let plane = height * width;
    let mut img = RgbImage::new(width as u32, height as u32);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let offset = y as usize * width + x as usize;
        for c in 0..3 {
            let raw = pixels.get(c * plane + offset).copied().unwrap_or(0.0);
            let value = (IMAGENET_STD[c] * raw + IMAGENET_MEAN[c]).clamp(0.0, 1.0);
            pixel.0[c] = (value * 255.0).round() as u8;
        }
    }
    img
}
