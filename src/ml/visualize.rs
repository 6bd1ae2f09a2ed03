// ============================================================
// Layer 5 — Visualisation
// ============================================================
// Renders image grids to PNG files with plotters' bitmap
// backend:
//
//   show_batch       one training batch, titled by true class
//   visualize_model  validation images, titled by prediction
//
// Tensors are denormalised back to 8-bit RGB before drawing.
// Titles need a system font; when none is available the tile
// is drawn untitled and a warning is logged.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::{data::dataloader::DataLoader, prelude::*};
use image::RgbImage;
use plotters::prelude::*;

use crate::data::{batcher::ImageBatch, preprocessor::denormalize};
use crate::domain::image::ClassIndex;
use crate::ml::model::ImageClassifier;

/// Pixel rows reserved above every image for its title
const TITLE_HEIGHT: u32 = 24;

/// Images per row in `show_batch`
pub const BATCH_GRID_COLUMNS: usize = 4;

/// One titled image of a grid
#[derive(Debug, Clone)]
pub struct Tile {
    pub image: RgbImage,
    pub title: String,
}

/// Rows needed to lay out `count` tiles `cols` to a row
pub fn grid_rows(count: usize, cols: usize) -> usize {
    count.div_ceil(cols.max(1))
}

/// Turn (up to `limit`) images of a batch into titled tiles
pub fn tiles_from_images<B: Backend>(
    images: Tensor<B, 4>,
    titles: impl IntoIterator<Item = String>,
    limit:  usize,
) -> Result<Vec<Tile>> {
    let [batch_size, channels, height, width] = images.dims();
    let pixels = images
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Cannot read image batch: {e:?}"))?;

    let per_image = channels * height * width;
    Ok(titles
        .into_iter()
        .take(batch_size.min(limit))
        .enumerate()
        .map(|(i, title)| Tile {
            image: denormalize(&pixels[i * per_image..(i + 1) * per_image], height, width),
            title,
        })
        .collect())
}

/// Draw tiles into a `cols`-wide grid and write it as a PNG
pub fn render_grid(tiles: &[Tile], cols: usize, path: &Path) -> Result<()> {
    let Some(first) = tiles.first() else {
        tracing::warn!("Nothing to draw for '{}'", path.display());
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create plot directory '{}'", parent.display()))?;
    }

    let cols = cols.max(1).min(tiles.len());
    let rows = grid_rows(tiles.len(), cols);
    let (tile_w, tile_h) = first.image.dimensions();
    let size = (cols as u32 * tile_w, rows as u32 * (tile_h + TITLE_HEIGHT));

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow!("backend error: {e}"))?;

    for (cell, tile) in root.split_evenly((rows, cols)).iter().zip(tiles) {
        let area = match cell.titled(&tile.title, ("sans-serif", 16)) {
            Ok(area) => area,
            Err(e) => {
                tracing::warn!("Cannot draw title '{}': {}", tile.title, e);
                cell.margin(TITLE_HEIGHT as i32, 0, 0, 0)
            }
        };
        for (x, y, p) in tile.image.enumerate_pixels() {
            area.draw_pixel((x as i32, y as i32), &RGBColor(p[0], p[1], p[2]))
                .map_err(|e| anyhow!("draw error: {e}"))?;
        }
    }

    root.present().map_err(|e| anyhow!("render error: {e}"))?;
    tracing::info!("Wrote '{}'", path.display());
    Ok(())
}

/// Grid of one batch, titled by the true class of each image
pub fn show_batch<B: Backend>(
    batch:   &ImageBatch<B>,
    classes: &ClassIndex,
    path:    &Path,
) -> Result<PathBuf> {
    let labels = batch
        .targets
        .clone()
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow!("Cannot read batch labels: {e:?}"))?;

    let titles = labels.iter().map(|&label| class_name(classes, label).to_string());
    let tiles  = tiles_from_images(batch.images.clone(), titles, usize::MAX)?;

    render_grid(&tiles, BATCH_GRID_COLUMNS, path)?;
    Ok(path.to_path_buf())
}

/// Run the model over validation batches until `quota` images are collected
pub fn collect_predictions<B: Backend, M: ImageClassifier<B>>(
    model:   &M,
    loader:  &dyn DataLoader<ImageBatch<B>>,
    classes: &ClassIndex,
    quota:   usize,
) -> Result<Vec<Tile>> {
    let mut tiles = Vec::with_capacity(quota);

    for batch in loader.iter() {
        if tiles.len() >= quota {
            break;
        }
        let predictions = model
            .logits(batch.images.clone())
            .argmax(1)
            .squeeze::<1>(1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| anyhow!("Cannot read predictions: {e:?}"))?;

        let titles = predictions
            .iter()
            .map(|&p| format!("predicted: {}", class_name(classes, p)));
        tiles.extend(tiles_from_images(batch.images, titles, quota - tiles.len())?);
    }

    Ok(tiles)
}

/// `rows × cols` validation images titled with the model's prediction
pub fn visualize_model<B: Backend, M: ImageClassifier<B>>(
    model:   &M,
    loader:  &dyn DataLoader<ImageBatch<B>>,
    classes: &ClassIndex,
    grid:    (usize, usize),
    path:    &Path,
) -> Result<PathBuf> {
    let (rows, cols) = grid;
    let tiles = collect_predictions(model, loader, classes, rows * cols)?;
    render_grid(&tiles, cols, path)?;
    Ok(path.to_path_buf())
}

fn class_name(classes: &ClassIndex, label: i64) -> &str {
    usize::try_from(label)
        .ok()
        .and_then(|l| classes.name_of(l))
        .unwrap_or("?")
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{batcher::ImageBatcher, dataset::ImageItem};
    use burn::{
        backend::NdArray,
        data::{dataloader::DataLoaderBuilder, dataset::InMemDataset},
    };

    type TestBackend = NdArray;

    /// Always votes for class 1
    struct AlwaysBees;

    impl<B: Backend> ImageClassifier<B> for AlwaysBees {
        fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
            let [n, ..] = images.dims();
            let row = Tensor::<B, 1>::from_floats([0.0, 1.0], &images.device());
            row.unsqueeze::<2>().repeat_dim(0, n)
        }
    }

    fn classes() -> ClassIndex {
        ClassIndex::from_names(["ants", "bees"])
    }

    fn loader(count: usize) -> std::sync::Arc<dyn DataLoader<ImageBatch<TestBackend>>> {
        let items = (0..count)
            .map(|i| ImageItem { pixels: vec![0.0; 3 * 4 * 4], height: 4, width: 4, label: i % 2 })
            .collect();
        DataLoaderBuilder::new(ImageBatcher::<TestBackend>::new(Default::default()))
            .batch_size(4)
            .build(InMemDataset::new(items))
    }

    #[test]
    fn test_grid_rows() {
        assert_eq!(grid_rows(16, 4), 4);
        assert_eq!(grid_rows(9, 4), 3);
        assert_eq!(grid_rows(0, 4), 0);
    }

    #[test]
    fn test_prediction_quota_stops_collection() {
        let tiles = collect_predictions(&AlwaysBees, loader(10).as_ref(), &classes(), 6).unwrap();
        assert_eq!(tiles.len(), 6);
        assert!(tiles.iter().all(|t| t.title == "predicted: bees"));
        assert_eq!(tiles[0].image.dimensions(), (4, 4));
    }

    #[test]
    fn test_short_loader_yields_fewer_tiles() {
        let tiles = collect_predictions(&AlwaysBees, loader(3).as_ref(), &classes(), 9).unwrap();
        assert_eq!(tiles.len(), 3);
    }

    #[test]
    fn test_show_batch_writes_png() {
        let dir   = tempfile::tempdir().unwrap();
        let path  = dir.path().join("plots").join("batch.png");
        let batch = loader(5).iter().next().unwrap();

        show_batch(&batch, &classes(), &path).unwrap();
        let written = image::open(&path).unwrap();
        // 4 images of 4×4 in one row, each with a title band
        assert_eq!(written.width(), 16);
        assert_eq!(written.height(), 4 + TITLE_HEIGHT);
    }
}
