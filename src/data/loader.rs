// ============================================================
// Layer 4 — Image Folder Loader
// ============================================================
// Scans a directory laid out as one sub-directory per class:
//
//   data/hymenoptera_data/
//     train/
//       ants/  0013035.jpg  1030023514_aad5c608f9.jpg ...
//       bees/  1092977343_cb42b38d62.jpg ...
//     val/
//       ants/  ...
//       bees/  ...
//
// Class names come from the sub-directory names (sorted), and
// every file with a known image extension becomes one
// LabeledImage. Anything else (README files, .DS_Store, nested
// folders) is ignored.
//
// The validation split must use the training split's class
// table, otherwise label 1 could mean "bees" in one split and
// something else in the other. `scan_with_classes` enforces it.

use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::image::{ClassIndex, LabeledImage};
use crate::domain::traits::ImageSource;

/// File extensions accepted as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp",
];

/// A class-per-subdirectory image folder.
/// Implements the ImageSource trait from Layer 3.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    /// The split directory, e.g. data/hymenoptera_data/train
    root: PathBuf,
    classes: ClassIndex,
}

impl ImageFolder {
    /// Scan `root` and derive the class table from its sub-directories.
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let names = class_dirs(&root)?;
        if names.is_empty() {
            bail!("No class sub-directories found in '{}'", root.display());
        }

        let classes = ClassIndex::from_names(names);
        tracing::info!(
            "Found {} classes in '{}': {:?}",
            classes.len(),
            root.display(),
            classes.names()
        );
        Ok(Self { root, classes })
    }

    /// Scan `root` but label its images with an existing class table.
    /// Fails if the directory contains a class the table doesn't know.
    pub fn scan_with_classes(root: impl Into<PathBuf>, classes: &ClassIndex) -> Result<Self> {
        let root = root.into();
        for name in class_dirs(&root)? {
            if classes.label_of(&name).is_none() {
                bail!(
                    "Class '{}' in '{}' is not one of the training classes {:?}",
                    name,
                    root.display(),
                    classes.names()
                );
            }
        }
        Ok(Self { root, classes: classes.clone() })
    }
}

impl ImageSource for ImageFolder {
    fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    fn load_all(&self) -> Result<Vec<LabeledImage>> {
        let mut images = Vec::new();

        for (label, name) in self.classes.names().iter().enumerate() {
            let class_dir = self.root.join(name);

            // A class may legitimately be absent from one split
            if !class_dir.is_dir() {
                tracing::warn!("Class directory '{}' is missing", class_dir.display());
                continue;
            }

            let mut files: Vec<PathBuf> = fs::read_dir(&class_dir)
                .with_context(|| format!("Cannot read directory '{}'", class_dir.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && has_image_extension(path))
                .collect();

            // read_dir order is platform dependent
            files.sort();

            tracing::debug!("{}: {} images", name, files.len());
            images.extend(files.into_iter().map(|path| LabeledImage::new(path, label)));
        }

        tracing::info!("Listed {} images under '{}'", images.len(), self.root.display());
        Ok(images)
    }
}

/// Names of the immediate sub-directories of `root`.
fn class_dirs(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        bail!("Image folder '{}' does not exist", root.display());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(root)
        .with_context(|| format!("Cannot read directory '{}'", root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}
