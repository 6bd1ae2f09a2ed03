// ============================================================
// Layer 3 — Image Domain Types
// ============================================================
// An image-folder dataset is nothing more than a list of
// (file path, integer label) pairs plus the table that maps
// each label back to a human readable class name.
//
// Labels follow the image-folder convention: class names are
// the sub-directory names, sorted, and the label of a class is
// its position in that sorted list.
//
//   data/hymenoptera_data/train/
//     ants/   → label 0
//     bees/   → label 1

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One image file on disk and the class it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledImage {
    /// Full path to the image file
    pub path: PathBuf,

    /// Index into the ClassIndex of the split it came from
    pub label: usize,
}

impl LabeledImage {
    pub fn new(path: impl Into<PathBuf>, label: usize) -> Self {
        Self { path: path.into(), label }
    }
}

/// Sorted class names; a class's label is its index.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassIndex {
    names: Vec<String>,
}

impl ClassIndex {
    /// Build the index from class names in any order.
    /// Names are sorted and de-duplicated so the labels are stable
    /// regardless of the order the file system lists directories.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Label for a class name, if the class is known
    pub fn label_of(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    /// Class name for a label, if the label is in range
    pub fn name_of(&self, label: usize) -> Option<&str> {
        self.names.get(label).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
