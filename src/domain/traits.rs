// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The dataset layer only needs "something that can list
// labelled images". The image-folder scanner is the one
// implementation today; an archive or manifest reader could
// implement the same trait without the dataset changing.

use anyhow::Result;

use crate::domain::image::{ClassIndex, LabeledImage};

// ─── ImageSource ──────────────────────────────────────────────────────────────
/// Any component that can enumerate labelled images.
///
/// Implementations:
///   - ImageFolder → one sub-directory per class
pub trait ImageSource {
    /// The class table the labels refer to
    fn classes(&self) -> &ClassIndex;

    /// List every labelled image this source knows about.
    fn load_all(&self) -> Result<Vec<LabeledImage>>;
}
