// ============================================================
// Layer 3 — Phase
// ============================================================
// Every epoch runs a training phase and then a validation
// phase. The phase also names the image-folder split on disk
// ("train" / "val") and selects the transform pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Val,
}

impl Phase {
    /// Both phases in the order an epoch runs them
    pub const ALL: [Phase; 2] = [Phase::Train, Phase::Val];

    /// Sub-directory name of this split inside the data directory
    pub fn dir_name(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Val   => "val",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_names() {
        assert_eq!(Phase::Train.dir_name(), "train");
        assert_eq!(Phase::Val.to_string(), "val");
    }

    #[test]
    fn test_epoch_order_is_train_then_val() {
        assert_eq!(Phase::ALL, [Phase::Train, Phase::Val]);
    }
}
