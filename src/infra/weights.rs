// ============================================================
// Layer 6 — Pretrained Backbone Weights
// ============================================================
// The backbone starts from ImageNet weights supplied as a
// local file; nothing is downloaded.
//
//   .pt / .pth    torchvision state dict, read with
//                 burn-import's PyTorch recorder
//   .mpk.gz       a Burn record (full precision, gzip)
//   .mpk          a Burn record (full precision)
//   none          random initialisation + warning
//
// torchvision key → ResNetFeatures field:
//
//   conv1.*                    → stem.*
//   bn1.*                      → stem.bn.*
//   layerL.K.bnN.*             → layerL.K.convN.bn.*
//   layerL.K.downsample.0.*    → layerL.K.downsample.*
//   layerL.K.downsample.1.*    → layerL.K.downsample.bn.*
//   fc.*                       → (ignored, the head is new)
//
// BatchNorm weight / bias → gamma / beta is handled by the
// PyTorch adapter itself.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, NamedMpkGzFileRecorder, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::ml::resnet::ResNetFeatures;

/// torchvision → ResNetFeatures key remapping, applied in order
pub const TORCHVISION_KEY_REMAP: [(&str, &str); 5] = [
    (r"^conv1\.(.+)",                          "stem.$1"),
    (r"^bn1\.(.+)",                            "stem.bn.$1"),
    (r"^(layer[1-4]\.[0-9]+)\.bn([12])\.(.+)", "$1.conv$2.bn.$3"),
    (r"downsample\.0\.",                       "downsample."),
    (r"downsample\.1\.(.+)",                   "downsample.bn.$1"),
];

/// How a weights file is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsFormat {
    PyTorch,
    /// Burn record; the path has its extension stripped
    BurnGz(PathBuf),
    Burn(PathBuf),
}

impl WeightsFormat {
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if name.ends_with(".pt") || name.ends_with(".pth") {
            Ok(Self::PyTorch)
        } else if name.ends_with(".mpk.gz") {
            Ok(Self::BurnGz(strip_suffix(path, ".mpk.gz".len())))
        } else if name.ends_with(".mpk") {
            Ok(Self::Burn(strip_suffix(path, ".mpk".len())))
        } else {
            bail!("Unsupported weights file '{}' (expected .pt, .pth, .mpk or .mpk.gz)", path.display())
        }
    }
}

fn strip_suffix(path: &Path, suffix_len: usize) -> PathBuf {
    let s = path.to_string_lossy();
    PathBuf::from(&s[..s.len() - suffix_len])
}

/// Build a ResNet-18 trunk, loading pretrained weights when a file is given.
pub fn load_backbone<B: Backend>(weights: Option<&Path>, device: &B::Device) -> Result<ResNetFeatures<B>> {
    let features = ResNetFeatures::new(device);

    let Some(path) = weights else {
        tracing::warn!("No --weights given; the backbone is randomly initialised");
        return Ok(features);
    };
    if !path.exists() {
        bail!("Weights file '{}' does not exist", path.display());
    }

    let features = match WeightsFormat::detect(path)? {
        WeightsFormat::PyTorch => {
            let args = TORCHVISION_KEY_REMAP
                .iter()
                .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
                    args.with_key_remap(pattern, replacement)
                });
            let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
                .load(args, device)
                .with_context(|| format!("Cannot read PyTorch weights '{}'", path.display()))?;
            features.load_record(record)
        }
        WeightsFormat::BurnGz(stem) => {
            let record = NamedMpkGzFileRecorder::<FullPrecisionSettings>::new()
                .load(stem, device)
                .with_context(|| format!("Cannot read Burn record '{}'", path.display()))?;
            features.load_record(record)
        }
        WeightsFormat::Burn(stem) => {
            let record = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
                .load(stem, device)
                .with_context(|| format!("Cannot read Burn record '{}'", path.display()))?;
            features.load_record(record)
        }
    };

    tracing::info!("Loaded pretrained backbone from '{}'", path.display());
    Ok(features)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use regex::Regex;

    type TestBackend = NdArray;

    fn remap(key: &str) -> String {
        TORCHVISION_KEY_REMAP.iter().fold(key.to_string(), |k, (pattern, replacement)| {
            Regex::new(pattern).unwrap().replace_all(&k, *replacement).into_owned()
        })
    }

    #[test]
    fn test_torchvision_keys_map_onto_fields() {
        assert_eq!(remap("conv1.weight"), "stem.weight");
        assert_eq!(remap("bn1.running_var"), "stem.bn.running_var");
        assert_eq!(remap("layer1.0.conv2.weight"), "layer1.0.conv2.weight");
        assert_eq!(remap("layer3.1.bn1.bias"), "layer3.1.conv1.bn.bias");
        assert_eq!(remap("layer2.0.downsample.0.weight"), "layer2.0.downsample.weight");
        assert_eq!(remap("layer4.0.downsample.1.running_mean"), "layer4.0.downsample.bn.running_mean");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(WeightsFormat::detect(Path::new("w/resnet18.PTH")).unwrap(), WeightsFormat::PyTorch);
        assert_eq!(
            WeightsFormat::detect(Path::new("w/backbone.mpk.gz")).unwrap(),
            WeightsFormat::BurnGz(PathBuf::from("w/backbone")),
        );
        assert!(WeightsFormat::detect(Path::new("w/backbone.onnx")).is_err());
    }

    #[test]
    fn test_missing_weights_file_is_an_error() {
        let device = Default::default();
        assert!(load_backbone::<TestBackend>(Some(Path::new("/no/such/file.pt")), &device).is_err());
    }

    #[test]
    fn test_burn_record_round_trip() {
        let dir      = tempfile::tempdir().unwrap();
        let device   = Default::default();
        let original = ResNetFeatures::<TestBackend>::new(&device);
        NamedMpkGzFileRecorder::<FullPrecisionSettings>::new()
            .record(original.clone().into_record(), dir.path().join("backbone"))
            .unwrap();

        let path   = dir.path().join("backbone.mpk.gz");
        let loaded = load_backbone::<TestBackend>(Some(&path), &device).unwrap();

        let a: Vec<f32> = original.stem.weight.val().into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.stem.weight.val().into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }
}
