// ============================================================
// Layer 5 — Fake Quantization
// ============================================================
// Quantization-aware training simulates 8-bit arithmetic in
// the float graph:
//
//   q  = clamp(round(x / scale) + zero_point, qmin, qmax)
//   x̂  = (q - zero_point) * scale
//
// The forward pass sees x̂ (so the loss reflects the rounding
// error), the backward pass treats the rounding as identity
// (straight-through estimator): x + (x̂ - x).detach().
//
// scale / zero_point come from an observer that tracks the
// running min / max of everything that flows through it:
//
//   first batch:  range = [min(x), max(x)]
//   later:        range += 0.01 * ([min(x), max(x)] - range)
//
// Two flavours are used, matching the usual 8-bit backend:
//   activations → unsigned affine   [0, 255]
//   weights     → signed symmetric  [-128, 127], zero_point 0

use burn::{
    module::RunningState,
    prelude::*,
    tensor::ElementConversion,
};
use serde::{Deserialize, Serialize};

/// Observer averaging constant
pub const AVERAGING_CONSTANT: f32 = 0.01;

/// Integer range and scheme of one quantized value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantRange {
    pub qmin:      i32,
    pub qmax:      i32,
    pub symmetric: bool,
}

/// Unsigned 8-bit affine — activations
pub const ACTIVATION_RANGE: QuantRange = QuantRange { qmin: 0, qmax: 255, symmetric: false };

/// Signed 8-bit symmetric — weights
pub const WEIGHT_RANGE: QuantRange = QuantRange { qmin: -128, qmax: 127, symmetric: true };

/// Affine quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QParams {
    pub scale:      f32,
    pub zero_point: i32,
}

impl QuantRange {
    /// Derive scale / zero point from an observed [min, max].
    /// The range is widened to include 0 so that zero is exactly representable.
    pub fn qparams(&self, min: f32, max: f32) -> QParams {
        let min = min.min(0.0);
        let max = max.max(0.0);
        let levels = (self.qmax - self.qmin) as f32;

        if self.symmetric {
            let bound = max.max(-min);
            let scale = (bound / (levels / 2.0)).max(f32::EPSILON);
            QParams { scale, zero_point: 0 }
        } else {
            let scale = ((max - min) / levels).max(f32::EPSILON);
            let zero_point = (self.qmin - (min / scale).round() as i32).clamp(self.qmin, self.qmax);
            QParams { scale, zero_point }
        }
    }

    /// Quantize one value to the integer grid
    pub fn quantize(&self, value: f32, qp: QParams) -> i32 {
        ((value / qp.scale).round() as i32 + qp.zero_point).clamp(self.qmin, self.qmax)
    }
}

/// Quantize → dequantize a tensor with fixed parameters.
/// On an autodiff backend the gradient passes straight through.
pub fn fake_quantize<B: Backend, const D: usize>(
    x:     Tensor<B, D>,
    qp:    QParams,
    range: QuantRange,
) -> Tensor<B, D> {
    let zero_point = qp.zero_point as f32;
    let dequantized = x
        .clone()
        .div_scalar(qp.scale)
        .round()
        .add_scalar(zero_point)
        .clamp(range.qmin as f32, range.qmax as f32)
        .sub_scalar(zero_point)
        .mul_scalar(qp.scale);

    if B::ad_enabled() {
        x.clone() + (dequantized - x).detach()
    } else {
        dequantized
    }
}

// ─── FakeQuantize ─────────────────────────────────────────────────────────────
/// Observer + fake-quant node. `range` holds [min, max]; it starts at
/// [+inf, -inf] meaning "nothing observed yet", in which case the node is
/// a pass-through.
#[derive(Module, Debug)]
pub struct FakeQuantize<B: Backend> {
    pub range:     RunningState<Tensor<B, 1>>,
    pub qmin:      i32,
    pub qmax:      i32,
    pub symmetric: bool,
    /// Observers only update while this is set and gradients are tracked
    pub observe:   bool,
}

impl<B: Backend> FakeQuantize<B> {
    pub fn new(range: QuantRange, device: &B::Device) -> Self {
        let initial = Tensor::from_floats([f32::INFINITY, f32::NEG_INFINITY], device);
        Self {
            range:     RunningState::new(initial),
            qmin:      range.qmin,
            qmax:      range.qmax,
            symmetric: range.symmetric,
            observe:   true,
        }
    }

    pub fn activation(device: &B::Device) -> Self {
        Self::new(ACTIVATION_RANGE, device)
    }

    pub fn weight(device: &B::Device) -> Self {
        Self::new(WEIGHT_RANGE, device)
    }

    pub fn quant_range(&self) -> QuantRange {
        QuantRange { qmin: self.qmin, qmax: self.qmax, symmetric: self.symmetric }
    }

    /// Stop updating the observed range
    pub fn frozen(mut self) -> Self {
        self.observe = false;
        self
    }

    /// Observed [min, max], or None before the first observation
    pub fn observed_range(&self) -> Option<(f32, f32)> {
        let values = self.range.value_sync().into_data().convert::<f32>().to_vec::<f32>().unwrap_or_default();
        match values.as_slice() {
            [min, max] if min.is_finite() && max.is_finite() => Some((*min, *max)),
            _ => None,
        }
    }

    /// Current quantization parameters, or None before the first observation
    pub fn qparams(&self) -> Option<QParams> {
        self.observed_range().map(|(min, max)| self.quant_range().qparams(min, max))
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        if self.observe && B::ad_enabled() {
            self.observe_batch(&x);
        }

        match self.qparams() {
            Some(qp) => fake_quantize(x, qp, self.quant_range()),
            None     => x,
        }
    }

    fn observe_batch<const D: usize>(&self, x: &Tensor<B, D>) {
        let detached  = x.clone().detach();
        let batch_min = detached.clone().min().into_scalar().elem::<f32>();
        let batch_max = detached.max().into_scalar().elem::<f32>();

        let (min, max) = match self.observed_range() {
            Some((min, max)) => (
                min + AVERAGING_CONSTANT * (batch_min - min),
                max + AVERAGING_CONSTANT * (batch_max - max),
            ),
            None => (batch_min, batch_max),
        };

        self.range.update(Tensor::from_floats([min, max], &x.device()));
    }
}

// ─── QuantizedTensor ──────────────────────────────────────────────────────────
/// Genuinely 8-bit storage: one i8 per element plus the affine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedTensor {
    pub values:  Vec<i8>,
    pub shape:   Vec<usize>,
    pub qparams: QParams,
}

impl QuantizedTensor {
    /// Quantize float values with symmetric signed 8-bit parameters derived
    /// from `qparams` (or from the data's own min / max when None).
    pub fn quantize(data: &[f32], shape: Vec<usize>, qparams: Option<QParams>) -> Self {
        let qparams = qparams.unwrap_or_else(|| {
            let (min, max) = data.iter().fold((0.0f32, 0.0f32), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            WEIGHT_RANGE.qparams(min, max)
        });

        let values = data
            .iter()
            .map(|&v| WEIGHT_RANGE.quantize(v, qparams) as i8)
            .collect();

        Self { values, shape, qparams }
    }

    pub fn dequantize(&self) -> Vec<f32> {
        self.values
            .iter()
            .map(|&q| (q as i32 - self.qparams.zero_point) as f32 * self.qparams.scale)
            .collect()
    }

    /// Bytes of the integer payload
    pub fn nbytes(&self) -> usize {
        self.values.len()
    }
}
