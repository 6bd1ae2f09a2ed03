// ============================================================
// Layer 5 — Conversion to a Quantized Inference Model
// ============================================================
// After quantization-aware training every convolution has an
// observed weight range and every activation node an observed
// output range. Conversion freezes those into:
//
//   - int8 weights (QuantizedTensor: i8 values + scale)
//   - fixed activation quantization parameters
//
// The head was never prepared for QAT and stays in float,
// exactly as it was trained.
//
// The converted model is inference-only: it is a plain struct,
// not a Burn Module, so it has no optimizer state, no records
// and no gradients. The int8 weights are dequantized once at
// conversion time for the float convolution kernel.

use anyhow::{anyhow, Result};
use burn::{
    prelude::*,
    tensor::{
        activation::relu,
        module::{adaptive_avg_pool2d, conv2d, max_pool2d},
        ops::ConvOptions,
    },
};

use crate::ml::{
    model::{Head, ImageClassifier, TransferModel},
    quant::{fake_quantize, FakeQuantize, QParams, QuantRange, QuantizedTensor},
    resnet::{BasicBlock, ConvBn},
};

/// Frozen activation quantization.
#[derive(Debug, Clone, Copy)]
pub struct ActivationQuant {
    pub qparams: QParams,
    pub range:   QuantRange,
}

impl ActivationQuant {
    fn from_observer<B: Backend>(fq: Option<&FakeQuantize<B>>) -> Option<Self> {
        let fq = fq?;
        fq.qparams().map(|qparams| Self { qparams, range: fq.quant_range() })
    }

    fn apply<B: Backend, const D: usize>(quant: Option<&Self>, x: Tensor<B, D>) -> Tensor<B, D> {
        match quant {
            Some(q) => fake_quantize(x, q.qparams, q.range),
            None    => x,
        }
    }
}

// ─── QuantizedConv ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct QuantizedConv<B: Backend> {
    pub weight:     QuantizedTensor,
    dequantized:    Tensor<B, 4>,
    pub bias:       Option<Tensor<B, 1>>,
    pub stride:     usize,
    pub padding:    usize,
    pub fused_relu: bool,
    pub output:     Option<ActivationQuant>,
}

impl<B: Backend> QuantizedConv<B> {
    fn convert(unit: ConvBn<B>) -> Result<Self> {
        // Conversion needs folded batch norms
        let unit   = unit.fuse();
        let tensor = unit.weight.val();
        let shape  = tensor.dims().to_vec();
        let device = tensor.device();

        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("Cannot read convolution weight: {e:?}"))?;

        let observed = unit.weight_fq.as_ref().and_then(FakeQuantize::qparams);
        let weight   = QuantizedTensor::quantize(&values, shape.clone(), observed);

        let dequantized = Tensor::<B, 1>::from_floats(weight.dequantize().as_slice(), &device)
            .reshape([shape[0], shape[1], shape[2], shape[3]]);

        Ok(Self {
            output:      ActivationQuant::from_observer(unit.output_fq.as_ref()),
            bias:        unit.bias.map(|b| b.val()),
            weight,
            dequantized,
            stride:      unit.stride,
            padding:     unit.padding,
            fused_relu:  unit.fused_relu,
        })
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let options = ConvOptions::new([self.stride; 2], [self.padding; 2], [1, 1], 1);
        let mut x = conv2d(x, self.dequantized.clone(), self.bias.clone(), options);
        if self.fused_relu {
            x = relu(x);
        }
        ActivationQuant::apply(self.output.as_ref(), x)
    }

    fn float_bytes(&self) -> usize {
        self.weight.values.len() * std::mem::size_of::<f32>()
    }
}

// ─── QuantizedBlock ───────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct QuantizedBlock<B: Backend> {
    pub conv1:      QuantizedConv<B>,
    pub conv2:      QuantizedConv<B>,
    pub downsample: Option<QuantizedConv<B>>,
    pub output:     Option<ActivationQuant>,
}

impl<B: Backend> QuantizedBlock<B> {
    fn convert(block: BasicBlock<B>) -> Result<Self> {
        Ok(Self {
            output:     ActivationQuant::from_observer(block.output_fq.as_ref()),
            conv1:      QuantizedConv::convert(block.conv1)?,
            conv2:      QuantizedConv::convert(block.conv2)?,
            downsample: block.downsample.map(QuantizedConv::convert).transpose()?,
        })
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward(x.clone()),
            None       => x.clone(),
        };
        let out = relu(self.conv2.forward(self.conv1.forward(x)) + identity);
        ActivationQuant::apply(self.output.as_ref(), out)
    }

    fn convs(&self) -> impl Iterator<Item = &QuantizedConv<B>> {
        [&self.conv1, &self.conv2].into_iter().chain(self.downsample.as_ref())
    }
}

// ─── QuantizedClassifier ──────────────────────────────────────────────────────
/// 8-bit backbone + float head.
#[derive(Debug)]
pub struct QuantizedClassifier<B: Backend> {
    pub input:  Option<ActivationQuant>,
    pub stem:   QuantizedConv<B>,
    pub blocks: Vec<QuantizedBlock<B>>,
    pub head:   Head<B>,
}

/// Float vs. 8-bit storage of the converted convolution weights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightFootprint {
    pub float_bytes: usize,
    pub int8_bytes:  usize,
}

impl<B: Backend> QuantizedClassifier<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = ActivationQuant::apply(self.input.as_ref(), images);
        let x = self.stem.forward(x);
        let mut x = max_pool2d(x, [3, 3], [2, 2], [1, 1], [1, 1]);
        for block in &self.blocks {
            x = block.forward(x);
        }

        let pooled = adaptive_avg_pool2d(x, [1, 1]);
        let [batch_size, channels, ..] = pooled.dims();
        self.head.forward(pooled.reshape([batch_size, channels]))
    }

    pub fn footprint(&self) -> WeightFootprint {
        let convs = std::iter::once(&self.stem).chain(self.blocks.iter().flat_map(|b| b.convs()));
        convs.fold(WeightFootprint { float_bytes: 0, int8_bytes: 0 }, |acc, conv| WeightFootprint {
            float_bytes: acc.float_bytes + conv.float_bytes(),
            int8_bytes:  acc.int8_bytes + conv.weight.nbytes(),
        })
    }
}

impl<B: Backend> ImageClassifier<B> for QuantizedClassifier<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

/// Turn a (QAT-trained) float model into its 8-bit inference counterpart.
pub fn convert<B: Backend>(model: TransferModel<B>) -> Result<QuantizedClassifier<B>> {
    let TransferModel { features, head } = model;

    let input  = ActivationQuant::from_observer(features.quant.as_ref());
    let stem   = QuantizedConv::convert(features.stem)?;
    let blocks = features
        .layer1
        .into_iter()
        .chain(features.layer2)
        .chain(features.layer3)
        .chain(features.layer4)
        .map(QuantizedBlock::convert)
        .collect::<Result<Vec<_>>>()?;

    let converted = QuantizedClassifier { input, stem, blocks, head };
    let footprint = converted.footprint();
    tracing::info!(
        "Converted backbone: {} conv weight bytes as f32 → {} as int8",
        footprint.float_bytes,
        footprint.int8_bytes
    );
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::TransferModelConfig;
    use burn::{
        backend::{Autodiff, NdArray},
        module::AutodiffModule,
        tensor::Distribution,
    };

    type TestBackend  = NdArray;
    type TestAutodiff = Autodiff<NdArray>;

    #[test]
    fn test_converted_model_classifies() {
        let device = Default::default();
        let config = TransferModelConfig::new(2);
        let model  = config.init::<TestBackend>(&device);
        let model  = TransferModel {
            features: model.features.fuse().prepare_qat(&device),
            head:     model.head,
        };

        let quantized = convert(model).unwrap();
        assert_eq!(quantized.blocks.len(), 8);

        let images = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);
        let logits = quantized.logits(images);
        assert_eq!(logits.dims(), [2, 2]);

        let values: Vec<f32> = logits.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_observed_model_converts_to_matching_logits() {
        let device = Default::default();
        let model  = TransferModelConfig::new(2).init::<TestAutodiff>(&device);
        let model  = TransferModel {
            features: model.features.fuse().prepare_qat(&device),
            head:     model.head,
        };

        // One training-mode pass fills every observer
        let calibration = Tensor::<TestAutodiff, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        model.logits(calibration);
        let eval = model.valid();

        let quantized = convert(eval.clone()).unwrap();
        assert!(quantized.input.is_some());
        assert!(quantized.stem.output.is_some());
        assert!(quantized.blocks.iter().all(|b| b.output.is_some()));
        assert!(quantized.stem.weight.qparams.scale > 0.0);

        let images   = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let expected: Vec<f32> = eval.logits(images.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32>   = quantized.logits(images).into_data().to_vec().unwrap();

        for (e, a) in expected.iter().zip(&actual) {
            assert!((e - a).abs() < 1e-4, "float {e} vs converted {a}");
        }
    }

    #[test]
    fn test_footprint_is_a_quarter() {
        let device    = Default::default();
        let model     = TransferModelConfig::new(2).init::<TestBackend>(&device);
        let quantized = convert(model).unwrap();
        let footprint = quantized.footprint();

        assert!(footprint.int8_bytes > 0);
        assert_eq!(footprint.float_bytes, 4 * footprint.int8_bytes);
    }

    #[test]
    fn test_batch_norms_are_folded_during_conversion() {
        let device    = Default::default();
        let unit      = ConvBn::<TestBackend>::new([3, 8], 3, 1, 1, false, &device);
        let converted = QuantizedConv::convert(unit).unwrap();
        assert!(converted.bias.is_some());
        assert_eq!(converted.weight.shape, vec![8, 3, 3, 3]);
    }
}
