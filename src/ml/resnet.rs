// ============================================================
// Layer 5 — ResNet-18 Feature Extractor
// ============================================================
// The backbone reused for transfer learning. Everything up to
// (and including) global average pooling; the ImageNet
// classifier is replaced by a new head in model.rs.
//
//   input [N, 3, 224, 224]
//     stem      conv 7×7 /2, 64  + BN + ReLU     → [N,  64, 112, 112]
//     maxpool   3×3 /2                          → [N,  64,  56,  56]
//     layer1    2 × BasicBlock(64)              → [N,  64,  56,  56]
//     layer2    2 × BasicBlock(128), first /2   → [N, 128,  28,  28]
//     layer3    2 × BasicBlock(256), first /2   → [N, 256,  14,  14]
//     layer4    2 × BasicBlock(512), first /2   → [N, 512,   7,   7]
//     avgpool   adaptive 1×1                    → [N, 512,   1,   1]
//
// Convolutions are stored as raw weight / bias params and run
// through the functional conv2d so that a fake-quant node can
// sit between the parameter and the op during QAT.
//
// Batch norms are folded into the convolutions once, from their
// running statistics, before observers are attached. QAT then
// trains the folded weight and bias; batch statistics are not
// re-estimated during fine-tuning, unlike a fused Conv-BN unit
// that keeps its batch norm live in training mode.
//
// Reference: He et al. (2016) Deep Residual Learning

use burn::{
    module::Param,
    nn::{BatchNorm, BatchNormConfig},
    prelude::*,
    tensor::{
        activation::relu,
        module::{adaptive_avg_pool2d, conv2d, max_pool2d},
        ops::ConvOptions,
        Distribution,
    },
};

use crate::ml::quant::{fake_quantize, FakeQuantize, WEIGHT_RANGE};

/// Width of the pooled feature vector (`fc.in_features` of ResNet-18)
pub const NUM_FEATURES: usize = 512;

/// Output channels of the four stages
const STAGE_CHANNELS: [usize; 4] = [64, 128, 256, 512];

// ─── ConvBn ───────────────────────────────────────────────────────────────────
/// conv → batch norm → optional ReLU.
///
/// After `fuse` the batch norm is folded into weight / bias and `bn` is None.
/// During QAT `weight_fq` fake-quantizes the weight and `output_fq` the output.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub weight:     Param<Tensor<B, 4>>,
    pub bias:       Option<Param<Tensor<B, 1>>>,
    pub bn:         Option<BatchNorm<B, 2>>,
    pub weight_fq:  Option<FakeQuantize<B>>,
    pub output_fq:  Option<FakeQuantize<B>>,
    pub stride:     usize,
    pub padding:    usize,
    pub fused_relu: bool,
}

impl<B: Backend> ConvBn<B> {
    pub fn new(
        channels:    [usize; 2],
        kernel_size: usize,
        stride:      usize,
        padding:     usize,
        fused_relu:  bool,
        device:      &B::Device,
    ) -> Self {
        let [in_channels, out_channels] = channels;

        // Kaiming normal, fan-out mode (the torchvision ResNet initialisation)
        let fan_out = out_channels * kernel_size * kernel_size;
        let std     = (2.0 / fan_out as f64).sqrt();
        let weight  = Tensor::random(
            [out_channels, in_channels, kernel_size, kernel_size],
            Distribution::Normal(0.0, std),
            device,
        );

        Self {
            weight:     Param::from_tensor(weight),
            bias:       None,
            bn:         Some(BatchNormConfig::new(out_channels).init(device)),
            weight_fq:  None,
            output_fq:  None,
            stride,
            padding,
            fused_relu,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let weight = match &self.weight_fq {
            Some(fq) => fq.forward(self.weight.val()),
            None     => self.weight.val(),
        };
        let bias    = self.bias.as_ref().map(|b| b.val());
        let options = ConvOptions::new([self.stride; 2], [self.padding; 2], [1, 1], 1);

        let mut x = conv2d(x, weight, bias, options);
        if let Some(bn) = &self.bn {
            x = bn.forward(x);
        }
        if self.fused_relu {
            x = relu(x);
        }

        match &self.output_fq {
            Some(fq) => fq.forward(x),
            None     => x,
        }
    }

    /// Fold the batch norm into the convolution:
    ///
    ///   s  = γ / √(σ² + ε)
    ///   W' = W · s          (per output channel)
    ///   b' = (b − μ) · s + β
    ///
    /// Uses the running statistics, so it matches the eval-mode output.
    pub fn fuse(mut self) -> Self {
        let Some(bn) = self.bn.take() else {
            return self;
        };

        let weight = self.weight.val();
        let [out_channels, ..] = weight.dims();
        let device = weight.device();

        let std   = bn.running_var.value_sync().add_scalar(bn.epsilon).sqrt();
        let scale = bn.gamma.val().div(std);

        let weight = weight * scale.clone().reshape([out_channels, 1, 1, 1]);
        let bias   = match self.bias.take() {
            Some(b) => b.val(),
            None    => Tensor::zeros([out_channels], &device),
        };
        let bias = (bias - bn.running_mean.value_sync()) * scale + bn.beta.val();

        self.weight = Param::from_tensor(weight.detach());
        self.bias   = Some(Param::from_tensor(bias.detach()));
        self
    }

    /// Attach weight and output observers
    pub fn prepare_qat(mut self, device: &B::Device) -> Self {
        self.weight_fq = Some(FakeQuantize::weight(device));
        self.output_fq = Some(FakeQuantize::activation(device));
        self
    }

    /// Stop all observers of this unit
    pub fn freeze_observers(mut self) -> Self {
        self.weight_fq = self.weight_fq.map(FakeQuantize::frozen);
        self.output_fq = self.output_fq.map(FakeQuantize::frozen);
        self
    }

    /// Replace the float weight by its 8-bit representable value so the
    /// stored parameter equals what a quantized kernel would compute with.
    pub fn snap_weight(mut self) -> Self {
        if let Some(qp) = self.weight_fq.as_ref().and_then(FakeQuantize::qparams) {
            let snapped = fake_quantize(self.weight.val(), qp, WEIGHT_RANGE);
            self.weight = Param::from_tensor(snapped.detach());
        }
        self
    }
}

// ─── BasicBlock ───────────────────────────────────────────────────────────────
/// Two 3×3 convolutions with an identity (or 1×1 projection) shortcut.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub conv1:      ConvBn<B>,
    pub conv2:      ConvBn<B>,
    pub downsample: Option<ConvBn<B>>,
    /// Observes the output of the residual add + ReLU
    pub output_fq:  Option<FakeQuantize<B>>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| ConvBn::new([in_channels, out_channels], 1, stride, 0, false, device));

        Self {
            conv1:     ConvBn::new([in_channels, out_channels], 3, stride, 1, true, device),
            conv2:     ConvBn::new([out_channels, out_channels], 3, 1, 1, false, device),
            downsample,
            output_fq: None,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward(x.clone()),
            None       => x.clone(),
        };

        let out = self.conv2.forward(self.conv1.forward(x));
        let out = relu(out + identity);

        match &self.output_fq {
            Some(fq) => fq.forward(out),
            None     => out,
        }
    }

    fn map_units(self, f: &impl Fn(ConvBn<B>) -> ConvBn<B>) -> Self {
        Self {
            conv1:      f(self.conv1),
            conv2:      f(self.conv2),
            downsample: self.downsample.map(f),
            output_fq:  self.output_fq,
        }
    }
}

// ─── ResNetFeatures ───────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ResNetFeatures<B: Backend> {
    /// Quant stub: observes the normalised input image
    pub quant:  Option<FakeQuantize<B>>,
    pub stem:   ConvBn<B>,
    pub layer1: Vec<BasicBlock<B>>,
    pub layer2: Vec<BasicBlock<B>>,
    pub layer3: Vec<BasicBlock<B>>,
    pub layer4: Vec<BasicBlock<B>>,
}

impl<B: Backend> ResNetFeatures<B> {
    /// A randomly initialised ResNet-18 trunk
    pub fn new(device: &B::Device) -> Self {
        let stage = |index: usize| -> Vec<BasicBlock<B>> {
            let out_channels = STAGE_CHANNELS[index];
            let in_channels  = if index == 0 { 64 } else { STAGE_CHANNELS[index - 1] };
            let stride       = if index == 0 { 1 } else { 2 };
            vec![
                BasicBlock::new(in_channels, out_channels, stride, device),
                BasicBlock::new(out_channels, out_channels, 1, device),
            ]
        };

        Self {
            quant:  None,
            stem:   ConvBn::new([3, 64], 7, 2, 3, true, device),
            layer1: stage(0),
            layer2: stage(1),
            layer3: stage(2),
            layer4: stage(3),
        }
    }

    /// images [N, 3, H, W] → pooled features [N, 512, 1, 1]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.quant {
            Some(fq) => fq.forward(images),
            None     => images,
        };

        let x = self.stem.forward(x);
        let mut x = max_pool2d(x, [3, 3], [2, 2], [1, 1], [1, 1]);

        for block in self.blocks() {
            x = block.forward(x);
        }

        adaptive_avg_pool2d(x, [1, 1])
    }

    /// All residual blocks in execution order
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock<B>> {
        self.layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
    }

    /// Fold every batch norm into its convolution
    pub fn fuse(self) -> Self {
        self.map_units(&ConvBn::<B>::fuse)
    }

    /// Attach fake-quant observers: the input stub, every convolution's
    /// weight and output, and every block's residual output.
    pub fn prepare_qat(self, device: &B::Device) -> Self {
        let mut this = self.map_units(&|unit: ConvBn<B>| unit.prepare_qat(device));
        this.quant = Some(FakeQuantize::activation(device));
        this.map_blocks(|mut block| {
            block.output_fq = Some(FakeQuantize::activation(device));
            block
        })
    }

    /// Stop every observer in the trunk
    pub fn freeze_observers(self) -> Self {
        let mut this = self.map_units(&ConvBn::<B>::freeze_observers);
        this.quant = this.quant.map(FakeQuantize::frozen);
        this.map_blocks(|mut block| {
            block.output_fq = block.output_fq.map(FakeQuantize::frozen);
            block
        })
    }

    /// Snap every observed weight onto its 8-bit grid
    pub fn snap_weights(self) -> Self {
        self.map_units(&ConvBn::<B>::snap_weight)
    }

    fn map_units(self, f: &impl Fn(ConvBn<B>) -> ConvBn<B>) -> Self {
        let stem = f(self.stem);
        let this = Self { stem, ..self };
        this.map_blocks(|block| block.map_units(f))
    }

    fn map_blocks(self, mut f: impl FnMut(BasicBlock<B>) -> BasicBlock<B>) -> Self {
        let mut stage = |blocks: Vec<BasicBlock<B>>| blocks.into_iter().map(&mut f).collect::<Vec<_>>();
        Self {
            quant:  self.quant,
            stem:   self.stem,
            layer1: stage(self.layer1),
            layer2: stage(self.layer2),
            layer3: stage(self.layer3),
            layer4: stage(self.layer4),
        }
    }
}
