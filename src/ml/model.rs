use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::ml::resnet::{ResNetFeatures, NUM_FEATURES};

/// Anything that maps an image batch to class logits.
/// Implemented by the float model and by the converted 8-bit model so the
/// visualisation and evaluation code works with both.
pub trait ImageClassifier<B: Backend> {
    /// images [N, 3, H, W] → logits [N, num_classes]
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct TransferModelConfig {
    pub num_classes: usize,
    #[config(default = 0.5)]
    pub dropout:     f64,
}

impl TransferModelConfig {
    /// A fresh head on a randomly initialised backbone
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransferModel<B> {
        self.init_with(ResNetFeatures::new(device), device)
    }

    /// A fresh head on the given (usually pretrained) backbone
    pub fn init_with<B: Backend>(&self, features: ResNetFeatures<B>, device: &B::Device) -> TransferModel<B> {
        TransferModel { features, head: self.init_head(device) }
    }

    pub fn init_head<B: Backend>(&self, device: &B::Device) -> Head<B> {
        Head {
            dropout: DropoutConfig::new(self.dropout).init(),
            fc:      LinearConfig::new(NUM_FEATURES, self.num_classes).init(device),
        }
    }
}

/// The new classifier: Dropout(0.5) → Linear(512, num_classes).
#[derive(Module, Debug)]
pub struct Head<B: Backend> {
    pub dropout: Dropout,
    pub fc:      Linear<B>,
}

impl<B: Backend> Head<B> {
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.fc.forward(self.dropout.forward(features))
    }
}

/// Backbone → flatten → head.
#[derive(Module, Debug)]
pub struct TransferModel<B: Backend> {
    pub features: ResNetFeatures<B>,
    pub head:     Head<B>,
}

impl<B: Backend> TransferModel<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let pooled = self.features.forward(images);
        let [batch_size, channels, ..] = pooled.dims();
        self.head.forward(pooled.reshape([batch_size, channels]))
    }
}

impl<B: Backend> ImageClassifier<B> for TransferModel<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}
