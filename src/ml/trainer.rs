// ============================================================
// Layer 5 — Training Loop
// ============================================================
// One loop serves both tutorial stages. Per epoch:
//
//   train phase   forward → cross entropy → backward → SGD step
//   scheduler     steps once per epoch, before the train phase
//   val phase     model.valid() (no autodiff, dropout off)
//   snapshot      strictly better val accuracy → keep a record
//
// Running loss is accumulated as loss × batch size and divided
// by the number of samples in the phase, so a short last batch
// is weighted correctly.
//
// Burn insights:
//   - Training uses an Autodiff<_> backend for gradients
//   - model.valid() returns the module on the inner backend,
//     so the validation loader batches on the inner backend too
//   - argmax(1) returns [batch, 1]; squeeze before .equal()
//   - the best snapshot is a Record, not a clone of the module:
//     observer states are shared between module clones
//
// Reference: Burn Book §5, Robbins & Monro (1951) SGD

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use burn::{
    data::dataloader::DataLoader,
    lr_scheduler::LrScheduler,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig,
    },
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use crate::data::batcher::ImageBatch;
use crate::domain::phase::Phase;
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::model::ImageClassifier;

/// The two loaders of one training run. Validation batches live on the
/// inner (non-autodiff) backend.
pub struct PhaseLoaders<B: AutodiffBackend> {
    pub train: Arc<dyn DataLoader<ImageBatch<B>>>,
    pub val:   Arc<dyn DataLoader<ImageBatch<B::InnerBackend>>>,
}

impl<B: AutodiffBackend> Clone for PhaseLoaders<B> {
    fn clone(&self) -> Self {
        Self { train: self.train.clone(), val: self.val.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct TrainSettings {
    /// Stage name used in logs and metrics rows
    pub stage:  String,
    pub epochs: usize,
}

/// SGD with momentum 0.9 (no dampening) and optional L2 weight decay.
pub fn sgd_optimizer<B, M>(weight_decay: Option<f32>) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let momentum = MomentumConfig::new()
        .with_momentum(0.9)
        .with_dampening(0.0)
        .with_nesterov(false);

    SgdConfig::new()
        .with_momentum(Some(momentum))
        .with_weight_decay(weight_decay.map(WeightDecayConfig::new))
        .init::<B, M>()
}

/// Mean loss and accuracy of one phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseStats {
    pub loss:     f64,
    pub accuracy: f64,
    pub samples:  usize,
}

#[derive(Debug, Default)]
struct RunningStats {
    loss_sum: f64,
    corrects: usize,
    samples:  usize,
}

impl RunningStats {
    fn update<B: Backend>(&mut self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>, mean_loss: f64) {
        let batch_size = targets.dims()[0];
        self.loss_sum += mean_loss * batch_size as f64;
        self.corrects += correct_predictions(logits, targets);
        self.samples  += batch_size;
    }

    fn finish(self) -> PhaseStats {
        if self.samples == 0 {
            return PhaseStats { loss: 0.0, accuracy: 0.0, samples: 0 };
        }
        PhaseStats {
            loss:     self.loss_sum / self.samples as f64,
            accuracy: self.corrects as f64 / self.samples as f64,
            samples:  self.samples,
        }
    }
}

/// Number of rows whose argmax matches the target
pub fn correct_predictions<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = logits.argmax(1).squeeze::<1>(1);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem::<i64>();
    correct.max(0) as usize
}

fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, targets)
}

/// One gradient-free pass over a loader.
pub fn evaluate<B: Backend, M: ImageClassifier<B>>(
    model:  &M,
    loader: &dyn DataLoader<ImageBatch<B>>,
) -> PhaseStats {
    let mut running = RunningStats::default();
    for batch in loader.iter() {
        let logits = model.logits(batch.images);
        let loss   = cross_entropy(logits.clone(), batch.targets.clone());
        running.update(logits, batch.targets, loss.into_scalar().elem::<f64>());
    }
    running.finish()
}

/// Outcome of a `train_model` run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub best_acc: f64,
    /// Train and val rows of every epoch, in order
    pub history:  Vec<EpochMetrics>,
    pub elapsed:  Duration,
}

/// Train for `settings.epochs` epochs and return the model restored to its
/// best validation accuracy.
pub fn train_model<B, M, O, S>(
    mut model: M,
    optim:     &mut O,
    scheduler: &mut S,
    loaders:   &PhaseLoaders<B>,
    settings:  &TrainSettings,
    metrics:   Option<&MetricsLogger>,
) -> Result<(M, TrainingReport)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    O: Optimizer<M, B>,
    S: LrScheduler,
{
    let since = Instant::now();

    let mut best_record = model.clone().into_record();
    let mut best_acc    = 0.0f64;
    let mut history     = Vec::with_capacity(settings.epochs * 2);

    tracing::info!("[{}] training for {} epochs", settings.stage, settings.epochs);

    for epoch in 0..settings.epochs {
        println!("Epoch {}/{}", epoch, settings.epochs.saturating_sub(1));
        println!("{}", "-".repeat(10));

        let lr = scheduler.step();
        tracing::debug!("[{}] lr {} for epoch {}", settings.stage, lr, epoch);

        // ── Training phase ────────────────────────────────────────────────────
        let mut running = RunningStats::default();
        for batch in loaders.train.iter() {
            let logits = model.logits(batch.images);
            let loss   = cross_entropy(logits.clone(), batch.targets.clone());

            let loss_value = loss.clone().into_scalar().elem::<f64>();
            running.update(logits.detach(), batch.targets, loss_value);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);
        }
        let train = running.finish();

        // ── Validation phase ──────────────────────────────────────────────────
        let val = evaluate(&model.valid(), loaders.val.as_ref());

        for (phase, stats) in Phase::ALL.into_iter().zip([train, val]) {
            println!("{} Loss: {:.4} Acc: {:.4}", phase, stats.loss, stats.accuracy);

            let row = EpochMetrics {
                stage:         settings.stage.clone(),
                epoch,
                phase,
                loss:          stats.loss,
                accuracy:      stats.accuracy,
                learning_rate: lr,
            };
            if let Some(logger) = metrics {
                logger.log(&row)?;
            }

            // ── Best snapshot ─────────────────────────────────────────────────
            if row.is_improvement(best_acc) {
                best_acc    = row.accuracy;
                best_record = model.clone().into_record();
                tracing::debug!("[{}] new best val acc {:.4} at epoch {}", settings.stage, best_acc, epoch);
            }
            history.push(row);
        }
        println!();
    }

    let elapsed = since.elapsed();
    let secs    = elapsed.as_secs();
    println!("Training complete in {}m {}s", secs / 60, secs % 60);
    println!("Best val Acc: {:.4}", best_acc);

    let model = model.load_record(best_record);
    Ok((model, TrainingReport { best_acc, history, elapsed }))
}
