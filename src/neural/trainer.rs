// projeto: lstmcotacao
// file: src/neural/trainer.rs
// Mini-batch training loop: shuffle, BPTT, clipping, Adam

use std::time::Instant;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::neural::data::SequenceDataset;
use crate::neural::model::SequenceModel;
use crate::neural::utils::{clip_gradient_norm, validate_finite, AdamOptimizer, Result, TrainingError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Global L2 norm limit for the gradient; `None` disables clipping.
    pub clip_norm: Option<f64>,
    /// Seed for weight init, shuffling and dropout; random when absent.
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 50,
            batch_size: 64,
            learning_rate: 0.001,
            clip_norm: Some(1.0),
            seed: None,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(TrainingError::ModelConfiguration(
                "epochs must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::ModelConfiguration(
                "batch_size must be positive".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingError::ModelConfiguration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if let Some(clip) = self.clip_norm {
            if !(clip.is_finite() && clip > 0.0) {
                return Err(TrainingError::ModelConfiguration(format!(
                    "clip_norm must be positive, got {}",
                    clip
                )));
            }
        }
        Ok(())
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub loss: f64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochReport>,
}

impl TrainingHistory {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn first_loss(&self) -> Option<f64> {
        self.epochs.first().map(|e| e.loss)
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.loss)
    }
}

pub struct Trainer {
    config: TrainConfig,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Result<Self> {
        config.validate()?;
        let rng = config.rng();
        Ok(Trainer { config, rng })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Runs the configured number of epochs. The model is left in eval mode,
    /// also when training aborts.
    pub fn fit<M: SequenceModel>(
        &mut self,
        model: &mut M,
        dataset: &SequenceDataset,
    ) -> Result<TrainingHistory> {
        if dataset.is_empty() {
            return Err(TrainingError::InsufficientData {
                required: 0,
                actual: 0,
            });
        }
        let mut optimizer = AdamOptimizer::with_learning_rate(self.config.learning_rate);
        let mut history = TrainingHistory::default();
        let batches_per_epoch = dataset.len().div_ceil(self.config.batch_size);

        info!(
            "🚀 Iniciando treinamento: {} épocas, {} exemplos, {} lotes/época, lr={}",
            self.config.epochs,
            dataset.len(),
            batches_per_epoch,
            self.config.learning_rate
        );

        model.train();
        let result = self.run_epochs(model, dataset, &mut optimizer, &mut history);
        model.eval();
        result?;

        if let (Some(first), Some(last)) = (history.first_loss(), history.final_loss()) {
            info!(
                "✅ Treinamento concluído: loss {:.6} → {:.6} em {} épocas",
                first,
                last,
                history.len()
            );
        }
        Ok(history)
    }

    fn run_epochs<M: SequenceModel>(
        &mut self,
        model: &mut M,
        dataset: &SequenceDataset,
        optimizer: &mut AdamOptimizer,
        history: &mut TrainingHistory,
    ) -> Result<()> {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();

        for epoch in 1..=self.config.epochs {
            let start = Instant::now();
            indices.shuffle(&mut self.rng);

            let mut loss_sum = 0.0;
            let mut batches = 0usize;
            for chunk in indices.chunks(self.config.batch_size) {
                let (x, y) = dataset.batch(chunk)?;
                let (loss, mut grads) =
                    model.loss_and_gradients(&x.view(), &y.view(), &mut self.rng)?;
                if !loss.is_finite() {
                    return Err(TrainingError::NumericInstability { epoch, loss });
                }

                let unstable = |e: TrainingError| {
                    warn!("⚠️ Instabilidade numérica na época {}: {}", epoch, e);
                    TrainingError::NumericInstability { epoch, loss }
                };
                validate_finite(grads.iter(), "gradient").map_err(unstable)?;

                if let Some(max_norm) = self.config.clip_norm {
                    let norm = clip_gradient_norm(&mut grads, max_norm);
                    if norm > max_norm * 10.0 {
                        debug!("✂️ Gradiente grande na época {}: norma {:.4}", epoch, norm);
                    }
                }

                let mut params = model.parameters();
                optimizer.update(&mut params, &grads)?;
                // the model keeps its last finite weights
                validate_finite(params.iter(), "parameters").map_err(unstable)?;
                model.set_parameters(&params)?;

                loss_sum += loss;
                batches += 1;
            }

            let loss = loss_sum / batches.max(1) as f64;
            if !loss.is_finite() {
                return Err(TrainingError::NumericInstability { epoch, loss });
            }
            let elapsed_secs = start.elapsed().as_secs_f64();
            history.epochs.push(EpochReport {
                epoch,
                loss,
                elapsed_secs,
            });

            if epoch <= 10 || epoch % 5 == 0 || epoch == self.config.epochs {
                info!(
                    "📊 Época {}/{} - loss: {:.6} ({:.2}s)",
                    epoch, self.config.epochs, loss, elapsed_secs
                );
            } else {
                debug!("Época {} - loss: {:.6}", epoch, loss);
            }
        }

        if let (Some(first), Some(last)) = (history.first_loss(), history.final_loss()) {
            if last > first {
                warn!(
                    "⚠️ Loss final ({:.6}) maior que a inicial ({:.6})",
                    last, first
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::{window, SequenceDataset};
    use crate::neural::model::{LstmRegressor, ModelConfig, ModelWeights};
    use crate::neural::scaler::ScalerPair;
    use ndarray::{Array1, Array2, ArrayView2, ArrayView3};
    use rand::Rng;
    use std::cell::Cell;

    fn monotonic_dataset() -> SequenceDataset {
        let series: Vec<f64> = (1..=60).map(|v| v as f64).collect();
        let examples = window(&series, 5).unwrap();
        let scalers = ScalerPair::fit(&examples).unwrap();
        SequenceDataset::new(scalers.transform_examples(&examples).unwrap())
    }

    fn seeded(epochs: usize) -> TrainConfig {
        TrainConfig {
            epochs,
            batch_size: 16,
            learning_rate: 0.01,
            clip_norm: Some(1.0),
            seed: Some(42),
        }
    }

    #[test]
    fn test_loss_decreases_on_monotonic_series() {
        let dataset = monotonic_dataset();
        let config = seeded(30);
        let mut rng = config.rng();
        let mut model = LstmRegressor::new(ModelConfig::new(8, 1, 0.0), &mut rng).unwrap();
        let mut trainer = Trainer::new(config).unwrap();

        let history = trainer.fit(&mut model, &dataset).unwrap();
        assert_eq!(history.len(), 30);
        assert!(history.epochs.iter().all(|e| e.loss.is_finite()));
        assert!(history.final_loss().unwrap() < history.first_loss().unwrap());
        assert!(!model.is_training());
    }

    #[test]
    fn test_seeded_training_is_reproducible() {
        let dataset = monotonic_dataset();
        let run = || {
            let config = seeded(3);
            let mut rng = config.rng();
            let mut model = LstmRegressor::new(ModelConfig::new(4, 2, 0.2), &mut rng).unwrap();
            let mut trainer = Trainer::new(config).unwrap();
            let history = trainer.fit(&mut model, &dataset).unwrap();
            let losses: Vec<f64> = history.epochs.iter().map(|e| e.loss).collect();
            (losses, model.parameters())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_batch_larger_than_dataset() {
        let dataset = monotonic_dataset();
        let mut config = seeded(2);
        config.batch_size = 1000;
        let mut rng = config.rng();
        let mut model = LstmRegressor::new(ModelConfig::new(3, 1, 0.0), &mut rng).unwrap();
        let history = Trainer::new(config).unwrap().fit(&mut model, &dataset).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_non_finite_loss_aborts() {
        let series: Vec<f64> = (0..20).map(|v| v as f64).collect();
        let mut examples = window(&series, 3).unwrap();
        examples.y[[4, 0]] = f64::INFINITY;
        let dataset = SequenceDataset::new(examples);

        let config = seeded(2);
        let mut rng = config.rng();
        let mut model = LstmRegressor::new(ModelConfig::new(3, 1, 0.0), &mut rng).unwrap();
        let err = Trainer::new(config).unwrap().fit(&mut model, &dataset).unwrap_err();
        assert!(matches!(err, TrainingError::NumericInstability { epoch: 1, .. }));
        assert!(!model.is_training());
    }

    /// Finite loss, one NaN gradient entry from batch call `nan_from` on.
    struct NanGradientFrom {
        inner: LstmRegressor,
        nan_from: usize,
        calls: Cell<usize>,
    }

    impl SequenceModel for NanGradientFrom {
        const ARCHITECTURE: &'static str = "lstm";

        fn from_config(config: ModelConfig) -> Result<Self> {
            Ok(NanGradientFrom {
                inner: LstmRegressor::from_config(config)?,
                nan_from: 0,
                calls: Cell::new(0),
            })
        }
        fn config(&self) -> &ModelConfig {
            self.inner.config()
        }
        fn weights(&self) -> &ModelWeights {
            self.inner.weights()
        }
        fn load_weights(&mut self, weights: ModelWeights) -> Result<()> {
            self.inner.load_weights(weights)
        }
        fn set_parameters(&mut self, flat: &Array1<f64>) -> Result<()> {
            self.inner.set_parameters(flat)
        }
        fn train(&mut self) {
            self.inner.train()
        }
        fn eval(&mut self) {
            self.inner.eval()
        }
        fn is_training(&self) -> bool {
            self.inner.is_training()
        }
        fn forward(&self, x: &ArrayView3<f64>) -> Result<Array2<f64>> {
            self.inner.forward(x)
        }
        fn loss_and_gradients<R: Rng>(
            &self,
            x: &ArrayView3<f64>,
            y: &ArrayView2<f64>,
            rng: &mut R,
        ) -> Result<(f64, Array1<f64>)> {
            let (loss, mut grads) = self.inner.loss_and_gradients(x, y, rng)?;
            let call = self.calls.get();
            self.calls.set(call + 1);
            if call >= self.nan_from {
                grads[0] = f64::NAN;
            }
            Ok((loss, grads))
        }
    }

    #[test]
    fn test_non_finite_gradient_aborts_with_finite_weights() {
        let dataset = monotonic_dataset();
        for clip_norm in [Some(1.0), None] {
            let mut config = seeded(3);
            config.clip_norm = clip_norm;
            // one batch per epoch
            config.batch_size = dataset.len();
            let mut rng = config.rng();
            let mut model = NanGradientFrom {
                inner: LstmRegressor::new(ModelConfig::new(3, 1, 0.0), &mut rng).unwrap(),
                nan_from: 2,
                calls: Cell::new(0),
            };

            let err = Trainer::new(config).unwrap().fit(&mut model, &dataset).unwrap_err();
            match err {
                TrainingError::NumericInstability { epoch, loss } => {
                    assert_eq!(epoch, 3);
                    assert!(loss.is_finite());
                }
                other => panic!("unexpected error {:?}", other),
            }
            assert!(model.parameters().iter().all(|p| p.is_finite()));
            assert!(!model.is_training());
        }
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let series: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let empty = SequenceDataset::new(window(&series, 3).unwrap().rows(0, 0));
        let config = seeded(1);
        let mut rng = config.rng();
        let mut model = LstmRegressor::new(ModelConfig::new(3, 1, 0.0), &mut rng).unwrap();
        assert!(Trainer::new(config).unwrap().fit(&mut model, &empty).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        let mut bad = TrainConfig::default();
        bad.batch_size = 0;
        assert!(Trainer::new(bad).is_err());
        let mut bad = TrainConfig::default();
        bad.learning_rate = 0.0;
        assert!(bad.validate().is_err());
        let mut bad = TrainConfig::default();
        bad.clip_norm = Some(-1.0);
        assert!(bad.validate().is_err());
    }
}
