// projeto: lstmcotacao
// file: src/neural/evaluator.rs
// Inference-only passes in dataset order

use log::debug;
use ndarray::{concatenate, Array2, Axis};
use rayon::prelude::*;

use crate::neural::data::SequenceDataset;
use crate::neural::model::SequenceModel;
use crate::neural::scaler::ScalerPair;
use crate::neural::utils::Result;

/// Parallel `[N, 1]` predictions and targets, row `i` belongs to example `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub predictions: Array2<f64>,
    pub actuals: Array2<f64>,
}

impl Evaluation {
    pub fn len(&self) -> usize {
        self.predictions.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Both columns back in price units through the target scaler.
    pub fn descale(&self, scalers: &ScalerPair) -> Result<Evaluation> {
        Ok(Evaluation {
            predictions: scalers.inverse_target(&self.predictions)?,
            actuals: scalers.inverse_target(&self.actuals)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    batch_size: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator { batch_size: 256 }
    }
}

impl Evaluator {
    pub fn new(batch_size: usize) -> Self {
        Evaluator {
            batch_size: batch_size.max(1),
        }
    }

    /// Batches run on the rayon pool; results are stitched back in order.
    pub fn evaluate<M: SequenceModel + Sync>(
        &self,
        model: &M,
        dataset: &SequenceDataset,
    ) -> Result<Evaluation> {
        let outputs = model.config().output_size;
        if dataset.is_empty() {
            return Ok(Evaluation {
                predictions: Array2::zeros((0, outputs)),
                actuals: Array2::zeros((0, outputs)),
            });
        }

        let indices: Vec<usize> = (0..dataset.len()).collect();
        let chunks: Vec<(Array2<f64>, Array2<f64>)> = indices
            .par_chunks(self.batch_size)
            .map(|chunk| {
                let (x, y) = dataset.batch(chunk)?;
                let prediction = model.forward(&x.view())?;
                Ok((prediction, y))
            })
            .collect::<Result<_>>()?;

        let prediction_views: Vec<_> = chunks.iter().map(|(p, _)| p.view()).collect();
        let actual_views: Vec<_> = chunks.iter().map(|(_, a)| a.view()).collect();
        let evaluation = Evaluation {
            predictions: concatenate(Axis(0), &prediction_views)?,
            actuals: concatenate(Axis(0), &actual_views)?,
        };
        debug!(
            "🔍 Avaliação concluída: {} exemplos em {} lote(s)",
            evaluation.len(),
            chunks.len()
        );
        Ok(evaluation)
    }
}
