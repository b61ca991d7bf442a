// projeto: lstmcotacao
// file: src/neural/metrics.rs
// Regression error metrics on de-scaled predictions

use log::info;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::neural::utils::{Result, TrainingError};

fn check_pair(actual: &Array2<f64>, predicted: &Array2<f64>) -> Result<usize> {
    if actual.shape() != predicted.shape() {
        return Err(TrainingError::shape_mismatch(
            format!("{:?}", actual.shape()),
            format!("{:?}", predicted.shape()),
        ));
    }
    if actual.is_empty() {
        return Err(TrainingError::InsufficientData {
            required: 0,
            actual: 0,
        });
    }
    Ok(actual.len())
}

/// `sqrt(mean((actual - predicted)^2))`
pub fn root_mean_squared_error(actual: &Array2<f64>, predicted: &Array2<f64>) -> Result<f64> {
    let n = check_pair(actual, predicted)? as f64;
    let mse = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / n;
    Ok(mse.sqrt())
}

/// `mean(|actual - predicted|)`
pub fn mean_absolute_error(actual: &Array2<f64>, predicted: &Array2<f64>) -> Result<f64> {
    let n = check_pair(actual, predicted)? as f64;
    Ok(actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n)
}

/// Percentage over the rows with a non-zero actual value; 0 when there are none.
pub fn mean_absolute_percentage_error(actual: &Array2<f64>, predicted: &Array2<f64>) -> Result<f64> {
    check_pair(actual, predicted)?;
    let (sum, count) = actual
        .iter()
        .zip(predicted.iter())
        .filter(|(a, _)| **a != 0.0)
        .fold((0.0, 0usize), |(sum, count), (a, p)| {
            (sum + ((a - p) / a).abs(), count + 1)
        });
    if count == 0 {
        return Ok(0.0);
    }
    Ok(sum / count as f64 * 100.0)
}

/// Share of consecutive steps where predicted and actual move the same way.
pub fn directional_accuracy(actual: &Array2<f64>, predicted: &Array2<f64>) -> Result<f64> {
    let n = check_pair(actual, predicted)?;
    if n < 2 {
        return Ok(0.0);
    }
    let a: Vec<f64> = actual.iter().copied().collect();
    let p: Vec<f64> = predicted.iter().copied().collect();
    let correct = a
        .windows(2)
        .zip(p.windows(2))
        .filter(|(wa, wp)| (wa[1] - wa[0]).signum() == (wp[1] - wp[0]).signum())
        .count();
    Ok(correct as f64 / (n - 1) as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub directional_accuracy: f64,
    pub n_samples: usize,
}

impl EvaluationMetrics {
    pub fn compute(actual: &Array2<f64>, predicted: &Array2<f64>) -> Result<Self> {
        Ok(EvaluationMetrics {
            rmse: root_mean_squared_error(actual, predicted)?,
            mae: mean_absolute_error(actual, predicted)?,
            mape: mean_absolute_percentage_error(actual, predicted)?,
            directional_accuracy: directional_accuracy(actual, predicted)?,
            n_samples: actual.len(),
        })
    }

    pub fn log_summary(&self, prefix: &str) {
        info!("📈 {} ({} amostras)", prefix, self.n_samples);
        info!("   ├── RMSE: {:.6}", self.rmse);
        info!("   ├── MAE: {:.6}", self.mae);
        info!("   ├── MAPE: {:.2}%", self.mape);
        info!("   └── Direction Acc: {:.2}%", self.directional_accuracy * 100.0);
    }
}
