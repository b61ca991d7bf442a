// projeto: lstmcotacao
// file: src/neural/scaler.rs
// Standardization fitted on training rows only, one scaler per role

use log::{debug, warn};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::neural::data::ExampleSet;
use crate::neural::utils::{Result, TrainingError};

const MIN_STD: f64 = 1e-12;

/// Frozen per-column normalization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
    /// Columns whose training std was zero; scaled with std = 1.
    #[serde(default)]
    pub constant_columns: Vec<usize>,
}

impl ScalerState {
    pub fn n_columns(&self) -> usize {
        self.mean.len()
    }

    fn validate(&self) -> Result<()> {
        if self.mean.len() != self.std.len() {
            return Err(TrainingError::shape_mismatch(
                format!("{} std values", self.mean.len()),
                self.std.len(),
            ));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(TrainingError::ModelConfiguration(
                "scaler mean values must be finite".to_string(),
            ));
        }
        if self.std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(TrainingError::ModelConfiguration(
                "scaler std values must be finite and positive".to_string(),
            ));
        }
        if let Some(col) = self.constant_columns.iter().find(|c| **c >= self.mean.len()) {
            return Err(TrainingError::IndexOutOfRange {
                index: *col,
                len: self.mean.len(),
            });
        }
        Ok(())
    }
}

/// Serialized form; every state read back goes through `from_state`.
#[derive(Deserialize)]
struct StoredScaler {
    state: Option<ScalerState>,
}

impl TryFrom<StoredScaler> for StandardScaler {
    type Error = TrainingError;

    fn try_from(stored: StoredScaler) -> Result<Self> {
        match stored.state {
            Some(state) => StandardScaler::from_state(state),
            None => Ok(StandardScaler::new()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredScaler")]
pub struct StandardScaler {
    state: Option<ScalerState>,
}

impl StandardScaler {
    pub fn new() -> Self {
        StandardScaler { state: None }
    }

    pub fn from_state(state: ScalerState) -> Result<Self> {
        state.validate()?;
        Ok(StandardScaler { state: Some(state) })
    }

    pub fn state(&self) -> Result<&ScalerState> {
        self.state.as_ref().ok_or(TrainingError::NotFitted)
    }

    /// Population mean/std per column. The state is frozen afterwards.
    pub fn fit(&mut self, data: &ArrayView2<f64>) -> Result<()> {
        if self.state.is_some() {
            return Err(TrainingError::ModelConfiguration(
                "scaler is already fitted; build a new one per pipeline run".to_string(),
            ));
        }
        let rows = data.nrows();
        if rows == 0 {
            return Err(TrainingError::InsufficientData {
                required: 0,
                actual: 0,
            });
        }

        let mean = data
            .mean_axis(Axis(0))
            .ok_or(TrainingError::InsufficientData {
                required: 0,
                actual: rows,
            })?;
        let mut std = data.std_axis(Axis(0), 0.0);

        let mut constant_columns = Vec::new();
        for (col, s) in std.iter_mut().enumerate() {
            if !(*s > MIN_STD) {
                *s = 1.0;
                constant_columns.push(col);
            }
        }
        if !constant_columns.is_empty() {
            warn!(
                "⚠️ Desvio padrão nulo em {} coluna(s) {:?}; usando escala identidade",
                constant_columns.len(),
                constant_columns
            );
        }
        debug!("📊 Scaler ajustado em {} linhas x {} colunas", rows, mean.len());

        self.state = Some(ScalerState {
            mean,
            std,
            constant_columns,
        });
        Ok(())
    }

    fn check_columns(state: &ScalerState, data: &ArrayView2<f64>) -> Result<()> {
        if data.ncols() != state.n_columns() {
            return Err(TrainingError::shape_mismatch(
                format!("{} columns", state.n_columns()),
                format!("{} columns", data.ncols()),
            ));
        }
        Ok(())
    }

    pub fn transform(&self, data: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self.state()?;
        Self::check_columns(state, data)?;
        Ok((data - &state.mean) / &state.std)
    }

    pub fn inverse_transform(&self, data: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self.state()?;
        Self::check_columns(state, data)?;
        Ok(data * &state.std + &state.mean)
    }
}

/// Independent scalers for input windows and for targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerPair {
    pub features: StandardScaler,
    pub target: StandardScaler,
}

impl ScalerPair {
    /// Fits both scalers on the training examples only.
    pub fn fit(train: &ExampleSet) -> Result<Self> {
        let mut features = StandardScaler::new();
        features.fit(&flatten_windows(&train.x)?.view())?;
        let mut target = StandardScaler::new();
        target.fit(&train.y.view())?;
        Ok(ScalerPair { features, target })
    }

    pub fn window_size(&self) -> Result<usize> {
        Ok(self.features.state()?.n_columns())
    }

    /// Both scalers fitted, at least one feature column, one target column.
    pub fn validate(&self) -> Result<()> {
        let features = self.features.state()?;
        if features.n_columns() == 0 {
            return Err(TrainingError::shape_mismatch(
                "at least 1 feature column",
                "0 columns",
            ));
        }
        let target = self.target.state()?;
        if target.n_columns() != 1 {
            return Err(TrainingError::shape_mismatch(
                "1 target column",
                format!("{} columns", target.n_columns()),
            ));
        }
        Ok(())
    }

    pub fn transform_examples(&self, examples: &ExampleSet) -> Result<ExampleSet> {
        let x = self.transform_windows(&examples.x)?;
        let y = self.target.transform(&examples.y.view())?;
        ExampleSet::new(x, y)
    }

    /// `[N, w, 1]` in, `[N, w, 1]` out, via the flattened `[N, w]` view.
    pub fn transform_windows(&self, x: &Array3<f64>) -> Result<Array3<f64>> {
        let (n, w, _) = x.dim();
        let scaled = self.features.transform(&flatten_windows(x)?.view())?;
        Ok(scaled.into_shape_with_order((n, w, 1))?)
    }

    /// Scales one raw window (oldest first) into a `[1, w, 1]` batch.
    pub fn transform_window(&self, window: &[f64]) -> Result<Array3<f64>> {
        let x = Array3::from_shape_vec((1, window.len(), 1), window.to_vec())?;
        self.transform_windows(&x)
    }

    /// Back to price units; expects `[N, 1]`.
    pub fn inverse_target(&self, scaled: &Array2<f64>) -> Result<Array2<f64>> {
        if scaled.ncols() != 1 {
            return Err(TrainingError::shape_mismatch(
                "[N, 1]",
                format!("{:?}", scaled.shape()),
            ));
        }
        self.target.inverse_transform(&scaled.view())
    }
}

fn flatten_windows(x: &Array3<f64>) -> Result<Array2<f64>> {
    let (n, w, features) = x.dim();
    if features != 1 {
        return Err(TrainingError::shape_mismatch(
            "[N, w, 1]",
            format!("{:?}", x.shape()),
        ));
    }
    Ok(x.to_shape((n, w))?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::{chronological_split, window};
    use ndarray::array;

    #[test]
    fn test_transform_before_fit() {
        let scaler = StandardScaler::new();
        let data = array![[1.0], [2.0]];
        assert!(matches!(
            scaler.transform(&data.view()).unwrap_err(),
            TrainingError::NotFitted
        ));
        assert!(matches!(
            scaler.inverse_transform(&data.view()).unwrap_err(),
            TrainingError::NotFitted
        ));
    }

    #[test]
    fn test_fit_statistics() {
        let mut scaler = StandardScaler::new();
        let data = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        scaler.fit(&data.view()).unwrap();
        let state = scaler.state().unwrap();
        assert!((state.mean[0] - 3.0).abs() < 1e-12);
        assert!((state.std[0] - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(state.std[1], 1.0);
        assert_eq!(state.constant_columns, vec![1]);

        let scaled = scaler.transform(&data.view()).unwrap();
        assert!(scaled.column(0).sum().abs() < 1e-12);
        assert_eq!(scaled.column(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_refit_is_rejected() {
        let mut scaler = StandardScaler::new();
        scaler.fit(&array![[1.0], [2.0]].view()).unwrap();
        assert!(scaler.fit(&array![[5.0], [9.0]].view()).is_err());
        assert!((scaler.state().unwrap().mean[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_fit_empty_fails() {
        let mut scaler = StandardScaler::new();
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            scaler.fit(&empty.view()).unwrap_err(),
            TrainingError::InsufficientData { .. }
        ));
    }

    #[test]
    fn test_target_round_trip() {
        let mut scaler = StandardScaler::new();
        scaler
            .fit(&array![[31.2], [30.8], [32.5], [33.1], [29.9]].view())
            .unwrap();
        for v in [0.0, 1e-3, 31.0, -250.0, 12345.678] {
            let scaled = scaler.transform(&array![[v]].view()).unwrap();
            let back = scaler.inverse_transform(&scaled.view()).unwrap()[[0, 0]];
            let tolerance = 1e-6 * v.abs().max(1.0);
            assert!((back - v).abs() <= tolerance, "{} != {}", back, v);
        }
    }

    #[test]
    fn test_column_mismatch() {
        let mut scaler = StandardScaler::new();
        scaler.fit(&array![[1.0, 2.0], [3.0, 4.0]].view()).unwrap();
        assert!(matches!(
            scaler.transform(&array![[1.0]].view()).unwrap_err(),
            TrainingError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_pair_fits_on_train_only() {
        let series: Vec<f64> = (0..40).map(|v| 100.0 + v as f64).collect();
        let examples = window(&series, 4).unwrap();
        let (train, test) = chronological_split(&examples, 0.25).unwrap();
        let scalers = ScalerPair::fit(&train).unwrap();
        let before = scalers.clone();

        let train_scaled = scalers.transform_examples(&train).unwrap();
        let test_scaled = scalers.transform_examples(&test).unwrap();
        assert_eq!(scalers, before);

        assert_eq!(train_scaled.x.dim(), train.x.dim());
        assert_eq!(test_scaled.y.dim(), (test.len(), 1));
        let train_target_mean = train_scaled.y.mean().unwrap();
        assert!(train_target_mean.abs() < 1e-10);
        // test rows come after train rows, so they sit above the train mean
        assert!(test_scaled.y.iter().all(|&v| v > 1.0));

        let expected_mean = train.y.mean().unwrap();
        assert!((scalers.target.state().unwrap().mean[0] - expected_mean).abs() < 1e-12);
    }

    #[test]
    fn test_pair_window_shapes() {
        let series: Vec<f64> = (0..20).map(|v| (v as f64).sqrt()).collect();
        let examples = window(&series, 5).unwrap();
        let scalers = ScalerPair::fit(&examples).unwrap();
        assert_eq!(scalers.window_size().unwrap(), 5);

        let one = scalers.transform_window(&series[14..19]).unwrap();
        assert_eq!(one.dim(), (1, 5, 1));
        let batch = scalers.transform_windows(&examples.x).unwrap();
        assert!((one[[0, 4, 0]] - batch[[14, 4, 0]]).abs() < 1e-12);

        assert!(matches!(
            scalers.transform_window(&series[0..4]).unwrap_err(),
            TrainingError::ShapeMismatch { .. }
        ));
        assert!(matches!(
            scalers.inverse_target(&array![[1.0, 2.0]]).unwrap_err(),
            TrainingError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_pair_handles_empty_test() {
        let series: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let examples = window(&series, 3).unwrap();
        let scalers = ScalerPair::fit(&examples).unwrap();
        let empty = examples.rows(0, 0);
        let scaled = scalers.transform_examples(&empty).unwrap();
        assert!(scaled.is_empty());
        assert_eq!(scaled.x.dim(), (0, 3, 1));
    }

    #[test]
    fn test_from_state_validation() {
        let state = ScalerState {
            mean: array![1.0],
            std: array![0.0],
            constant_columns: vec![],
        };
        assert!(StandardScaler::from_state(state).is_err());

        let state = ScalerState {
            mean: array![1.0, 2.0],
            std: array![1.0],
            constant_columns: vec![],
        };
        assert!(matches!(
            StandardScaler::from_state(state).unwrap_err(),
            TrainingError::ShapeMismatch { .. }
        ));

        let state = ScalerState {
            mean: array![1.0],
            std: array![2.0],
            constant_columns: vec![3],
        };
        assert!(matches!(
            StandardScaler::from_state(state).unwrap_err(),
            TrainingError::IndexOutOfRange { index: 3, len: 1 }
        ));
    }

    #[test]
    fn test_deserialization_checks_state() {
        let mut scaler = StandardScaler::new();
        scaler.fit(&array![[1.0, 4.0], [3.0, 8.0]].view()).unwrap();
        let json = serde_json::to_value(&scaler).unwrap();
        let back: StandardScaler = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, scaler);

        let mut short_std = json.clone();
        short_std["state"]["std"] = serde_json::json!({"v": 1, "dim": [1], "data": [1.0]});
        assert!(serde_json::from_value::<StandardScaler>(short_std).is_err());

        let mut zero_std = json;
        zero_std["state"]["std"] = serde_json::json!({"v": 1, "dim": [2], "data": [0.0, 0.0]});
        assert!(serde_json::from_value::<StandardScaler>(zero_std).is_err());

        let unfitted: StandardScaler = serde_json::from_str("{\"state\": null}").unwrap();
        assert!(unfitted.state().is_err());
    }

    #[test]
    fn test_pair_validation() {
        let series: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let scalers = ScalerPair::fit(&window(&series, 3).unwrap()).unwrap();
        assert!(scalers.validate().is_ok());

        let mut wide_target = scalers.clone();
        wide_target.target = scalers.features.clone();
        assert!(matches!(
            wide_target.validate().unwrap_err(),
            TrainingError::ShapeMismatch { .. }
        ));

        let unfitted = ScalerPair {
            features: StandardScaler::new(),
            target: scalers.target.clone(),
        };
        assert!(matches!(
            unfitted.validate().unwrap_err(),
            TrainingError::NotFitted
        ));
    }
}
