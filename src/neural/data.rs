// projeto: lstmcotacao
// file: src/neural/data.rs
// Price series, sliding windows, chronological split and the indexable dataset

use chrono::NaiveDate;
use log::{debug, info, warn};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::neural::utils::{validate_finite, Result, TrainingError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Chronologically ordered closes of one symbol, one observation per date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Sorts by date and keeps the last observation for a repeated date.
    pub fn new(symbol: impl Into<String>, mut points: Vec<PricePoint>) -> Result<Self> {
        let symbol = symbol.into();
        validate_finite(points.iter().map(|p| &p.close), "closing prices")?;

        if points.windows(2).any(|w| w[0].date > w[1].date) {
            warn!("⚠️ Série de '{}' fora de ordem; ordenando por data", symbol);
            points.sort_by_key(|p| p.date);
        }

        let before = points.len();
        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => deduped.push(point),
            }
        }
        if deduped.len() != before {
            warn!(
                "⚠️ Removidas {} datas duplicadas da série de '{}'",
                before - deduped.len(),
                symbol
            );
        }

        Ok(PriceSeries {
            symbol,
            points: deduped,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Inclusive on both ends; `None` leaves that side open.
    pub fn between(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> PriceSeries {
        let points = self
            .points
            .iter()
            .filter(|p| start.is_none_or(|s| p.date >= s))
            .filter(|p| end.is_none_or(|e| p.date <= e))
            .copied()
            .collect();
        PriceSeries {
            symbol: self.symbol.clone(),
            points,
        }
    }

    /// The `window_size` most recent closes, oldest first.
    pub fn latest_window(&self, window_size: usize) -> Result<Vec<f64>> {
        if window_size == 0 {
            return Err(TrainingError::ModelConfiguration(
                "window_size must be positive".to_string(),
            ));
        }
        if self.points.len() < window_size {
            return Err(TrainingError::InsufficientData {
                required: window_size - 1,
                actual: self.points.len(),
            });
        }
        Ok(self.points[self.points.len() - window_size..]
            .iter()
            .map(|p| p.close)
            .collect())
    }
}

/// Parallel `x` `[N, window_size, 1]` and `y` `[N, 1]`, chronological rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleSet {
    pub x: Array3<f64>,
    pub y: Array2<f64>,
}

impl ExampleSet {
    pub fn new(x: Array3<f64>, y: Array2<f64>) -> Result<Self> {
        let (n, _, features) = x.dim();
        if features != 1 {
            return Err(TrainingError::shape_mismatch(
                "x with 1 feature per step",
                format!("{:?}", x.shape()),
            ));
        }
        if y.dim() != (n, 1) {
            return Err(TrainingError::shape_mismatch(
                format!("y of shape [{}, 1]", n),
                format!("{:?}", y.shape()),
            ));
        }
        Ok(ExampleSet { x, y })
    }

    pub fn len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn window_size(&self) -> usize {
        self.x.len_of(Axis(1))
    }

    /// Contiguous rows `start..end`, order preserved.
    pub fn rows(&self, start: usize, end: usize) -> ExampleSet {
        ExampleSet {
            x: self.x.slice(s![start..end, .., ..]).to_owned(),
            y: self.y.slice(s![start..end, ..]).to_owned(),
        }
    }
}

/// Stride-1 sliding windows: `x[i - w] = series[i - w..i]`, `y[i - w] = series[i]`.
pub fn window(series: &[f64], window_size: usize) -> Result<ExampleSet> {
    if window_size == 0 {
        return Err(TrainingError::ModelConfiguration(
            "window_size must be positive".to_string(),
        ));
    }
    if series.len() <= window_size {
        return Err(TrainingError::InsufficientData {
            required: window_size,
            actual: series.len(),
        });
    }

    let n = series.len() - window_size;
    let x = Array3::from_shape_fn((n, window_size, 1), |(i, t, _)| series[i + t]);
    let y = Array2::from_shape_fn((n, 1), |(i, _)| series[i + window_size]);
    debug!("🔧 {} janelas de tamanho {} criadas", n, window_size);
    ExampleSet::new(x, y)
}

/// Train = chronological prefix, test = suffix; never shuffled.
pub fn chronological_split(
    examples: &ExampleSet,
    test_fraction: f64,
) -> Result<(ExampleSet, ExampleSet)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(TrainingError::ModelConfiguration(format!(
            "test_fraction must be in (0, 1), got {}",
            test_fraction
        )));
    }
    let n = examples.len();
    let split_index = ((1.0 - test_fraction) * n as f64).floor() as usize;
    let split_index = split_index.min(n);

    let train = examples.rows(0, split_index);
    let test = examples.rows(split_index, n);
    info!(
        "✂️ Divisão cronológica: treino={} | teste={} (fronteira no índice {})",
        train.len(),
        test.len(),
        split_index
    );
    Ok((train, test))
}

/// Index-based `(window, target)` access over an example set.
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    examples: ExampleSet,
}

impl SequenceDataset {
    pub fn new(examples: ExampleSet) -> Self {
        SequenceDataset { examples }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.examples.window_size()
    }

    pub fn examples(&self) -> &ExampleSet {
        &self.examples
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(TrainingError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    /// Window `[window_size, 1]` and its target.
    pub fn get(&self, index: usize) -> Result<(ArrayView2<'_, f64>, f64)> {
        self.check_index(index)?;
        let window = self.examples.x.index_axis(Axis(0), index);
        Ok((window, self.examples.y[[index, 0]]))
    }

    /// Stacks the selected rows in the given order.
    pub fn batch(&self, indices: &[usize]) -> Result<(Array3<f64>, Array2<f64>)> {
        for &index in indices {
            self.check_index(index)?;
        }
        Ok((
            self.examples.x.select(Axis(0), indices),
            self.examples.y.select(Axis(0), indices),
        ))
    }
}
