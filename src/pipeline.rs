// projeto: lstmcotacao
// file: src/pipeline.rs
// End-to-end runs: prepare, train, persist, evaluate, predict and serve

use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{DataConfig, PipelineConfig};
use crate::neural::data::{chronological_split, window, ExampleSet, PriceSeries, SequenceDataset};
use crate::neural::evaluator::{Evaluation, Evaluator};
use crate::neural::metrics::EvaluationMetrics;
use crate::neural::model::{LstmRegressor, SequenceModel};
use crate::neural::scaler::ScalerPair;
use crate::neural::source::{CsvPriceSource, DataOrigin, DateRange, FallbackChain, YahooPriceSource};
use crate::neural::storage::{ArtifactMetadata, ModelStore, TrainingProvenance};
use crate::neural::trainer::{Trainer, TrainingHistory};
use crate::neural::utils::{Result, TrainingError};

/// Raw and scaled splits of one windowed series, plus the scalers fitted on
/// the training rows.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub window_size: usize,
    pub train_raw: ExampleSet,
    pub test_raw: ExampleSet,
    pub scalers: ScalerPair,
    pub train: SequenceDataset,
    pub test: SequenceDataset,
}

pub fn prepare(series: &[f64], window_size: usize, test_fraction: f64) -> Result<PreparedData> {
    let examples = window(series, window_size)?;
    let (train_raw, test_raw) = chronological_split(&examples, test_fraction)?;
    if train_raw.is_empty() {
        return Err(TrainingError::InsufficientData {
            required: window_size,
            actual: series.len(),
        });
    }
    let scalers = ScalerPair::fit(&train_raw)?;
    let train = SequenceDataset::new(scalers.transform_examples(&train_raw)?);
    let test = SequenceDataset::new(scalers.transform_examples(&test_raw)?);
    Ok(PreparedData {
        window_size,
        train_raw,
        test_raw,
        scalers,
        train,
        test,
    })
}

pub struct TrainingOutcome {
    pub symbol: String,
    pub window_size: usize,
    pub model: LstmRegressor,
    pub scalers: ScalerPair,
    pub history: TrainingHistory,
    /// De-scaled test predictions; `None` when the test split is empty.
    pub evaluation: Option<Evaluation>,
    pub metrics: Option<EvaluationMetrics>,
}

impl TrainingOutcome {
    pub fn test_rmse(&self) -> Option<f64> {
        self.metrics.map(|m| m.rmse)
    }
}

pub fn train_pipeline(config: &PipelineConfig, series: &PriceSeries) -> Result<TrainingOutcome> {
    config.validate()?;
    let closes = series.closes();
    info!(
        "📊 Preparando {} preços de '{}' (janela {}, teste {:.0}%)",
        closes.len(),
        series.symbol(),
        config.dataset.window_size,
        config.dataset.test_fraction * 100.0
    );
    let prepared = prepare(
        &closes,
        config.dataset.window_size,
        config.dataset.test_fraction,
    )?;

    let mut rng = config.training.rng();
    let mut model = LstmRegressor::new(config.model.clone(), &mut rng)?;
    let mut trainer = Trainer::new(config.training.clone())?;
    let history = trainer.fit(&mut model, &prepared.train)?;

    let (evaluation, metrics) = if prepared.test.is_empty() {
        warn!("⚠️ Conjunto de teste vazio; métricas não calculadas");
        (None, None)
    } else {
        let evaluation = Evaluator::default()
            .evaluate(&model, &prepared.test)?
            .descale(&prepared.scalers)?;
        let metrics = EvaluationMetrics::compute(&evaluation.actuals, &evaluation.predictions)?;
        metrics.log_summary("Teste");
        (Some(evaluation), Some(metrics))
    };

    Ok(TrainingOutcome {
        symbol: series.symbol().to_string(),
        window_size: prepared.window_size,
        model,
        scalers: prepared.scalers,
        history,
        evaluation,
        metrics,
    })
}

/// Writes weights, metadata and scalers under the store's key.
pub fn persist(store: &ModelStore, outcome: &TrainingOutcome) -> Result<ArtifactMetadata> {
    let provenance = TrainingProvenance {
        window_size: outcome.window_size,
        symbol: outcome.symbol.clone(),
        epochs_trained: outcome.history.len(),
        final_train_loss: outcome.history.final_loss(),
        test_rmse: outcome.test_rmse(),
    };
    let metadata = store.save(&outcome.model, &provenance)?;
    store.save_scalers(&outcome.scalers)?;
    Ok(metadata)
}

/// Re-runs the chronological split with the stored window and scalers and
/// scores the stored model on the test rows.
pub fn evaluate_saved(
    store: &ModelStore,
    series: &PriceSeries,
    test_fraction: f64,
) -> Result<EvaluationMetrics> {
    let (model, metadata) = store.load::<LstmRegressor>()?;
    let scalers = store.load_scalers()?;
    check_window(&scalers, metadata.window_size)?;

    let examples = window(&series.closes(), metadata.window_size)?;
    let (_, test_raw) = chronological_split(&examples, test_fraction)?;
    if test_raw.is_empty() {
        return Err(TrainingError::InsufficientData {
            required: metadata.window_size + 1,
            actual: series.len(),
        });
    }
    let test = SequenceDataset::new(scalers.transform_examples(&test_raw)?);
    let evaluation = Evaluator::default().evaluate(&model, &test)?.descale(&scalers)?;
    let metrics = EvaluationMetrics::compute(&evaluation.actuals, &evaluation.predictions)?;
    metrics.log_summary("Avaliação do modelo salvo");
    Ok(metrics)
}

fn check_window(scalers: &ScalerPair, window_size: usize) -> Result<()> {
    let fitted = scalers.window_size()?;
    if fitted != window_size {
        return Err(TrainingError::shape_mismatch(
            format!("window of {} values", fitted),
            format!("window of {} values", window_size),
        ));
    }
    Ok(())
}

/// Next-value prediction in price units from the most recent `window_size`
/// closes, using the frozen scalers.
pub fn predict_next<M: SequenceModel>(
    model: &M,
    scalers: &ScalerPair,
    series: &PriceSeries,
    window_size: usize,
) -> Result<f64> {
    check_window(scalers, window_size)?;
    let latest = series.latest_window(window_size)?;
    let input = scalers.transform_window(&latest)?;
    let scaled = model.forward(&input.view())?;
    let value = scalers.inverse_target(&scaled)?[[0, 0]];
    if !value.is_finite() {
        return Err(TrainingError::NumericInstability {
            epoch: 0,
            loss: value,
        });
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub symbol: String,
    /// Must equal the stored window when given.
    #[serde(default)]
    pub window_size: Option<usize>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionResponse {
    Ok {
        symbol: String,
        predicted_value: f64,
        window_size: usize,
        last_date: Option<NaiveDate>,
        data_origin: DataOrigin,
        source: String,
    },
    Error {
        kind: String,
        detail: String,
    },
}

impl PredictionResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, PredictionResponse::Ok { .. })
    }
}

/// Never returns a partial number: any failure becomes an `error` payload.
pub fn serve_prediction(
    source: &FallbackChain,
    store: &ModelStore,
    request: &PredictionRequest,
) -> PredictionResponse {
    match try_serve(source, store, request) {
        Ok(response) => response,
        Err(e) => {
            error!("❌ Falha na previsão para '{}': {}", request.symbol, e);
            PredictionResponse::Error {
                kind: e.kind().to_string(),
                detail: e.to_string(),
            }
        }
    }
}

fn try_serve(
    source: &FallbackChain,
    store: &ModelStore,
    request: &PredictionRequest,
) -> Result<PredictionResponse> {
    let (model, metadata) = store.load::<LstmRegressor>()?;
    let window_size = request.window_size.unwrap_or(metadata.window_size);
    if window_size != metadata.window_size {
        return Err(TrainingError::shape_mismatch(
            format!("window_size {} (stored model)", metadata.window_size),
            format!("window_size {}", window_size),
        ));
    }
    let scalers = store.load_scalers()?;

    let range = DateRange::new(request.start_date, None);
    let fetched = source.fetch_with_origin(&request.symbol, &range)?;
    let predicted_value = predict_next(&model, &scalers, &fetched.series, window_size)?;
    info!(
        "🔮 Previsão para '{}': {:.4} (fonte {})",
        request.symbol, predicted_value, fetched.source
    );

    Ok(PredictionResponse::Ok {
        symbol: request.symbol.clone(),
        predicted_value,
        window_size,
        last_date: fetched.series.last_date(),
        data_origin: fetched.origin,
        source: fetched.source,
    })
}

/// Live chart API first when enabled, then the per-symbol CSV directory, then
/// the fixed fallback file.
pub fn build_source(data: &DataConfig) -> FallbackChain {
    let csv_dir = CsvPriceSource::new(&data.csv_dir);
    let chain = if data.live_fetch {
        let live = YahooPriceSource::new(&data.chart_url)
            .with_timeout(Duration::from_secs(data.timeout_secs));
        FallbackChain::new(live).or_else(csv_dir)
    } else {
        FallbackChain::new(csv_dir)
    };
    let chain = match &data.fallback_csv {
        Some(path) => chain.or_else(CsvPriceSource::file(path)),
        None => chain,
    };
    debug!("🔗 Fontes de dados: {}", chain.source_names().join(" → "));
    chain
}
