// projeto: lstmcotacao
// file: src/neural/source.rs
// Price ingestion: local CSV, Yahoo chart API, and primary/fallback composition

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::neural::data::{PricePoint, PriceSeries};
use crate::neural::utils::{Result, TrainingError};

/// Inclusive date bounds; `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        DateRange { start, end }
    }
}

pub trait PriceSource {
    fn name(&self) -> &str;
    fn fetch(&self, symbol: &str, range: &DateRange) -> Result<PriceSeries>;
}

fn non_empty(series: PriceSeries, source: &str) -> Result<PriceSeries> {
    if series.is_empty() {
        return Err(TrainingError::DataUnavailable {
            symbol: series.symbol().to_string(),
            reason: format!("{} returned no prices in the requested range", source),
        });
    }
    Ok(series)
}

/// Leading `YYYY-MM-DD`; a trailing time part is ignored.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Reads `date,close` CSV files, one per symbol, or one fixed file.
#[derive(Debug, Clone)]
pub struct CsvPriceSource {
    location: CsvLocation,
}

#[derive(Debug, Clone)]
enum CsvLocation {
    Directory(PathBuf),
    File(PathBuf),
}

impl CsvPriceSource {
    /// `<dir>/<symbol>.csv`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvPriceSource {
            location: CsvLocation::Directory(dir.into()),
        }
    }

    /// Same file whatever symbol is requested.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        CsvPriceSource {
            location: CsvLocation::File(path.into()),
        }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        match &self.location {
            CsvLocation::Directory(dir) => dir.join(format!("{}.csv", symbol)),
            CsvLocation::File(path) => path.clone(),
        }
    }

    fn read_points(path: &Path, symbol: &str) -> Result<Vec<PricePoint>> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| TrainingError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: format!("cannot open {}: {}", path.display(), e),
        })?;

        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| TrainingError::DataUnavailable {
                    symbol: symbol.to_string(),
                    reason: format!("{} has no '{}' column", path.display(), name),
                })
        };
        let date_col = column("date")?;
        let close_col = column("close")?;

        let mut points = Vec::new();
        let mut skipped = 0usize;
        for record in reader.records() {
            let record = record?;
            let date = record.get(date_col).and_then(parse_date);
            let close = record
                .get(close_col)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite());
            match (date, close) {
                (Some(date), Some(close)) => points.push(PricePoint { date, close }),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("⚠️ {} linha(s) inválidas ignoradas em {}", skipped, path.display());
        }
        Ok(points)
    }
}

impl PriceSource for CsvPriceSource {
    fn name(&self) -> &str {
        match self.location {
            CsvLocation::Directory(_) => "csv_cache",
            CsvLocation::File(_) => "csv_file",
        }
    }

    fn fetch(&self, symbol: &str, range: &DateRange) -> Result<PriceSeries> {
        let path = self.path_for(symbol);
        let points = Self::read_points(&path, symbol)?;
        let series = PriceSeries::new(symbol, points)?.between(range.start, range.end);
        debug!("📄 {} preços lidos de {}", series.len(), path.display());
        non_empty(series, self.name())
    }
}

pub const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Daily closes from the Yahoo Finance chart endpoint (blocking client).
#[derive(Debug, Clone)]
pub struct YahooPriceSource {
    base_url: String,
    timeout: Duration,
}

impl YahooPriceSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        YahooPriceSource {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_url(&self, symbol: &str, range: &DateRange) -> String {
        let period1 = range
            .start
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(0, |dt| dt.and_utc().timestamp());
        let period2 = range
            .end
            .and_then(|d| d.succ_opt())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or_else(|| chrono::Utc::now().timestamp(), |dt| dt.and_utc().timestamp());
        format!(
            "{}/v8/finance/chart/{}?interval=1d&period1={}&period2={}&events=div%7Csplit",
            self.base_url.trim_end_matches('/'),
            symbol,
            period1,
            period2
        )
    }

    /// Adjusted closes when present, raw closes otherwise; null quotes skipped.
    pub fn parse_chart(symbol: &str, json: &str) -> Result<Vec<PricePoint>> {
        let unavailable = |reason: String| TrainingError::DataUnavailable {
            symbol: symbol.to_string(),
            reason,
        };
        let response: ChartResponse =
            serde_json::from_str(json).map_err(|e| unavailable(format!("bad chart payload: {}", e)))?;
        if let Some(error) = response.chart.error {
            return Err(unavailable(format!("{}: {}", error.code, error.description)));
        }
        let data = response
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| unavailable("empty chart result".to_string()))?;

        let closes = data
            .indicators
            .adjclose
            .and_then(|a| a.into_iter().next())
            .map(|a| a.adjclose)
            .filter(|a| !a.is_empty())
            .or_else(|| data.indicators.quote.into_iter().next().map(|q| q.close))
            .unwrap_or_default();

        let points = data
            .timestamp
            .iter()
            .zip(closes)
            .filter_map(|(&ts, close)| {
                let date = DateTime::from_timestamp(ts, 0)?.date_naive();
                close.filter(|c| c.is_finite()).map(|close| PricePoint { date, close })
            })
            .collect();
        Ok(points)
    }
}

impl PriceSource for YahooPriceSource {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn fetch(&self, symbol: &str, range: &DateRange) -> Result<PriceSeries> {
        let url = self.build_url(symbol, range);
        debug!("🌐 GET {}", url);
        let client = reqwest::blocking::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(self.timeout)
            .build()?;
        let response = client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrainingError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("chart endpoint answered {}", status),
            });
        }
        let body = response.text()?;
        let points = Self::parse_chart(symbol, &body)?;
        let series = PriceSeries::new(symbol, points)?.between(range.start, range.end);
        info!("🌐 {} cotações de '{}' obtidas do Yahoo", series.len(), symbol);
        non_empty(series, "yahoo")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    Primary,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct FetchedSeries {
    pub series: PriceSeries,
    pub origin: DataOrigin,
    /// Name of the source that answered, e.g. `yahoo`, `csv_cache`, `csv_file`.
    pub source: String,
}

/// Sources tried in order. The first one is primary, every later one is a
/// fallback, and the answer reports which source produced it.
pub struct FallbackChain {
    sources: Vec<Box<dyn PriceSource>>,
}

impl FallbackChain {
    pub fn new(primary: impl PriceSource + 'static) -> Self {
        FallbackChain {
            sources: vec![Box::new(primary)],
        }
    }

    pub fn or_else(mut self, fallback: impl PriceSource + 'static) -> Self {
        self.sources.push(Box::new(fallback));
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn fetch_with_origin(&self, symbol: &str, range: &DateRange) -> Result<FetchedSeries> {
        let mut failures = Vec::new();
        for (position, source) in self.sources.iter().enumerate() {
            match source.fetch(symbol, range) {
                Ok(series) => {
                    let origin = if position == 0 {
                        DataOrigin::Primary
                    } else {
                        warn!(
                            "⚠️ Série de '{}' veio da fonte alternativa {} ({} pontos)",
                            symbol,
                            source.name(),
                            series.len()
                        );
                        DataOrigin::Fallback
                    };
                    return Ok(FetchedSeries {
                        series,
                        origin,
                        source: source.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!("⚠️ Falha ao obter '{}' de {}: {}", symbol, source.name(), e);
                    failures.push(format!("{} failed ({})", source.name(), e));
                }
            }
        }
        Err(TrainingError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: failures.join("; "),
        })
    }
}

impl PriceSource for FallbackChain {
    fn name(&self) -> &str {
        "fallback_chain"
    }

    fn fetch(&self, symbol: &str, range: &DateRange) -> Result<PriceSeries> {
        Ok(self.fetch_with_origin(symbol, range)?.series)
    }
}
