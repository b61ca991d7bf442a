// projeto: lstmcotacao
// file: src/config.rs
// Pipeline configuration loaded from TOML

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};

use crate::neural::model::ModelConfig;
use crate::neural::source::{DateRange, YAHOO_CHART_URL};
use crate::neural::storage::ModelStore;
use crate::neural::trainer::TrainConfig;
use crate::neural::utils::{Result, TrainingError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub training: TrainConfig,
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub symbol: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Directory with `<symbol>.csv` files.
    pub csv_dir: PathBuf,
    /// File used whatever the symbol when everything else fails.
    pub fallback_csv: Option<PathBuf>,
    /// Query the chart API first; CSV only as fallback.
    pub live_fetch: bool,
    pub chart_url: String,
    /// Request timeout for the chart API.
    pub timeout_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            symbol: "PETR4.SA".to_string(),
            start_date: NaiveDate::from_ymd_opt(2018, 1, 1),
            end_date: None,
            csv_dir: PathBuf::from("data/raw"),
            fallback_csv: Some(PathBuf::from("data/raw/PETRA_4.csv")),
            live_fetch: true,
            chart_url: YAHOO_CHART_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub window_size: usize,
    pub test_fraction: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            window_size: 20,
            test_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    pub name: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        ArtifactsConfig {
            dir: PathBuf::from("models"),
            name: "lstm_petra".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("⚙️ Configuração carregada de: {}", path.display());
        Ok(config)
    }

    /// `load` when the file exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("📄 {} não encontrado; usando configuração padrão", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        info!("💾 Configuração salva em: {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.symbol.trim().is_empty() {
            return Err(TrainingError::ModelConfiguration(
                "data.symbol must not be empty".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.data.start_date, self.data.end_date) {
            if start > end {
                return Err(TrainingError::ModelConfiguration(format!(
                    "data.start_date {} is after data.end_date {}",
                    start, end
                )));
            }
        }
        if self.data.timeout_secs == 0 {
            return Err(TrainingError::ModelConfiguration(
                "data.timeout_secs must be positive".to_string(),
            ));
        }
        if self.dataset.window_size == 0 {
            return Err(TrainingError::ModelConfiguration(
                "dataset.window_size must be positive".to_string(),
            ));
        }
        if !(self.dataset.test_fraction > 0.0 && self.dataset.test_fraction < 1.0) {
            return Err(TrainingError::ModelConfiguration(format!(
                "dataset.test_fraction must be in (0, 1), got {}",
                self.dataset.test_fraction
            )));
        }
        if self.artifacts.name.trim().is_empty() {
            return Err(TrainingError::ModelConfiguration(
                "artifacts.name must not be empty".to_string(),
            ));
        }
        self.model.validate()?;
        self.training.validate()?;
        Ok(())
    }

    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.data.start_date, self.data.end_date)
    }

    pub fn store(&self) -> ModelStore {
        ModelStore::new(&self.artifacts.dir, &self.artifacts.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dataset.window_size, 20);
        assert_eq!(config.dataset.test_fraction, 0.1);
        assert_eq!(config.model.hidden_size, 50);
        assert_eq!(config.model.num_layers, 3);
        assert_eq!(config.model.dropout, 0.1);
        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.training.epochs, 50);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();
        config.dataset.test_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.model.hidden_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.data.start_date = NaiveDate::from_ymd_opt(2025, 1, 1);
        config.data.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.data.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = PipelineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[data]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[training]"));

        let parsed: PipelineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: PipelineConfig = toml::from_str(
            "[dataset]\nwindow_size = 30\n\n[training]\nepochs = 5\nseed = 42\n",
        )
        .unwrap();
        assert_eq!(parsed.dataset.window_size, 30);
        assert_eq!(parsed.dataset.test_fraction, 0.1);
        assert_eq!(parsed.training.epochs, 5);
        assert_eq!(parsed.training.seed, Some(42));
        assert_eq!(parsed.data.symbol, "PETR4.SA");
        assert_eq!(parsed.data.timeout_secs, 30);
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("conf").join("pipeline.toml");

        let mut config = PipelineConfig::default();
        config.artifacts.name = "vale".to_string();
        config.save(&config_path).unwrap();

        let loaded = PipelineConfig::load(&config_path).unwrap();
        assert_eq!(loaded.artifacts.name, "vale");
        assert_eq!(
            loaded.store().metadata_path(),
            PathBuf::from("models").join("vale_metadata.json")
        );

        let missing = PipelineConfig::load_or_default(temp_dir.path().join("none.toml")).unwrap();
        assert_eq!(missing, PipelineConfig::default());

        fs::write(&config_path, "[dataset]\nwindow_size = \"big\"\n").unwrap();
        assert!(matches!(
            PipelineConfig::load(&config_path).unwrap_err(),
            TrainingError::ModelConfiguration(_)
        ));
    }
}
