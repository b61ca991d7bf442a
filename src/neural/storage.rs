// projeto: lstmcotacao
// file: src/neural/storage.rs
// File-based artifacts: weights (bincode), metadata and scalers (JSON)

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::neural::model::{ModelConfig, ModelWeights, SequenceModel};
use crate::neural::scaler::ScalerPair;
use crate::neural::utils::{Result, TrainingError};

/// Metadata artifact. The hyperparameters sit at the top level of the JSON
/// object so the model can be rebuilt from them alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(flatten)]
    pub config: ModelConfig,
    pub architecture: String,
    pub window_size: usize,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub saved_at: String,
    #[serde(default)]
    pub epochs_trained: usize,
    #[serde(default)]
    pub final_train_loss: Option<f64>,
    #[serde(default)]
    pub test_rmse: Option<f64>,
}

/// Provenance recorded next to the hyperparameters on save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingProvenance {
    pub window_size: usize,
    pub symbol: String,
    pub epochs_trained: usize,
    pub final_train_loss: Option<f64>,
    pub test_rmse: Option<f64>,
}

/// One logical model key: `<dir>/<name>.bin`, `<dir>/<name>_metadata.json`
/// and `<dir>/<name>_scalers.json`.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    name: String,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        ModelStore {
            dir: dir.into(),
            name: name.into(),
        }
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(format!("{}.bin", self.name))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}_metadata.json", self.name))
    }

    pub fn scalers_path(&self) -> PathBuf {
        self.dir.join(format!("{}_scalers.json", self.name))
    }

    /// Both linked artifacts (weights and metadata) are present.
    pub fn exists(&self) -> bool {
        self.weights_path().is_file() && self.metadata_path().is_file()
    }

    pub fn save<M: SequenceModel>(
        &self,
        model: &M,
        provenance: &TrainingProvenance,
    ) -> Result<ArtifactMetadata> {
        fs::create_dir_all(&self.dir)?;

        let bytes = bincode::serde::encode_to_vec(model.weights(), bincode::config::standard())
            .map_err(|e| TrainingError::Serialization(format!("Failed to encode weights: {}", e)))?;
        fs::write(self.weights_path(), &bytes)?;

        let metadata = ArtifactMetadata {
            config: model.config().clone(),
            architecture: M::ARCHITECTURE.to_string(),
            window_size: provenance.window_size,
            symbol: provenance.symbol.clone(),
            saved_at: Utc::now().to_rfc3339(),
            epochs_trained: provenance.epochs_trained,
            final_train_loss: provenance.final_train_loss,
            test_rmse: provenance.test_rmse,
        };
        fs::write(self.metadata_path(), serde_json::to_string_pretty(&metadata)?)?;

        info!("💾 Modelo salvo em {}", self.weights_path().display());
        info!("   - Metadados: {}", self.metadata_path().display());
        debug!("   - {} bytes de pesos", bytes.len());
        Ok(metadata)
    }

    /// Reads and validates the metadata artifact.
    pub fn metadata(&self) -> Result<ArtifactMetadata> {
        let path = self.metadata_path();
        let text = read_artifact(&path)?;
        let metadata: ArtifactMetadata = serde_json::from_str(&text).map_err(|e| {
            TrainingError::ArchitectureMismatch(format!(
                "malformed metadata {}: {}",
                path.display(),
                e
            ))
        })?;
        metadata
            .config
            .validate()
            .map_err(|e| TrainingError::ArchitectureMismatch(e.to_string()))?;
        if metadata.window_size == 0 {
            return Err(TrainingError::ArchitectureMismatch(
                "metadata window_size must be positive".to_string(),
            ));
        }
        Ok(metadata)
    }

    /// Metadata first, then a zero model of that shape, then the weights.
    /// The returned model is in eval mode.
    pub fn load<M: SequenceModel>(&self) -> Result<(M, ArtifactMetadata)> {
        let weights_path = self.weights_path();
        if !weights_path.is_file() {
            return Err(TrainingError::ArtifactMissing(weights_path));
        }
        let metadata = self.metadata()?;
        if metadata.architecture != M::ARCHITECTURE {
            return Err(TrainingError::ArchitectureMismatch(format!(
                "artifact holds '{}', expected '{}'",
                metadata.architecture,
                M::ARCHITECTURE
            )));
        }

        let mut model = M::from_config(metadata.config.clone())
            .map_err(|e| TrainingError::ArchitectureMismatch(e.to_string()))?;

        let bytes = fs::read(&weights_path)?;
        let (weights, _): (ModelWeights, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(
                |e| TrainingError::ArchitectureMismatch(format!("unreadable weights: {}", e)),
            )?;
        model.load_weights(weights)?;
        model.eval();

        info!(
            "📂 Modelo '{}' carregado ({} camada(s), janela {})",
            self.name, metadata.config.num_layers, metadata.window_size
        );
        Ok((model, metadata))
    }

    pub fn save_scalers(&self, scalers: &ScalerPair) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.scalers_path(), serde_json::to_string_pretty(scalers)?)?;
        debug!("💾 Scalers salvos em {}", self.scalers_path().display());
        Ok(())
    }

    pub fn load_scalers(&self) -> Result<ScalerPair> {
        let text = read_artifact(&self.scalers_path())?;
        let scalers: ScalerPair = serde_json::from_str(&text).map_err(|e| {
            TrainingError::ArchitectureMismatch(format!("unreadable scalers: {}", e))
        })?;
        scalers
            .validate()
            .map_err(|e| TrainingError::ArchitectureMismatch(format!("invalid scalers: {}", e)))?;
        Ok(scalers)
    }
}

fn read_artifact(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(TrainingError::ArtifactMissing(path.to_path_buf()));
    }
    Ok(fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::data::window;
    use crate::neural::model::LstmRegressor;
    use ndarray::Array3;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::tempdir;

    fn trained_like_model() -> LstmRegressor {
        let mut rng = StdRng::seed_from_u64(5);
        LstmRegressor::new(ModelConfig::new(6, 2, 0.1), &mut rng).unwrap()
    }

    fn provenance() -> TrainingProvenance {
        TrainingProvenance {
            window_size: 4,
            symbol: "PETR4.SA".to_string(),
            epochs_trained: 3,
            final_train_loss: Some(0.12),
            test_rmse: None,
        }
    }

    #[test]
    fn test_round_trip_reproduces_predictions() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("models"), "lstm_model");
        let model = trained_like_model();
        store.save(&model, &provenance()).unwrap();
        assert!(store.exists());

        let (loaded, metadata) = store.load::<LstmRegressor>().unwrap();
        assert!(!loaded.is_training());
        assert_eq!(metadata.config, *model.config());
        assert_eq!(metadata.window_size, 4);
        assert_eq!(metadata.architecture, "lstm");

        let x = Array3::from_shape_fn((5, 4, 1), |(b, t, _)| (b as f64 - t as f64) * 0.3);
        let before = model.forward(&x.view()).unwrap();
        let after = loaded.forward(&x.view()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_metadata_keys_at_top_level() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        store.save(&trained_like_model(), &provenance()).unwrap();
        let text = fs::read_to_string(store.metadata_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        for key in ["input_size", "hidden_size", "num_layers", "output_size", "dropout"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["hidden_size"], 6);
        assert_eq!(json["symbol"], "PETR4.SA");
    }

    #[test]
    fn test_missing_artifacts() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "absent");
        assert!(!store.exists());
        assert!(matches!(
            store.load::<LstmRegressor>().unwrap_err(),
            TrainingError::ArtifactMissing(_)
        ));

        store.save(&trained_like_model(), &provenance()).unwrap();
        fs::remove_file(store.metadata_path()).unwrap();
        assert!(matches!(
            store.load::<LstmRegressor>().unwrap_err(),
            TrainingError::ArtifactMissing(_)
        ));
        assert!(matches!(
            store.load_scalers().unwrap_err(),
            TrainingError::ArtifactMissing(_)
        ));
    }

    #[test]
    fn test_metadata_disagreeing_with_weights() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        store.save(&trained_like_model(), &provenance()).unwrap();

        let mut metadata = store.metadata().unwrap();
        metadata.config.hidden_size = 9;
        fs::write(store.metadata_path(), serde_json::to_string(&metadata).unwrap()).unwrap();
        assert!(matches!(
            store.load::<LstmRegressor>().unwrap_err(),
            TrainingError::ArchitectureMismatch(_)
        ));
    }

    #[test]
    fn test_malformed_or_foreign_metadata() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        store.save(&trained_like_model(), &provenance()).unwrap();

        fs::write(store.metadata_path(), "{\"hidden_size\": 3}").unwrap();
        assert!(matches!(
            store.load::<LstmRegressor>().unwrap_err(),
            TrainingError::ArchitectureMismatch(_)
        ));

        let mut metadata = ArtifactMetadata {
            config: ModelConfig::new(6, 2, 0.1),
            architecture: "gru".to_string(),
            window_size: 4,
            symbol: String::new(),
            saved_at: String::new(),
            epochs_trained: 0,
            final_train_loss: None,
            test_rmse: None,
        };
        fs::write(store.metadata_path(), serde_json::to_string(&metadata).unwrap()).unwrap();
        assert!(matches!(
            store.load::<LstmRegressor>().unwrap_err(),
            TrainingError::ArchitectureMismatch(_)
        ));

        metadata.architecture = "lstm".to_string();
        metadata.config.num_layers = 0;
        fs::write(store.metadata_path(), serde_json::to_string(&metadata).unwrap()).unwrap();
        assert!(matches!(
            store.load::<LstmRegressor>().unwrap_err(),
            TrainingError::ArchitectureMismatch(_)
        ));
    }

    #[test]
    fn test_scalers_round_trip() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        let series: Vec<f64> = (0..30).map(|v| 20.0 + (v as f64 * 0.4).sin()).collect();
        let scalers = ScalerPair::fit(&window(&series, 4).unwrap()).unwrap();
        store.save_scalers(&scalers).unwrap();
        let loaded = store.load_scalers().unwrap();
        assert_eq!(loaded, scalers);
    }

    #[test]
    fn test_tampered_scalers_rejected() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "m");
        let series: Vec<f64> = (0..30).map(|v| 20.0 + (v as f64 * 0.4).sin()).collect();
        let scalers = ScalerPair::fit(&window(&series, 5).unwrap()).unwrap();
        store.save_scalers(&scalers).unwrap();
        let text = fs::read_to_string(store.scalers_path()).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&text).unwrap();

        let tampered = [
            ("features", serde_json::json!({"v": 1, "dim": [3], "data": [1.0, 1.0, 1.0]})),
            ("features", serde_json::json!({"v": 1, "dim": [5], "data": [0.0, 0.0, 0.0, 0.0, 0.0]})),
            ("target", serde_json::json!({"v": 1, "dim": [1], "data": [0.0]})),
        ];
        for (role, std) in tampered {
            let mut json = saved.clone();
            json[role]["state"]["std"] = std;
            fs::write(store.scalers_path(), json.to_string()).unwrap();
            assert!(matches!(
                store.load_scalers().unwrap_err(),
                TrainingError::ArchitectureMismatch(_)
            ));
        }

        let mut wide_target = saved.clone();
        wide_target["target"] = saved["features"].clone();
        fs::write(store.scalers_path(), wide_target.to_string()).unwrap();
        assert!(matches!(
            store.load_scalers().unwrap_err(),
            TrainingError::ArchitectureMismatch(_)
        ));

        fs::write(store.scalers_path(), "not json").unwrap();
        assert!(matches!(
            store.load_scalers().unwrap_err(),
            TrainingError::ArchitectureMismatch(_)
        ));
    }
}
