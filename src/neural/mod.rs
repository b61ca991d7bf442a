// projeto: lstmcotacao
// file: src/neural/mod.rs
// Module declarations for the time-series training pipeline

pub mod utils;     // Error handling, Adam optimizer, numeric helpers
pub mod data;      // Price series, windowing, chronological split, dataset
pub mod scaler;    // Standard scalers fitted on training rows
pub mod model;     // Stacked LSTM regressor with BPTT
pub mod trainer;   // Mini-batch training loop
pub mod evaluator; // Ordered inference passes
pub mod metrics;   // RMSE/MAE and companions
pub mod storage;   // Weights, metadata and scaler artifacts on disk
pub mod source;    // CSV and Yahoo price sources with fallback

// Re-export commonly used items for convenience
pub use data::{chronological_split, window, ExampleSet, PricePoint, PriceSeries, SequenceDataset};
pub use evaluator::{Evaluation, Evaluator};
pub use metrics::{mean_absolute_error, root_mean_squared_error, EvaluationMetrics};
pub use model::{LstmRegressor, ModelConfig, ModelWeights, SequenceModel};
pub use scaler::{ScalerPair, StandardScaler};
pub use source::{
    CsvPriceSource, DataOrigin, DateRange, FallbackChain, FetchedSeries, PriceSource, YahooPriceSource,
};
pub use storage::{ArtifactMetadata, ModelStore, TrainingProvenance};
pub use trainer::{TrainConfig, Trainer, TrainingHistory};
pub use utils::{Result, TrainingError};
