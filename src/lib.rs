// projeto: lstmcotacao
// file: src/lib.rs
// Next-day closing price prediction with a stacked LSTM

pub mod config;
pub mod neural;
pub mod pipeline;

pub use config::PipelineConfig;
pub use neural::{Result, TrainingError};
