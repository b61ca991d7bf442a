// projeto: lstmcotacao
// file: src/main.rs
// CLI: treino, previsão e avaliação do modelo LSTM de cotações

use std::path::PathBuf;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use log::{error, info};

use lstmcotacao::config::PipelineConfig;
use lstmcotacao::neural::TrainingError;
use lstmcotacao::pipeline::{
    build_source, evaluate_saved, persist, serve_prediction, train_pipeline, PredictionRequest,
};

#[derive(Parser, Debug)]
#[command(
    name = "lstm",
    version = "0.1.0",
    about = "Treinamento e previsão de cotações diárias com LSTM",
    long_about = "Transforma a série de fechamentos de um ativo em janelas normalizadas, treina uma LSTM empilhada, salva pesos, metadados e scalers, e reutiliza o modelo salvo para prever o próximo fechamento."
)]
struct Cli {
    /// Arquivo de configuração TOML
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Modo verboso de logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Treina o modelo e salva os artefatos
    Train(TrainArgs),
    /// Prevê o próximo fechamento com o modelo salvo
    Predict(PredictArgs),
    /// Recalcula RMSE/MAE do modelo salvo no conjunto de teste
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug, Default)]
struct DataArgs {
    /// Ativo (ex: PETR4.SA)
    #[arg(long)]
    symbol: Option<String>,

    /// Data inicial (AAAA-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Diretório com os CSVs <ativo>.csv
    #[arg(long)]
    csv_dir: Option<PathBuf>,

    /// Não consultar a API; usar apenas os CSVs locais
    #[arg(long)]
    offline: bool,

    /// Diretório dos artefatos do modelo
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Nome lógico do modelo
    #[arg(long)]
    model_name: Option<String>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Tamanho da janela de entrada
    #[arg(long)]
    window_size: Option<usize>,

    /// Fração final da série reservada para teste
    #[arg(long)]
    test_fraction: Option<f64>,

    /// Número de épocas de treinamento
    #[arg(long)]
    epochs: Option<usize>,

    /// Tamanho do lote
    #[arg(long)]
    batch_size: Option<usize>,

    /// Neurônios por camada LSTM
    #[arg(long)]
    hidden_size: Option<usize>,

    /// Número de camadas LSTM
    #[arg(long)]
    num_layers: Option<usize>,

    /// Taxa de dropout entre camadas
    #[arg(long)]
    dropout: Option<f64>,

    /// Learning rate do Adam
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Semente para reprodutibilidade
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct PredictArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Deve coincidir com a janela do modelo salvo
    #[arg(long)]
    window_size: Option<usize>,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Fração final da série usada como teste
    #[arg(long)]
    test_fraction: Option<f64>,
}

impl DataArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(symbol) = &self.symbol {
            config.data.symbol = symbol.clone();
        }
        if let Some(start) = self.start_date {
            config.data.start_date = Some(start);
        }
        if let Some(dir) = &self.csv_dir {
            config.data.csv_dir = dir.clone();
        }
        if self.offline {
            config.data.live_fetch = false;
        }
        if let Some(dir) = &self.model_dir {
            config.artifacts.dir = dir.clone();
        }
        if let Some(name) = &self.model_name {
            config.artifacts.name = name.clone();
        }
    }
}

impl TrainArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        self.data.apply(config);
        if let Some(v) = self.window_size {
            config.dataset.window_size = v;
        }
        if let Some(v) = self.test_fraction {
            config.dataset.test_fraction = v;
        }
        if let Some(v) = self.epochs {
            config.training.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.training.batch_size = v;
        }
        if let Some(v) = self.hidden_size {
            config.model.hidden_size = v;
        }
        if let Some(v) = self.num_layers {
            config.model.num_layers = v;
        }
        if let Some(v) = self.dropout {
            config.model.dropout = v;
        }
        if let Some(v) = self.learning_rate {
            config.training.learning_rate = v;
        }
        if self.seed.is_some() {
            config.training.seed = self.seed;
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Configurar logging
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    info!("🕐 Iniciado em: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    let result = PipelineConfig::load_or_default(&cli.config).and_then(|config| match &cli.command {
        Command::Train(args) => run_train(config, args),
        Command::Predict(args) => run_predict(config, args),
        Command::Evaluate(args) => run_evaluate(config, args),
    });

    match result {
        Ok(()) => {
            info!("🏁 Concluído em {:.2}s", start_time.elapsed().as_secs_f64());
        }
        Err(e) => {
            error!("❌ Erro: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

fn run_train(mut config: PipelineConfig, args: &TrainArgs) -> Result<(), TrainingError> {
    args.apply(&mut config);
    config.validate()?;

    let source = build_source(&config.data);
    let fetched = source.fetch_with_origin(&config.data.symbol, &config.date_range())?;
    info!(
        "📥 {} fechamentos de '{}' via {} ({:?})",
        fetched.series.len(),
        config.data.symbol,
        fetched.source,
        fetched.origin
    );

    let outcome = train_pipeline(&config, &fetched.series)?;
    persist(&config.store(), &outcome)?;

    match outcome.test_rmse() {
        Some(rmse) => println!("Test RMSE: {:.4}", rmse),
        None => println!("Test RMSE: n/a (conjunto de teste vazio)"),
    }
    Ok(())
}

fn run_predict(mut config: PipelineConfig, args: &PredictArgs) -> Result<(), TrainingError> {
    args.data.apply(&mut config);
    let source = build_source(&config.data);
    let request = PredictionRequest {
        symbol: config.data.symbol.clone(),
        window_size: args.window_size,
        start_date: config.data.start_date,
    };

    let response = serve_prediction(&source, &config.store(), &request);
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_ok() {
        // o erro já foi registrado por serve_prediction
        std::process::exit(1);
    }
    Ok(())
}

fn run_evaluate(mut config: PipelineConfig, args: &EvaluateArgs) -> Result<(), TrainingError> {
    args.data.apply(&mut config);
    let test_fraction = args.test_fraction.unwrap_or(config.dataset.test_fraction);

    let source = build_source(&config.data);
    let fetched = source.fetch_with_origin(&config.data.symbol, &config.date_range())?;
    let metrics = evaluate_saved(&config.store(), &fetched.series, test_fraction)?;

    println!("Test RMSE: {:.4}", metrics.rmse);
    println!("Test MAE: {:.4}", metrics.mae);
    Ok(())
}
