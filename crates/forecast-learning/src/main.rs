//! CLI entry point for the training, evaluation and prediction steps.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use forecast_learning::config::{DEFAULT_ALPHA, DEFAULT_LABEL_COUNT};
use forecast_learning::inference::{CONTENT_TYPE_CSV, model_fn};
use forecast_learning::{BatchPrediction, Evaluation, Trainer, TrainingConfig};
use forecast_processing::config::DEFAULT_BASE_DIR;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Ridge training, evaluation and inference for occupancy forecasting",
    long_about = "Fits a multi-output ridge regressor on the preprocessed tables, scores it on \
                  the held-out table and serves predictions.\n\n\
                  EXAMPLES:\n  \
                  # Train from the channel directories\n  \
                  forecast-learning train --train ./run/train --model-dir ./run/model\n\n  \
                  # Evaluate under a processing base directory\n  \
                  forecast-learning evaluate --base-dir ./run\n\n  \
                  # One request against a model directory\n  \
                  echo '0.1,0.2,...' | forecast-learning invoke --model-dir ./run/model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Suppress progress output (only show warnings and errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the regressor on train.csv
    Train(TrainArgs),
    /// Score the packaged model on test.csv and write evaluation.json
    Evaluate(EvaluateArgs),
    /// Predict every row of data_to_predict.csv
    Predict(PredictArgs),
    /// Run the serving handlers on one request body
    Invoke(InvokeArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Directory receiving model.json and model.zip
    #[arg(long, env = "SM_MODEL_DIR")]
    model_dir: PathBuf,

    /// Train channel directory (or the train.csv file itself)
    #[arg(long, env = "SM_CHANNEL_TRAIN")]
    train: PathBuf,

    /// Directory receiving the training summary
    #[arg(long, env = "SM_OUTPUT_DATA_DIR")]
    output_data_dir: Option<PathBuf>,

    /// L2 regularization strength
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    alpha: f64,

    /// Number of trailing label columns
    #[arg(long, default_value_t = DEFAULT_LABEL_COUNT)]
    label_count: usize,

    /// Fit without an intercept
    #[arg(long)]
    no_intercept: bool,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// Processing base directory holding model/ and test/
    #[arg(long, default_value = DEFAULT_BASE_DIR)]
    base_dir: PathBuf,

    /// Number of trailing label columns
    #[arg(long, default_value_t = DEFAULT_LABEL_COUNT)]
    label_count: usize,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Processing base directory holding model/ and transform/
    #[arg(long, default_value = DEFAULT_BASE_DIR)]
    base_dir: PathBuf,
}

#[derive(Args, Debug)]
struct InvokeArgs {
    /// Model directory (model.json or model.zip, optional transformer.json)
    #[arg(long, env = "SM_MODEL_DIR")]
    model_dir: PathBuf,

    /// Request body file; stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// Request content type
    #[arg(long, default_value = CONTENT_TYPE_CSV)]
    content_type: String,

    /// Accepted response content type
    #[arg(long, default_value = CONTENT_TYPE_CSV)]
    accept: String,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout carries only
/// the JSON document.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.quiet, cli.json);
    dotenv().ok();

    match cli.command {
        Command::Train(args) => train(args, cli.json),
        Command::Evaluate(args) => evaluate(args, cli.json),
        Command::Predict(args) => predict(args, cli.json),
        Command::Invoke(args) => invoke(args),
    }
}

fn train(args: TrainArgs, json: bool) -> Result<()> {
    info!("Starting training job");
    let config = TrainingConfig::builder()
        .alpha(args.alpha)
        .label_count(args.label_count)
        .fit_intercept(!args.no_intercept)
        .build()?;

    let outputs = Trainer::new(config).run(
        &args.train,
        &args.model_dir,
        args.output_data_dir.as_deref(),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        let summary = &outputs.summary;
        println!("\n{}", "=".repeat(60));
        println!("TRAINING COMPLETE");
        println!("{}", "=".repeat(60));
        println!("  Rows:      {}", summary.rows);
        println!("  Features:  {}", summary.features);
        println!("  Outputs:   {}", summary.outputs);
        println!("  Alpha:     {}", summary.alpha);
        println!("  Train MSE: {:.4}", summary.train_mse);
        println!("  Model:     {}", outputs.model_archive.display());
    }
    Ok(())
}

fn evaluate(args: EvaluateArgs, json: bool) -> Result<()> {
    let outcome = Evaluation::from_base_dir(&args.base_dir, args.label_count).run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        let metrics = &outcome.report.regression_metrics;
        println!("\n{}", "=".repeat(60));
        println!("EVALUATION COMPLETE");
        println!("{}", "=".repeat(60));
        println!("  Test rows: {}", outcome.test_rows);
        println!(
            "  MSE:       {:.4} (std {:.4})",
            metrics.mse.value,
            metrics.mse.standard_deviation.unwrap_or_default()
        );
        println!("  RMSE:      {:.4}", metrics.rmse.value);
        println!("  MAE:       {:.4}", metrics.mae.value);
        println!("  R2:        {:.4}", metrics.r2.value);
        println!("  Report:    {}", outcome.report_path.display());
    }
    Ok(())
}

fn predict(args: PredictArgs, json: bool) -> Result<()> {
    let outcome = BatchPrediction::from_base_dir(&args.base_dir).run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "Wrote {} prediction row(s) to {}",
            outcome.rows,
            outcome.predictions_path.display()
        );
    }
    Ok(())
}

fn invoke(args: InvokeArgs) -> Result<()> {
    let body = match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading request {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let pipeline = model_fn(&args.model_dir)?;
    let (response, content_type) = pipeline.invoke(&body, &args.content_type, &args.accept)?;
    info!("Responding with {}", content_type);
    println!("{response}");
    Ok(())
}
