//! CLI entry point for the preprocess step.

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::Parser;
use dotenv::dotenv;
use forecast_processing::config::DEFAULT_BASE_DIR;
use forecast_processing::{
    DataManifest, FeatureConfig, LocalObjectStore, ObjectStore, PreprocessOutputs, Preprocessor,
    parse_s3_uri,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(feature = "http")]
use forecast_processing::HttpObjectStore;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Feature engineering for daily occupancy forecasting",
    long_about = "Builds lag features and multistep targets from raw per-site extracts and \
                  writes the train/test tables, the rows to predict and the fitted transformer.\n\n\
                  EXAMPLES:\n  \
                  # Inline manifest, local buckets under ./buckets\n  \
                  forecast-preprocess --data-manifest \"$(cat manifest.json)\" --store-root ./buckets\n\n  \
                  # Manifest file\n  \
                  forecast-preprocess --data-manifest manifest.json --store-root ./buckets --base-dir ./run\n\n  \
                  # Manifest itself stored in a bucket, fetched over HTTP\n  \
                  forecast-preprocess --data-manifest s3://config/manifest.json --endpoint http://minio:9000"
)]
struct Args {
    /// Manifest JSON text ({"data": [...]}), a local JSON file, or an s3://bucket/key URI
    #[arg(long, env = "DATA_MANIFEST")]
    data_manifest: String,

    /// Base directory for downloads and outputs
    #[arg(long, default_value = DEFAULT_BASE_DIR)]
    base_dir: PathBuf,

    /// Root directory holding one sub-directory per bucket
    #[arg(long, conflicts_with = "endpoint")]
    store_root: Option<PathBuf>,

    /// HTTP endpoint serving objects at {endpoint}/{bucket}/{key}
    #[arg(long, env = "OBJECT_STORE_ENDPOINT")]
    endpoint: Option<String>,

    /// Feature configuration as a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Date whose rows are predicted (YYYY-MM-DD); defaults to the latest date
    #[arg(long)]
    predict_date: Option<NaiveDate>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings and errors)
    #[arg(short, long)]
    quiet: bool,

    /// Print the outputs as JSON on stdout instead of a summary
    #[arg(long)]
    json: bool,
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
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);
    dotenv().ok();

    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<FeatureConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => FeatureConfig::default(),
    };
    if let Some(date) = args.predict_date {
        config.predict_date = Some(date);
    }

    let store = build_store(&args)?;
    let manifest = load_manifest(&args.data_manifest, store.as_ref())?;
    info!("Data manifest lists {} source(s)", manifest.len());

    let quiet = args.quiet || args.json;
    let preprocessor = Preprocessor::builder()
        .config(config)
        .base_dir(&args.base_dir)
        .on_progress(move |update| {
            if !quiet {
                debug!(
                    "[{:>3.0}%] {}: {}",
                    update.progress * 100.0,
                    update.stage.display_name(),
                    update.message
                );
            }
        })
        .build()?;

    let outputs = preprocessor.run(manifest, store)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        print_summary(&outputs);
    }
    Ok(())
}

fn build_store(args: &Args) -> Result<Arc<dyn ObjectStore>> {
    if let Some(root) = &args.store_root {
        return Ok(Arc::new(LocalObjectStore::new(root)));
    }

    match &args.endpoint {
        #[cfg(feature = "http")]
        Some(endpoint) => Ok(Arc::new(HttpObjectStore::new(endpoint.clone())?)),
        #[cfg(not(feature = "http"))]
        Some(_) => bail!("HTTP object store support not compiled in; rebuild with --features http"),
        None => {
            warn!("No --store-root or --endpoint given, resolving buckets under the current directory");
            Ok(Arc::new(LocalObjectStore::new(".")))
        }
    }
}

fn load_manifest(location: &str, store: &dyn ObjectStore) -> Result<DataManifest> {
    if location.trim_start().starts_with('{') {
        return Ok(DataManifest::from_json(location)?);
    }

    let text = if location.starts_with("s3://") {
        let (bucket, key) =
            parse_s3_uri(location).ok_or_else(|| anyhow!("Invalid manifest URI: {location}"))?;
        let bytes = store.fetch(&bucket, &key)?;
        String::from_utf8(bytes).context("manifest is not UTF-8")?
    } else {
        let path = std::path::Path::new(location);
        if !path.exists() {
            bail!("Manifest file not found: {location}");
        }
        std::fs::read_to_string(path)?
    };
    Ok(DataManifest::from_json(&text)?)
}

/// Note: `println!` is intentional; this is the user-facing result.
fn print_summary(outputs: &PreprocessOutputs) {
    let summary = &outputs.summary;
    println!("\n{}", "=".repeat(60));
    println!("PREPROCESSING COMPLETE");
    println!("{}", "=".repeat(60));
    println!("  Raw rows:        {}", summary.raw_rows);
    println!("  Daily rows:      {} ({} entities)", summary.imputed_rows, summary.entities);
    if let Some(date) = summary.predict_date {
        println!("  Predict date:    {}", date);
    }
    println!("  Train / test:    {} / {}", summary.train_rows, summary.test_rows);
    if summary.validation_rows > 0 {
        println!("  Validation:      {}", summary.validation_rows);
    }
    println!("  Rows to predict: {}", summary.predict_rows);
    println!(
        "  Features:        {} (+{} labels)",
        summary.feature_count, summary.label_count
    );
    println!("  Duration:        {} ms", summary.duration_ms);
    println!();
    println!("  train:       {}", outputs.train.display());
    println!("  test:        {}", outputs.test.display());
    if let Some(validation) = &outputs.validation {
        println!("  validation:  {}", validation.display());
    }
    println!("  to predict:  {}", outputs.data_to_predict.display());
    println!("  transformer: {}", outputs.transformer_archive.display());
    for warning in &summary.warnings {
        println!("  WARNING: {}", warning);
    }
}
