//! CLI entry point: print the pipeline definition, run it, or list models.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use forecast_workflow::{
    ExecutionStatus, StepEvent, StepStatus, WorkflowConfig, WorkflowExecutor, get_pipeline,
};
use forecast_workflow::registry::ModelRegistry;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Occupancy forecasting pipeline: definition, local runs and model registry",
    long_about = "Renders the preprocess / train / evaluate / register pipeline and runs it \
                  locally. A model is registered only when its evaluation MSE passes the \
                  configured threshold.\n\n\
                  EXAMPLES:\n  \
                  # Print the pipeline definition\n  \
                  forecast-workflow definition --config workflow.json\n\n  \
                  # Run the pipeline against a local bucket directory\n  \
                  forecast-workflow run --data-manifest dataManifest.json --store-root ./buckets\n\n  \
                  # List registered model packages\n  \
                  forecast-workflow models"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Workflow configuration file (JSON); defaults apply when omitted
    #[arg(short, long, env = "WORKFLOW_CONFIG", global = true)]
    config: Option<PathBuf>,

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
    /// Print the pipeline definition as JSON
    Definition,
    /// Execute the pipeline locally
    Run(RunArgs),
    /// List the packages of the model package group
    Models,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory receiving one run directory per execution
    #[arg(long)]
    artifact_root: Option<PathBuf>,

    /// Data manifest read by the preprocess step
    #[arg(long)]
    data_manifest: Option<PathBuf>,

    /// Directory holding one sub-directory per bucket
    #[arg(long)]
    store_root: Option<PathBuf>,

    /// Override the registration MSE threshold
    #[arg(long)]
    mse_threshold: Option<f64>,
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

fn load_config(path: Option<&PathBuf>) -> Result<WorkflowConfig> {
    match path {
        Some(path) => WorkflowConfig::from_file(path)
            .with_context(|| format!("loading workflow configuration {}", path.display())),
        None => Ok(WorkflowConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.quiet, cli.json);
    dotenv().ok();

    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Definition => {
            println!("{}", get_pipeline(&config).to_json()?);
            Ok(())
        }
        Command::Run(args) => run(config, args, cli.json),
        Command::Models => models(&config, cli.json),
    }
}

fn run(mut config: WorkflowConfig, args: RunArgs, json: bool) -> Result<()> {
    if let Some(root) = args.artifact_root {
        config.artifact_root = root;
    }
    if let Some(manifest) = args.data_manifest {
        config.data_manifest = manifest;
    }
    if args.store_root.is_some() {
        config.store_root = args.store_root;
    }
    if let Some(threshold) = args.mse_threshold {
        config.mse_threshold = threshold;
    }
    config.validate()?;

    let definition = get_pipeline(&config);
    info!("Running pipeline {}", definition.name);

    let executor = WorkflowExecutor::from_config(&config)
        .on_event(|event| {
            if let StepEvent::Finished(record) = event {
                if record.status == StepStatus::Failed {
                    warn!(
                        "{} failed: {}",
                        record.name,
                        record.message.unwrap_or_default()
                    );
                }
            }
        })
        .build()?;
    let record = executor.run(&definition)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("\n{}", "=".repeat(60));
        println!("PIPELINE {:?}", record.status);
        println!("{}", "=".repeat(60));
        for step in &record.steps {
            println!(
                "  {:<20} {:<10} {:>6} ms  {}",
                step.name,
                format!("{:?}", step.status),
                step.duration_ms,
                step.message.as_deref().unwrap_or("")
            );
        }
        if let Some(package) = &record.registered_model {
            println!(
                "\n  Registered {} version {} ({})",
                package.group, package.version, package.approval_status
            );
        }
        println!("  Run directory: {}", record.run_dir.display());
    }

    if record.status != ExecutionStatus::Succeeded {
        anyhow::bail!("pipeline execution {:?}", record.status);
    }
    Ok(())
}

fn models(config: &WorkflowConfig, json: bool) -> Result<()> {
    let registry = ModelRegistry::new(&config.registry_root);
    let packages = registry.list(&config.model_package_group_name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&packages)?);
    } else if packages.is_empty() {
        println!("No packages in {}", config.model_package_group_name);
    } else {
        for package in &packages {
            println!(
                "  {} v{:<4} {:<22} {}",
                package.group,
                package.version,
                package.approval_status.to_string(),
                package.created_at.to_rfc3339()
            );
        }
    }
    Ok(())
}
