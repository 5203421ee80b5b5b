//! Feature engineering for daily occupancy forecasting.
//!
//! Raw per-site extracts are fetched through an [`ObjectStore`], stacked,
//! re-indexed onto a daily calendar and turned into a supervised table:
//! lagged values of the target as features, the next `horizon` days as
//! labels. The result is split per site, transformed, and written as
//! headerless CSV tables with the labels in the last columns.
//!
//! # Overview
//!
//! - **Data building**: manifest parsing and object fetching ([`builder`])
//! - **Imputation**: per-entity forward fill on a daily calendar ([`imputers`])
//! - **Features**: lags, multistep targets, cyclic calendar encodings and
//!   fitted column transforms ([`features`])
//! - **Splitting**: per-site chronological or seeded shuffled split ([`splitter`])
//! - **Artifacts**: `model.zip` packaging with guarded extraction ([`artifacts`])
//! - **Progress Reporting**: stage updates with cancellation support
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forecast_processing::{DataManifest, FeatureConfig, LocalObjectStore, Preprocessor};
//! use std::sync::Arc;
//!
//! let manifest = DataManifest::from_json(&std::fs::read_to_string("manifest.json")?)?;
//! let store = Arc::new(LocalObjectStore::new("/data/buckets"));
//!
//! let outputs = Preprocessor::builder()
//!     .config(FeatureConfig::builder().horizon(14).base_dir("/tmp/run").build()?)
//!     .build()?
//!     .run(manifest, store)?;
//!
//! println!("{} training rows", outputs.summary.train_rows);
//! ```

pub mod artifacts;
pub mod builder;
pub mod config;
pub mod error;
pub mod features;
pub mod imputers;
pub mod pipeline;
pub mod splitter;
pub mod types;
pub mod utils;

// Re-exports for convenient access
#[cfg(feature = "http")]
pub use builder::HttpObjectStore;
pub use builder::{
    DataBuilder, DataManifest, DataSource, LocalObjectStore, MemoryObjectStore, ObjectStore,
    parse_s3_uri, read_raw_csv,
};
pub use config::{ConfigValidationError, FeatureConfig, FeatureConfigBuilder, SplitStrategy};
pub use error::{ProcessingError, Result as ProcessingResult, ResultExt};
pub use features::{ColumnTransformer, FittedColumnTransformer};
pub use imputers::{ForwardFillImputer, StatisticalImputer};
pub use pipeline::{
    CancellationToken, ClosureProgressReporter, PreprocessingStage, Preprocessor,
    PreprocessorBuilder, ProgressReporter, ProgressUpdate,
};
pub use splitter::{DataSplitter, SplitResult};
pub use types::{PreprocessOutputs, ProcessingSummary};
