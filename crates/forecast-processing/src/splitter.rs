//! Train / test split of the training partition.
//!
//! The default strategy is chronological per entity: each site contributes
//! its most recent rows to the test set, so evaluation always looks forward
//! in time and every site is represented on both sides.

use crate::config::{FeatureConfig, SplitStrategy};
use crate::error::Result;
use crate::features::GroupIndex;
use crate::utils::take_rows;
use polars::prelude::*;
use rand::prelude::*;
use tracing::{debug, info};

/// Output of [`DataSplitter::split`].
#[derive(Debug, Clone)]
pub struct SplitResult {
    pub train: DataFrame,
    pub test: DataFrame,
    /// Only produced by [`SplitStrategy::Shuffled`].
    pub validation: Option<DataFrame>,
}

/// Per-site data splitter.
pub struct DataSplitter<'a> {
    config: &'a FeatureConfig,
}

impl<'a> DataSplitter<'a> {
    pub fn new(config: &'a FeatureConfig) -> Self {
        Self { config }
    }

    pub fn split(&self, df: &DataFrame) -> Result<SplitResult> {
        let result = match self.config.split {
            SplitStrategy::Chronological { test_fraction } => {
                self.split_chronological(df, test_fraction)?
            }
            SplitStrategy::Shuffled {
                train_fraction,
                validation_fraction,
                seed,
            } => split_shuffled(df, train_fraction, validation_fraction, seed)?,
        };

        info!(
            "Split {} rows: train={}, test={}, validation={}",
            df.height(),
            result.train.height(),
            result.test.height(),
            result.validation.as_ref().map_or(0, |v| v.height())
        );
        Ok(result)
    }

    /// Last `floor(n * test_fraction)` rows of every entity go to test.
    fn split_chronological(&self, df: &DataFrame, test_fraction: f64) -> Result<SplitResult> {
        let index = GroupIndex::build(df, self.config)?;

        let mut train_rows = Vec::with_capacity(df.height());
        let mut test_rows = Vec::new();
        for group in index.groups() {
            let n = group.rows.len();
            let n_test = if n < 2 {
                0
            } else {
                ((n as f64 * test_fraction).floor() as usize).min(n - 1)
            };
            let cut = n - n_test;
            debug!("Entity {}: {} train, {} test", group.key, cut, n_test);

            train_rows.extend_from_slice(&group.rows[..cut]);
            test_rows.extend_from_slice(&group.rows[cut..]);
        }

        Ok(SplitResult {
            train: take_rows(df, &train_rows)?,
            test: take_rows(df, &test_rows)?,
            validation: None,
        })
    }
}

/// Seeded shuffle cut into train / validation / test.
fn split_shuffled(
    df: &DataFrame,
    train_fraction: f64,
    validation_fraction: f64,
    seed: u64,
) -> Result<SplitResult> {
    let n = df.height();
    let mut rows: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);

    let train_end = (n as f64 * train_fraction).floor() as usize;
    let validation_end = ((n as f64 * (train_fraction + validation_fraction)).floor() as usize).min(n);

    Ok(SplitResult {
        train: take_rows(df, &rows[..train_end])?,
        validation: Some(take_rows(df, &rows[train_end..validation_end])?),
        test: take_rows(df, &rows[validation_end..])?,
    })
}
