//! Time-series feature engineering.
//!
//! - [`grouping`] - per-entity row index used by every shift
//! - [`lags`] - lag features and multistep targets
//! - [`calendar`] - weekday/month derivation and cyclic encoding
//! - [`transform`] - fitted numeric/categorical column transforms
//! - [`partition`] - train/predict partition by date

pub mod calendar;
pub mod grouping;
pub mod lags;
pub mod partition;
pub mod transform;

pub use calendar::{
    add_calendar_columns, cyclic_column_names, cyclic_encode_month, cyclic_encode_weekday,
};
pub use grouping::{Group, GroupIndex};
pub use lags::{add_lagged_features, add_multistep_target};
pub use partition::{DatePartition, partition_by_date};
pub use transform::{ColumnKind, ColumnSpec, ColumnTransformer, FittedColumnTransformer};
