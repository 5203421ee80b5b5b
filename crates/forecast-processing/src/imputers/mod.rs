//! Imputation module for handling missing values.
//!
//! This module provides:
//! - Per-entity forward fill on a daily calendar
//! - Statistical imputation (median, constant)

mod forward_fill;
mod statistical;

pub use forward_fill::ForwardFillImputer;
pub use statistical::StatisticalImputer;
