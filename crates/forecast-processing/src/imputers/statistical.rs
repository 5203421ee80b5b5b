//! Statistical imputation methods.
//!
//! Provides the median and constant fills used by the column transformer.

/// Statistical imputation methods for filling missing values.
pub struct StatisticalImputer;

impl StatisticalImputer {
    /// Median of the non-null, non-NaN values.
    ///
    /// For an even count the two middle values are averaged.
    pub fn median(values: &[Option<f64>]) -> Option<f64> {
        let mut present: Vec<f64> = values
            .iter()
            .flatten()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        if present.is_empty() {
            return None;
        }
        present.sort_by(|a, b| a.total_cmp(b));

        let mid = present.len() / 2;
        if present.len() % 2 == 0 {
            Some((present[mid - 1] + present[mid]) / 2.0)
        } else {
            Some(present[mid])
        }
    }

    /// Replace missing (null or NaN) numeric values with `fill_value`.
    pub fn fill_numeric(values: &[Option<f64>], fill_value: f64) -> Vec<f64> {
        values
            .iter()
            .map(|v| match v {
                Some(x) if !x.is_nan() => *x,
                _ => fill_value,
            })
            .collect()
    }

    /// Replace missing categorical values with `fill_value`.
    pub fn fill_categorical(values: &[Option<String>], fill_value: &str) -> Vec<String> {
        values
            .iter()
            .map(|v| v.clone().unwrap_or_else(|| fill_value.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(
            StatisticalImputer::median(&[Some(3.0), None, Some(1.0), Some(2.0)]),
            Some(2.0)
        );
        assert_eq!(
            StatisticalImputer::median(&[Some(4.0), Some(1.0), Some(2.0), Some(3.0)]),
            Some(2.5)
        );
    }

    #[test]
    fn test_median_ignores_nan_and_handles_all_missing() {
        assert_eq!(
            StatisticalImputer::median(&[Some(f64::NAN), Some(5.0)]),
            Some(5.0)
        );
        assert_eq!(StatisticalImputer::median(&[None, None]), None);
    }

    #[test]
    fn test_fill_numeric_replaces_nan_and_null() {
        assert_eq!(
            StatisticalImputer::fill_numeric(&[Some(1.0), None, Some(f64::NAN)], 9.0),
            vec![1.0, 9.0, 9.0]
        );
    }

    #[test]
    fn test_fill_categorical() {
        let values = vec![Some("M".to_string()), None];
        assert_eq!(
            StatisticalImputer::fill_categorical(&values, "missing"),
            vec!["M", "missing"]
        );
    }
}
