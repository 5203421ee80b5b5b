//! Row grouping by entity, ordered by date.
//!
//! Every per-entity operation (forward fill, lags, multistep targets, the
//! chronological split) goes through a [`GroupIndex`] so that shifts are
//! positional within one entity and never cross into another.

use crate::config::FeatureConfig;
use crate::error::Result;
use crate::utils::{date_values, entity_key, string_values};
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Rows of one entity, sorted by date (ties keep input order).
#[derive(Debug, Clone)]
pub struct Group {
    pub key: String,
    pub rows: Vec<usize>,
}

/// All entities of a frame, in natural key order.
#[derive(Debug, Clone)]
pub struct GroupIndex {
    groups: Vec<Group>,
    n_rows: usize,
}

impl GroupIndex {
    /// Index a frame by the configured group columns and date column.
    pub fn build(df: &DataFrame, config: &FeatureConfig) -> Result<Self> {
        let dates = date_values(df, &config.date_column, &config.date_format)?;
        let group_values = config
            .group_columns
            .iter()
            .map(|name| string_values(df, name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_parts(&group_values, &dates))
    }

    /// Index from already extracted group columns and dates.
    pub fn from_parts(group_values: &[Vec<Option<String>>], dates: &[NaiveDate]) -> Self {
        let n_rows = dates.len();
        let mut positions: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        let mut parts: Vec<Vec<Option<String>>> = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();

        for row in 0..n_rows {
            let key: Vec<Option<String>> = group_values.iter().map(|col| col[row].clone()).collect();
            let slot = *positions.entry(key.clone()).or_insert_with(|| {
                parts.push(key);
                members.push(Vec::new());
                members.len() - 1
            });
            members[slot].push(row);
        }

        let mut groups: Vec<(Vec<Option<String>>, Vec<usize>)> =
            parts.into_iter().zip(members).collect();
        groups.sort_by(|(a, _), (b, _)| compare_key_parts(a, b));

        let groups = groups
            .into_iter()
            .map(|(parts, mut rows)| {
                rows.sort_by_key(|row| dates[*row]);
                Group {
                    key: entity_key(&parts),
                    rows,
                }
            })
            .collect();

        Self { groups, n_rows }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Shift values within each entity.
    ///
    /// A positive `offset` looks back (`result[t] = values[t - offset]`), a
    /// negative one looks ahead. Positions without a partner in the same
    /// entity are `None`. The result is aligned with the input rows.
    pub fn shift(&self, values: &[Option<f64>], offset: isize) -> Vec<Option<f64>> {
        let mut shifted = vec![None; self.n_rows];
        for group in &self.groups {
            let len = group.rows.len() as isize;
            for (pos, &row) in group.rows.iter().enumerate() {
                let source = pos as isize - offset;
                if (0..len).contains(&source) {
                    shifted[row] = values[group.rows[source as usize]];
                }
            }
        }
        shifted
    }

    /// Row indices ordered by entity then date.
    pub fn ordered_rows(&self) -> Vec<usize> {
        self.groups.iter().flat_map(|g| g.rows.iter().copied()).collect()
    }
}

fn compare_key_parts(a: &[Option<String>], b: &[Option<String>]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        let ordering = match (left, right) {
            (Some(l), Some(r)) => natural_cmp(l, r),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

/// Compare numerically when both sides parse as numbers, textually otherwise.
///
/// Numbers sort before text so "2" < "10" < "a".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn sample() -> GroupIndex {
        // rows: 0=(b,d2) 1=(a,d2) 2=(b,d1) 3=(a,d1) 4=(10,d1) 5=(2,d1)
        let keys = vec![
            ["b", "a", "b", "a", "10", "2"]
                .iter()
                .map(|k| Some(k.to_string()))
                .collect::<Vec<_>>(),
        ];
        let dates = vec![day(2), day(2), day(1), day(1), day(1), day(1)];
        GroupIndex::from_parts(&keys, &dates)
    }

    #[test]
    fn test_groups_sorted_naturally_rows_by_date() {
        let index = sample();
        let keys: Vec<&str> = index.groups().iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["2", "10", "a", "b"]);
        assert_eq!(index.groups()[2].rows, vec![3, 1]);
        assert_eq!(index.groups()[3].rows, vec![2, 0]);
        assert_eq!(index.ordered_rows(), vec![5, 4, 3, 1, 2, 0]);
    }

    #[test]
    fn test_shift_stays_within_group() {
        let index = sample();
        let values = vec![Some(20.0), Some(2.0), Some(10.0), Some(1.0), Some(5.0), Some(6.0)];

        let lagged = index.shift(&values, 1);
        assert_eq!(lagged, vec![Some(10.0), Some(1.0), None, None, None, None]);

        let ahead = index.shift(&values, -1);
        assert_eq!(ahead, vec![None, None, Some(20.0), Some(2.0), None, None]);
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("2", "10"), Ordering::Less);
        assert_eq!(natural_cmp("10", "a"), Ordering::Less);
        assert_eq!(natural_cmp("b", "a"), Ordering::Greater);
    }
}
