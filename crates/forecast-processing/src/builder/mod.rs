//! Raw data assembly.
//!
//! The [`DataBuilder`] resolves every entry of a [`DataManifest`] through an
//! [`ObjectStore`], parses each extract with the raw schema from
//! [`FeatureConfig`] and concatenates them into one table.

mod store;

pub use store::{LocalObjectStore, MemoryObjectStore, ObjectStore, parse_s3_uri};
#[cfg(feature = "http")]
pub use store::HttpObjectStore;

use crate::config::FeatureConfig;
use crate::error::{ProcessingError, Result, ResultExt};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One source location in a data manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub bucket_name: String,
    pub object_key: String,
}

/// List of raw extracts making up one pipeline run.
///
/// Serialized as `{"data": [{"bucketName": "...", "objectKey": "..."}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataManifest {
    #[serde(default)]
    pub data: Vec<DataSource>,
}

impl DataManifest {
    /// Parse a manifest from its JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ProcessingError::InvalidManifest(e.to_string()))
    }

    /// Build a manifest from `s3://bucket/key` URIs.
    pub fn from_uris<'a>(uris: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let data = uris
            .into_iter()
            .map(|uri| {
                parse_s3_uri(uri)
                    .map(|(bucket_name, object_key)| DataSource {
                        bucket_name,
                        object_key,
                    })
                    .ok_or_else(|| ProcessingError::InvalidManifest(format!("not an s3 uri: {uri}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Downloads the extracts listed in a manifest and stacks them.
pub struct DataBuilder {
    base_dir: PathBuf,
    manifest: DataManifest,
    store: Arc<dyn ObjectStore>,
    config: FeatureConfig,
}

impl DataBuilder {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        manifest: DataManifest,
        store: Arc<dyn ObjectStore>,
        config: FeatureConfig,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            manifest,
            store,
            config,
        }
    }

    pub fn data_manifest(&self) -> &DataManifest {
        &self.manifest
    }

    /// Download and concatenate every extract.
    ///
    /// Returns `Ok(None)` when the manifest lists no sources.
    pub fn build(&self) -> Result<Option<DataFrame>> {
        info!(
            "Loading data from data manifest with {} source(s)",
            self.manifest.len()
        );

        let mut combined: Option<DataFrame> = None;
        for (index, source) in self.manifest.data.iter().enumerate() {
            let df = self
                .download_file(index, source)
                .context(format!("Loading {}/{}", source.bucket_name, source.object_key))?;

            combined = match combined {
                None => Some(df),
                Some(mut acc) => {
                    acc.vstack_mut(&df)?;
                    Some(acc)
                }
            };
        }

        if combined.is_none() {
            warn!("Data manifest is empty, nothing to build");
        }
        Ok(combined)
    }

    fn download_file(&self, index: usize, source: &DataSource) -> Result<DataFrame> {
        let data_dir = self.base_dir.join("data");
        std::fs::create_dir_all(&data_dir)?;

        info!(
            "Downloading data from bucket: {}, key: {}",
            source.bucket_name, source.object_key
        );
        let bytes = self.store.fetch(&source.bucket_name, &source.object_key)?;
        let path = data_dir.join(format!("{index}.csv"));
        std::fs::write(&path, &bytes)?;

        debug!("Reading raw input data from {}", path.display());
        let parsed = read_raw_csv(&bytes, &self.config);
        std::fs::remove_file(&path)?;
        parsed
    }
}

/// Parse one raw extract into the canonical raw layout.
///
/// Every column is read as text first; feature columns are then cast to
/// `Float64` so that extracts with differently inferred types still stack.
pub fn read_raw_csv(bytes: &[u8], config: &FeatureConfig) -> Result<DataFrame> {
    let raw_columns = config.raw_columns();

    let mut df = CsvReadOptions::default()
        .with_has_header(config.has_header)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
        .finish()?;

    if config.has_header {
        for column in &raw_columns {
            if df.column(column).is_err() {
                return Err(ProcessingError::ColumnNotFound(column.clone()));
            }
        }
        df = df.select(raw_columns.iter().map(String::as_str))?;
    } else {
        if df.width() != raw_columns.len() {
            return Err(ProcessingError::InvalidConfig(format!(
                "extract has {} columns, expected {} ({})",
                df.width(),
                raw_columns.len(),
                raw_columns.join(", ")
            )));
        }
        df.set_column_names(raw_columns.iter().map(String::as_str))?;
    }

    for column in &config.feature_columns {
        // Empty cells are already null; anything else must parse.
        let casted = df
            .column(column)?
            .as_materialized_series()
            .strict_cast(&DataType::Float64)
            .map_err(|e| ProcessingError::TypeConversionFailed {
                column: column.clone(),
                target_type: "Float64".to_string(),
                reason: e.to_string(),
            })?;
        df.replace(column, casted)?;
    }

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::numeric_values;

    const EXTRACT_A: &str = "Date,location_id,location_parking_type_id,occupancy,capacity\n\
                             2024-01-01,1,10,5,20\n\
                             2024-01-02,1,10,6,20\n";
    const EXTRACT_B: &str = "location_id,Date,location_parking_type_id,capacity,occupancy\n\
                             2,2024-01-01,11,30,7\n";

    fn store_with(objects: &[(&str, &str)]) -> Arc<dyn ObjectStore> {
        let store = MemoryObjectStore::new();
        for (key, body) in objects {
            store.put("raw", *key, *body);
        }
        Arc::new(store)
    }

    #[test]
    fn test_manifest_from_json() {
        let manifest = DataManifest::from_json(
            r#"{"data": [{"bucketName": "raw", "objectKey": "a.csv"}], "extra": 1}"#,
        )
        .unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.data[0].bucket_name, "raw");
        assert_eq!(manifest.data[0].object_key, "a.csv");
    }

    #[test]
    fn test_manifest_invalid_json() {
        let err = DataManifest::from_json("{not json").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_MANIFEST");
    }

    #[test]
    fn test_manifest_from_uris() {
        let manifest = DataManifest::from_uris(["s3://raw/a.csv", "s3://raw/b/c.csv"]).unwrap();
        assert_eq!(manifest.data[1].object_key, "b/c.csv");
        assert!(DataManifest::from_uris(["/local/file.csv"]).is_err());
    }

    #[test]
    fn test_build_concatenates_and_reorders_columns() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = DataManifest::from_uris(["s3://raw/a.csv", "s3://raw/b.csv"]).unwrap();
        let store = store_with(&[("a.csv", EXTRACT_A), ("b.csv", EXTRACT_B)]);

        let df = DataBuilder::new(dir.path(), manifest, store, FeatureConfig::default())
            .build()
            .unwrap()
            .expect("two extracts");

        assert_eq!(df.height(), 3);
        assert_eq!(
            df.get_column_names_str(),
            vec!["Date", "location_id", "location_parking_type_id", "occupancy", "capacity"]
        );
        assert_eq!(
            numeric_values(&df, "occupancy").unwrap(),
            vec![Some(5.0), Some(6.0), Some(7.0)]
        );
        // temp downloads are removed again
        assert_eq!(std::fs::read_dir(dir.path().join("data")).unwrap().count(), 0);
    }

    #[test]
    fn test_build_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let built = DataBuilder::new(
            dir.path(),
            DataManifest::default(),
            store_with(&[]),
            FeatureConfig::default(),
        )
        .build()
        .unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn test_build_missing_object_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = DataManifest::from_uris(["s3://raw/missing.csv"]).unwrap();
        let err = DataBuilder::new(dir.path(), manifest, store_with(&[]), FeatureConfig::default())
            .build()
            .unwrap_err();
        assert_eq!(err.error_code(), "FETCH_FAILED");
    }

    #[test]
    fn test_read_headerless_extract() {
        let config = FeatureConfig::builder().has_header(false).build().unwrap();
        let df = read_raw_csv(b"2024-01-01,1,10,5,20\n2024-01-02,1,10,,20\n", &config).unwrap();
        assert_eq!(df.width(), 5);
        assert_eq!(
            numeric_values(&df, "occupancy").unwrap(),
            vec![Some(5.0), None]
        );
    }

    #[test]
    fn test_read_extract_missing_column() {
        let err = read_raw_csv(b"Date,location_id\n2024-01-01,1\n", &FeatureConfig::default())
            .unwrap_err();
        assert!(matches!(err, ProcessingError::ColumnNotFound(_)));
    }

    #[test]
    fn test_read_extract_rejects_non_numeric_feature() {
        let err = read_raw_csv(
            b"Date,location_id,location_parking_type_id,occupancy,capacity\n\
              2024-01-01,1,10,abc,20\n\
              2024-01-02,1,10,6,20\n",
            &FeatureConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "TYPE_CONVERSION_FAILED");
        assert!(matches!(
            err,
            ProcessingError::TypeConversionFailed { ref column, .. } if column == "occupancy"
        ));
    }
}
