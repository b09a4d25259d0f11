//! Zarr-backed block store on the local filesystem.
//!
//! Layout of a dataset directory:
//!
//! - `/grid`: Float32 `[hours, rows, cols]`, fill value NaN, chunked by
//!   hours. Dataset attributes live in this array's attributes.
//! - `/provenance`: Float32 `[hours, 4]` holding min, max, mean and median.
//!   Its attributes carry the per-hour `time`, `source` and `processed`
//!   strings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::config::{StorageConfig, ZarrCompression};
use crate::error::{GridStoreError, Result};
use crate::provenance::ProvenanceRecord;
use crate::time::parse_hour;
use crate::types::Dimensions;

use super::{check_bounds, Attributes, BlockStore};

/// Path of the grid array inside the store.
pub const GRID_ARRAY: &str = "/grid";

/// Path of the provenance array inside the store.
pub const PROVENANCE_ARRAY: &str = "/provenance";

const STAT_COLUMNS: usize = 4;

/// A [`BlockStore`] persisted as two Zarr v3 arrays.
pub struct ZarrBlockStore {
    path: PathBuf,
    dims: Dimensions,
    grid: Array<FilesystemStore>,
    provenance: Array<FilesystemStore>,
}

impl std::fmt::Debug for ZarrBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrBlockStore")
            .field("path", &self.path)
            .field("dims", &self.dims)
            .finish()
    }
}

impl ZarrBlockStore {
    /// Allocate a new dataset at `path`.
    ///
    /// Every grid value starts as NaN and every provenance string is empty.
    pub fn create(path: impl AsRef<Path>, dims: Dimensions, storage: &StorageConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if dims.hours == 0 || dims.rows == 0 || dims.cols == 0 {
            return Err(GridStoreError::config(format!(
                "cannot create a dataset of shape {:?}",
                dims
            )));
        }
        std::fs::create_dir_all(&path)?;

        let store = Arc::new(
            FilesystemStore::new(&path).map_err(|e| GridStoreError::storage(e.to_string()))?,
        );

        let chunk_hours = storage.chunk_hours.clamp(1, dims.hours) as u64;
        let grid_chunks: zarrs::array::ChunkGrid = vec![chunk_hours, dims.rows as u64, dims.cols as u64]
            .try_into()
            .map_err(|e| GridStoreError::config(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            vec![dims.hours as u64, dims.rows as u64, dims.cols as u64],
            DataType::Float32,
            grid_chunks,
            FillValue::from(f32::NAN),
        );
        let mut builder = binding.attributes(Attributes::new());
        if storage.compression != ZarrCompression::None {
            let codec = compression_codec(storage)?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }
        let grid = builder
            .build(store.clone(), GRID_ARRAY)
            .map_err(|e| GridStoreError::storage(e.to_string()))?;
        grid.store_metadata()
            .map_err(|e| GridStoreError::storage(e.to_string()))?;

        let provenance_chunks: zarrs::array::ChunkGrid = vec![chunk_hours, STAT_COLUMNS as u64]
            .try_into()
            .map_err(|e| GridStoreError::config(format!("{:?}", e)))?;
        let blank = Value::Array(vec![Value::String(String::new()); dims.hours]);
        let mut provenance_attrs = Attributes::new();
        provenance_attrs.insert("time".to_string(), blank.clone());
        provenance_attrs.insert("source".to_string(), blank.clone());
        provenance_attrs.insert("processed".to_string(), blank);

        let provenance = ArrayBuilder::new(
            vec![dims.hours as u64, STAT_COLUMNS as u64],
            DataType::Float32,
            provenance_chunks,
            FillValue::from(f32::NAN),
        )
        .attributes(provenance_attrs)
        .build(store, PROVENANCE_ARRAY)
        .map_err(|e| GridStoreError::storage(e.to_string()))?;
        provenance
            .store_metadata()
            .map_err(|e| GridStoreError::storage(e.to_string()))?;

        info!(
            path = %path.display(),
            hours = dims.hours,
            rows = dims.rows,
            cols = dims.cols,
            chunk_hours,
            compression = %storage.compression,
            "Created zarr dataset"
        );

        Ok(Self {
            path,
            dims,
            grid,
            provenance,
        })
    }

    /// Open an existing dataset at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(GridStoreError::storage(format!(
                "no dataset at {}",
                path.display()
            )));
        }

        let store = Arc::new(
            FilesystemStore::new(&path).map_err(|e| GridStoreError::storage(e.to_string()))?,
        );
        let grid = Array::open(store.clone(), GRID_ARRAY)
            .map_err(|e| GridStoreError::storage(format!("failed to open grid array: {}", e)))?;
        let provenance = Array::open(store, PROVENANCE_ARRAY).map_err(|e| {
            GridStoreError::storage(format!("failed to open provenance array: {}", e))
        })?;

        let shape = grid.shape();
        if shape.len() != 3 {
            return Err(GridStoreError::invalid_metadata(format!(
                "grid array must have 3 dimensions, found {}",
                shape.len()
            )));
        }
        let dims = Dimensions::new(shape[0] as usize, shape[1] as usize, shape[2] as usize);

        let provenance_shape = provenance.shape();
        if provenance_shape != [dims.hours as u64, STAT_COLUMNS as u64] {
            return Err(GridStoreError::invalid_metadata(format!(
                "provenance array shape {:?} does not match {} hours",
                provenance_shape, dims.hours
            )));
        }

        debug!(path = %path.display(), ?dims, "Opened zarr dataset");

        Ok(Self {
            path,
            dims,
            grid,
            provenance,
        })
    }

    fn provenance_strings(&self, key: &str) -> Result<Vec<String>> {
        let values = self
            .provenance
            .attributes()
            .get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                GridStoreError::invalid_metadata(format!("provenance attribute '{}' missing", key))
            })?;
        if values.len() != self.dims.hours {
            return Err(GridStoreError::invalid_metadata(format!(
                "provenance attribute '{}' has {} entries, expected {}",
                key,
                values.len(),
                self.dims.hours
            )));
        }
        Ok(values
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect())
    }
}

impl BlockStore for ZarrBlockStore {
    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn read_blocks(&self, offset: usize, count: usize) -> Result<Vec<f32>> {
        check_bounds(offset, count, self.dims.hours)?;
        let subset = ArraySubset::new_with_start_shape(
            vec![offset as u64, 0, 0],
            vec![count as u64, self.dims.rows as u64, self.dims.cols as u64],
        )
        .map_err(|e| GridStoreError::storage(e.to_string()))?;

        self.grid
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| GridStoreError::storage(e.to_string()))
    }

    fn write_blocks(&mut self, offset: usize, values: &[f32]) -> Result<()> {
        let block = self.dims.grid_len();
        if values.len() % block != 0 {
            return Err(GridStoreError::ShapeMismatch {
                expected: format!("a multiple of {} values", block),
                actual: format!("{} values", values.len()),
            });
        }
        let count = values.len() / block;
        check_bounds(offset, count, self.dims.hours)?;

        let subset = ArraySubset::new_with_start_shape(
            vec![offset as u64, 0, 0],
            vec![count as u64, self.dims.rows as u64, self.dims.cols as u64],
        )
        .map_err(|e| GridStoreError::storage(e.to_string()))?;

        self.grid
            .store_array_subset_elements(&subset, values)
            .map_err(|e| GridStoreError::storage(e.to_string()))
    }

    fn load_attributes(&self) -> Result<Attributes> {
        Ok(self.grid.attributes().clone())
    }

    fn save_attributes(&mut self, attributes: &Attributes) -> Result<()> {
        *self.grid.attributes_mut() = attributes.clone();
        self.grid
            .store_metadata()
            .map_err(|e| GridStoreError::storage(e.to_string()))
    }

    fn load_provenance(&self) -> Result<Vec<ProvenanceRecord>> {
        let hours = self.dims.hours;
        let subset = ArraySubset::new_with_start_shape(
            vec![0, 0],
            vec![hours as u64, STAT_COLUMNS as u64],
        )
        .map_err(|e| GridStoreError::storage(e.to_string()))?;
        let stats: Vec<f32> = self
            .provenance
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| GridStoreError::storage(e.to_string()))?;

        let times = self.provenance_strings("time")?;
        let sources = self.provenance_strings("source")?;
        let processed = self.provenance_strings("processed")?;

        let mut records = Vec::with_capacity(hours);
        for (i, row) in stats.chunks_exact(STAT_COLUMNS).enumerate() {
            if times[i].is_empty() {
                return Err(GridStoreError::invalid_metadata(format!(
                    "provenance time missing at offset {}",
                    i
                )));
            }
            records.push(ProvenanceRecord {
                time: parse_hour(&times[i])?,
                min: row[0],
                max: row[1],
                mean: row[2],
                median: row[3],
                source: sources[i].clone(),
                processed: ProvenanceRecord::parse_processed(&processed[i])?,
            });
        }
        Ok(records)
    }

    fn save_provenance(&mut self, offset: usize, records: &[ProvenanceRecord]) -> Result<()> {
        check_bounds(offset, records.len(), self.dims.hours)?;
        if records.is_empty() {
            return Ok(());
        }

        let stats: Vec<f32> = records
            .iter()
            .flat_map(|r| [r.min, r.max, r.mean, r.median])
            .collect();
        let subset = ArraySubset::new_with_start_shape(
            vec![offset as u64, 0],
            vec![records.len() as u64, STAT_COLUMNS as u64],
        )
        .map_err(|e| GridStoreError::storage(e.to_string()))?;
        self.provenance
            .store_array_subset_elements(&subset, &stats)
            .map_err(|e| GridStoreError::storage(e.to_string()))?;

        let mut times = self.provenance_strings("time")?;
        let mut sources = self.provenance_strings("source")?;
        let mut processed = self.provenance_strings("processed")?;
        for (i, record) in records.iter().enumerate() {
            times[offset + i] = crate::time::format_hour(&record.time);
            sources[offset + i] = record.source.clone();
            processed[offset + i] = record.processed_string();
        }

        let attrs = self.provenance.attributes_mut();
        attrs.insert("time".to_string(), serde_json::json!(times));
        attrs.insert("source".to_string(), serde_json::json!(sources));
        attrs.insert("processed".to_string(), serde_json::json!(processed));
        self.provenance
            .store_metadata()
            .map_err(|e| GridStoreError::storage(e.to_string()))
    }
}

/// Build the Blosc codec for the configured compression.
fn compression_codec(
    storage: &StorageConfig,
) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
    let level = BloscCompressionLevel::try_from(storage.compression_level)
        .map_err(|_| GridStoreError::config("invalid compression level"))?;

    let shuffle = if storage.shuffle {
        BloscShuffleMode::Shuffle
    } else {
        BloscShuffleMode::NoShuffle
    };

    // typesize is required when shuffle is enabled
    let typesize = if storage.shuffle { Some(4) } else { None };

    let compressor = match storage.compression {
        ZarrCompression::None => {
            return Err(GridStoreError::config("no compression configured"));
        }
        ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
        ZarrCompression::BloscZstd => BloscCompressor::Zstd,
    };

    let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
        .map_err(|e| GridStoreError::config(e.to_string()))?;

    Ok(Arc::new(codec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GridSliceStore;
    use crate::types::Grid;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn storage(compression: ZarrCompression) -> StorageConfig {
        StorageConfig {
            chunk_hours: 4,
            compression,
            compression_level: 1,
            shuffle: true,
        }
    }

    #[test]
    fn test_create_reads_missing() {
        let dir = TempDir::new().unwrap();
        let store = ZarrBlockStore::create(
            dir.path().join("tmp.zarr"),
            Dimensions::new(10, 3, 4),
            &storage(ZarrCompression::None),
        )
        .unwrap();

        let values = store.read_blocks(0, 10).unwrap();
        assert_eq!(values.len(), 120);
        assert!(values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_reopen_roundtrip_compressed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tmp.zarr");
        let dims = Dimensions::new(10, 3, 4);
        let grid = Grid::new(3, 4, (0..12).map(|v| v as f32 * 0.25).collect()).unwrap();

        {
            let mut store =
                ZarrBlockStore::create(&path, dims, &storage(ZarrCompression::BloscZstd)).unwrap();
            // spans a chunk boundary at hour 4
            store.write_slice(3, &[grid.clone(), grid.clone()]).unwrap();
        }

        let store = ZarrBlockStore::open(&path).unwrap();
        assert_eq!(store.dimensions(), dims);
        let read = store.read_slice(2, 4).unwrap();
        assert!(read[0].is_all_missing());
        assert_eq!(read[1], grid);
        assert_eq!(read[2], grid);
        assert!(read[3].is_all_missing());
    }

    #[test]
    fn test_attributes_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tmp.zarr");
        let mut store =
            ZarrBlockStore::create(&path, Dimensions::new(4, 1, 1), &storage(ZarrCompression::None))
                .unwrap();

        let mut attrs = Attributes::new();
        attrs.insert("units".to_string(), serde_json::json!("K"));
        store.save_attributes(&attrs).unwrap();
        drop(store);

        let store = ZarrBlockStore::open(&path).unwrap();
        assert_eq!(store.load_attributes().unwrap().get("units"), Some(&serde_json::json!("K")));
    }

    #[test]
    fn test_provenance_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tmp.zarr");
        let mut store =
            ZarrBlockStore::create(&path, Dimensions::new(4, 1, 1), &storage(ZarrCompression::None))
                .unwrap();

        let hour = |h| Utc.with_ymd_and_hms(2020, 1, 1, h, 0, 0).unwrap();
        let records: Vec<_> = (0..4).map(|h| ProvenanceRecord::empty(hour(h))).collect();
        store.save_provenance(0, &records).unwrap();

        let mut written = ProvenanceRecord::empty(hour(2));
        written.min = 1.0;
        written.max = 3.0;
        written.mean = 2.0;
        written.median = 2.0;
        written.source = "primary_obs".to_string();
        written.processed = Some(Utc.with_ymd_and_hms(2020, 1, 5, 8, 30, 0).unwrap());
        store.save_provenance(2, &[written.clone()]).unwrap();
        drop(store);

        let store = ZarrBlockStore::open(&path).unwrap();
        let loaded = store.load_provenance().unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded[2], written);
        assert!(loaded[0].is_empty());
        assert!(loaded[3].min.is_nan());
    }

    #[test]
    fn test_open_missing_dataset() {
        let dir = TempDir::new().unwrap();
        assert!(ZarrBlockStore::open(dir.path().join("absent.zarr")).is_err());
    }
}
