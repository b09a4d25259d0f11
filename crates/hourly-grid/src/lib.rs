//! Hourly grid time series storage and merge engine.
//!
//! A dataset is a fixed-shape hourly 2-D grid over a bounded calendar
//! window. Three update streams compete for its hours: primary observations,
//! secondary observations and a forecast. This crate decides which stream may
//! occupy which hour, synthesizes values for gaps between sparse updates and
//! records per-hour provenance next to the data.
//!
//! # Architecture
//!
//! - [`TimeAxis`] maps absolute hours to offsets in the dataset window
//! - [`BlockStore`] / [`GridSliceStore`] read and write hour slices of the
//!   array ([`ZarrBlockStore`] on disk, [`MemoryBlockStore`] in memory)
//! - [`ProvenanceTracker`] keeps the per-hour source tag and statistics
//! - [`SourcePriorityEngine`] enforces stream precedence and maintains spans
//! - [`GapFiller`] synthesizes the hours between two records
//!
//! # Example
//!
//! ```ignore
//! use hourly_grid::{DatasetConfig, GridDataset, SourcePriorityEngine, Stream, SubmitOptions};
//!
//! let config = DatasetConfig::from_yaml_file("tmp.yaml")?;
//! let mut dataset = GridDataset::create_zarr("/data/tmp.zarr", &config)?;
//! let engine = SourcePriorityEngine::from_config(&config);
//!
//! let report = engine.submit(&mut dataset, Stream::PrimaryObs, hour, grids, SubmitOptions::default())?;
//! println!("wrote {} hours", report.hours_written);
//! ```

pub mod attributes;
pub mod config;
pub mod dataset;
pub mod error;
pub mod gap_fill;
pub mod priority;
pub mod processors;
pub mod provenance;
pub mod span;
pub mod store;
pub mod time;
pub mod types;

pub use attributes::DatasetAttributes;
pub use config::{DatasetConfig, StorageConfig, StreamConfig, StreamsConfig, ZarrCompression};
pub use dataset::GridDataset;
pub use error::{GridStoreError, Result};
pub use gap_fill::{FillPolicy, FilledHour, GapFiller, TimedGrid};
pub use priority::{SourcePriorityEngine, SpanAdjustment, SubmitOptions, SubmitReport};
pub use processors::InputProcessor;
pub use provenance::{GridStats, ProvenanceRecord, ProvenanceTracker, FUDGED_TAG};
pub use span::{SourceSpan, SpanTable};
pub use store::{BlockStore, GridSliceStore, MemoryBlockStore, ZarrBlockStore};
pub use time::{format_hour, hours_between, parse_hour, truncate_to_hour, TimeAxis, HOUR_FORMAT};
pub use types::{Dimensions, Grid, Stream};
