//! Scoped handle over one stored dataset.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::attributes::DatasetAttributes;
use crate::config::DatasetConfig;
use crate::error::{GridStoreError, Result};
use crate::provenance::{ProvenanceRecord, ProvenanceTracker};
use crate::span::{SourceSpan, SpanTable};
use crate::store::{BlockStore, GridSliceStore, ZarrBlockStore};
use crate::time::{format_hour, truncate_to_hour, TimeAxis};
use crate::types::{Dimensions, Grid, Stream};

/// An open dataset.
///
/// Holding a `GridDataset` is holding the dataset open; all mutation goes
/// through [`SourcePriorityEngine`](crate::SourcePriorityEngine), which
/// borrows the handle mutably. [`close`](Self::close) hands the store back.
#[derive(Debug)]
pub struct GridDataset<S: BlockStore> {
    store: S,
    attrs: DatasetAttributes,
    axis: TimeAxis,
    tracker: ProvenanceTracker,
}

impl<S: BlockStore> GridDataset<S> {
    /// Build step: initialise an allocated store from `config`.
    ///
    /// Writes an empty provenance record for every hour and the dataset
    /// attributes. The store's shape must match the configuration.
    pub fn create(mut store: S, config: &DatasetConfig) -> Result<Self> {
        config.validate()?;
        let expected = config.dimensions()?;
        let actual = store.dimensions();
        if expected != actual {
            return Err(GridStoreError::ShapeMismatch {
                expected: format!("{:?}", expected),
                actual: format!("{:?}", actual),
            });
        }

        let attrs = DatasetAttributes::from_config(config)?;
        let axis = attrs.time_axis()?;
        let tracker = ProvenanceTracker::new(axis.clone());

        store.save_provenance(0, &tracker.initial_records())?;
        store.save_attributes(&attrs.to_attributes())?;

        info!(
            dataset = %attrs.name,
            start = %format_hour(&axis.start()),
            end = %format_hour(&axis.end()),
            hours = axis.len(),
            "Built dataset"
        );

        Ok(Self {
            store,
            attrs,
            axis,
            tracker,
        })
    }

    /// Open a dataset previously built with [`create`](Self::create).
    pub fn open(store: S) -> Result<Self> {
        let attrs = DatasetAttributes::from_attributes(&store.load_attributes()?)?;
        let axis = attrs.time_axis()?;

        let expected = Dimensions::new(axis.len(), attrs.rows, attrs.cols);
        if store.dimensions() != expected {
            return Err(GridStoreError::invalid_metadata(format!(
                "attributes describe {:?} but the array is {:?}",
                expected,
                store.dimensions()
            )));
        }

        let tracker = ProvenanceTracker::new(axis.clone());
        Ok(Self {
            store,
            attrs,
            axis,
            tracker,
        })
    }

    /// Release the dataset and return the underlying store.
    pub fn close(self) -> S {
        self.store
    }

    pub fn name(&self) -> &str {
        &self.attrs.name
    }

    pub fn units(&self) -> &str {
        &self.attrs.units
    }

    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    pub fn dimensions(&self) -> Dimensions {
        self.store.dimensions()
    }

    pub fn attributes(&self) -> &DatasetAttributes {
        &self.attrs
    }

    /// Offset of `hour` on the dataset's time axis.
    pub fn offset_for(&self, hour: &DateTime<Utc>) -> Result<usize> {
        self.axis.index_for(hour)
    }

    /// Read `count` consecutive grids starting at `start`.
    pub fn read_slice(&self, start: DateTime<Utc>, count: usize) -> Result<Vec<Grid>> {
        let offset = self.axis.index_for(&start)?;
        self.store.read_slice(offset, count)
    }

    /// Read the grid at one hour.
    pub fn read_hour(&self, hour: DateTime<Utc>) -> Result<Grid> {
        let offset = self.axis.index_for(&hour)?;
        self.store
            .read_slice(offset, 1)?
            .pop()
            .ok_or_else(|| GridStoreError::storage("empty read"))
    }

    /// Every provenance record, in time order.
    pub fn provenance(&self) -> Result<Vec<ProvenanceRecord>> {
        self.store.load_provenance()
    }

    pub fn provenance_at(&self, hour: DateTime<Utc>) -> Result<ProvenanceRecord> {
        let offset = self.axis.index_for(&hour)?;
        self.store
            .load_provenance()?
            .into_iter()
            .nth(offset)
            .ok_or_else(|| {
                GridStoreError::invalid_metadata(format!(
                    "no provenance record for {}",
                    format_hour(&truncate_to_hour(&hour))
                ))
            })
    }

    pub fn span(&self, stream: Stream) -> Option<SourceSpan> {
        self.attrs.spans.get(stream).copied()
    }

    pub fn spans(&self) -> &SpanTable {
        &self.attrs.spans
    }

    /// Resolved `(start, end)` hours claimed by a stream.
    ///
    /// An absent start means the dataset start, except for the secondary
    /// observations, whose span then begins the hour after the primary
    /// observations end.
    pub fn stream_timespan(&self, stream: Stream) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let span = self.attrs.spans.get(stream)?;
        let start = match (span.start_time, stream) {
            (Some(start), _) => start,
            (None, Stream::SecondaryObs) => self
                .attrs
                .spans
                .end_time(Stream::PrimaryObs)
                .map(|end| end + Duration::hours(1))
                .unwrap_or_else(|| self.axis.start()),
            (None, _) => self.axis.start(),
        };
        Some((start, span.end_time))
    }

    /// Most recent hour holding valid data, optionally for one stream only.
    pub fn last_valid_hour(&self, stream: Option<Stream>) -> Result<Option<DateTime<Utc>>> {
        self.tracker.last_valid_hour(&self.store, stream)
    }

    pub fn last_obs_time(&self) -> Option<DateTime<Utc>> {
        self.attrs.last_obs_time
    }

    pub fn last_valid_time(&self) -> Option<DateTime<Utc>> {
        self.attrs.last_valid_time
    }

    pub(crate) fn tracker(&self) -> &ProvenanceTracker {
        &self.tracker
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Persist new attributes, then adopt them.
    pub(crate) fn commit_attributes(&mut self, attrs: DatasetAttributes) -> Result<()> {
        self.store.save_attributes(&attrs.to_attributes())?;
        self.attrs = attrs;
        Ok(())
    }
}

impl GridDataset<ZarrBlockStore> {
    /// Allocate and build a zarr dataset at `path`.
    pub fn create_zarr(path: impl AsRef<Path>, config: &DatasetConfig) -> Result<Self> {
        config.validate()?;
        let store = ZarrBlockStore::create(path, config.dimensions()?, &config.storage)?;
        Self::create(store, config)
    }

    /// Open the zarr dataset at `path`.
    pub fn open_zarr(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(ZarrBlockStore::open(path)?)
    }
}
