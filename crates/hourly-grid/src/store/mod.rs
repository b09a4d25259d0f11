//! Block storage for the hour x lat x lon array.
//!
//! [`BlockStore`] is the seam between the merge engine and the chunked
//! array backend. A block is one hour: `rows * cols` f32 values in row-major
//! order. [`GridSliceStore`] layers grid-shaped reads and writes on top of
//! any block store.

mod memory;
mod zarr;

pub use memory::MemoryBlockStore;
pub use zarr::ZarrBlockStore;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{GridStoreError, Result};
use crate::provenance::ProvenanceRecord;
use crate::types::{Dimensions, Grid};

/// Dataset attributes as stored alongside the array.
pub type Attributes = Map<String, Value>;

/// Raw access to a dataset's array, attributes and provenance.
pub trait BlockStore {
    /// Shape of the stored array.
    fn dimensions(&self) -> Dimensions;

    /// Read `count` consecutive hour blocks starting at `offset`.
    ///
    /// Never-written hours come back as NaN.
    fn read_blocks(&self, offset: usize, count: usize) -> Result<Vec<f32>>;

    /// Write consecutive hour blocks starting at `offset`.
    ///
    /// `values.len()` must be a multiple of the block length.
    fn write_blocks(&mut self, offset: usize, values: &[f32]) -> Result<()>;

    fn load_attributes(&self) -> Result<Attributes>;

    /// Replace the stored dataset attributes.
    fn save_attributes(&mut self, attributes: &Attributes) -> Result<()>;

    /// All provenance records, one per hour.
    fn load_provenance(&self) -> Result<Vec<ProvenanceRecord>>;

    /// Overwrite provenance records starting at `offset`.
    fn save_provenance(&mut self, offset: usize, records: &[ProvenanceRecord]) -> Result<()>;
}

/// Check that `count` hours starting at `offset` fit in `len` hours.
pub fn check_bounds(offset: usize, count: usize, len: usize) -> Result<()> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(GridStoreError::Bounds { offset, count, len }),
    }
}

/// Grid-shaped slice access over a [`BlockStore`].
pub trait GridSliceStore: BlockStore {
    /// Persist consecutive hourly grids starting at `offset`.
    ///
    /// Returns the number of hours written.
    fn write_slice(&mut self, offset: usize, grids: &[Grid]) -> Result<usize> {
        let dims = self.dimensions();
        check_bounds(offset, grids.len(), dims.hours)?;
        if grids.is_empty() {
            return Ok(0);
        }

        let mut values = Vec::with_capacity(grids.len() * dims.grid_len());
        for grid in grids {
            grid.check_shape(dims.rows, dims.cols)?;
            values.extend_from_slice(&grid.data);
        }

        debug!(offset, hours = grids.len(), "Writing grid slice");
        self.write_blocks(offset, &values)?;
        Ok(grids.len())
    }

    /// Read `count` hourly grids starting at `offset`.
    fn read_slice(&self, offset: usize, count: usize) -> Result<Vec<Grid>> {
        let dims = self.dimensions();
        check_bounds(offset, count, dims.hours)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let values = self.read_blocks(offset, count)?;
        let block = dims.grid_len();
        if values.len() != count * block {
            return Err(GridStoreError::storage(format!(
                "expected {} values for {} hours, store returned {}",
                count * block,
                count,
                values.len()
            )));
        }

        values
            .chunks_exact(block)
            .map(|chunk| Grid::new(dims.rows, dims.cols, chunk.to_vec()))
            .collect()
    }
}

impl<S: BlockStore + ?Sized> GridSliceStore for S {}
