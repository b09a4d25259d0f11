//! In-memory block store.

use crate::error::{GridStoreError, Result};
use crate::provenance::ProvenanceRecord;
use crate::types::Dimensions;

use super::{check_bounds, Attributes, BlockStore};

/// A [`BlockStore`] held entirely in memory.
///
/// Provenance starts out empty; the dataset build step fills it.
#[derive(Debug, Clone)]
pub struct MemoryBlockStore {
    dims: Dimensions,
    values: Vec<f32>,
    attributes: Attributes,
    provenance: Vec<ProvenanceRecord>,
}

impl MemoryBlockStore {
    pub fn new(dims: Dimensions) -> Self {
        Self {
            dims,
            values: vec![f32::NAN; dims.hours * dims.grid_len()],
            attributes: Attributes::new(),
            provenance: Vec::new(),
        }
    }
}

impl BlockStore for MemoryBlockStore {
    fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn read_blocks(&self, offset: usize, count: usize) -> Result<Vec<f32>> {
        check_bounds(offset, count, self.dims.hours)?;
        let block = self.dims.grid_len();
        Ok(self.values[offset * block..(offset + count) * block].to_vec())
    }

    fn write_blocks(&mut self, offset: usize, values: &[f32]) -> Result<()> {
        let block = self.dims.grid_len();
        if block == 0 || values.len() % block != 0 {
            return Err(GridStoreError::ShapeMismatch {
                expected: format!("a multiple of {} values", block),
                actual: format!("{} values", values.len()),
            });
        }
        let count = values.len() / block;
        check_bounds(offset, count, self.dims.hours)?;

        let start = offset * block;
        self.values[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    fn load_attributes(&self) -> Result<Attributes> {
        Ok(self.attributes.clone())
    }

    fn save_attributes(&mut self, attributes: &Attributes) -> Result<()> {
        self.attributes = attributes.clone();
        Ok(())
    }

    fn load_provenance(&self) -> Result<Vec<ProvenanceRecord>> {
        Ok(self.provenance.clone())
    }

    fn save_provenance(&mut self, offset: usize, records: &[ProvenanceRecord]) -> Result<()> {
        check_bounds(offset, records.len(), self.dims.hours)?;
        let end = offset + records.len();
        if self.provenance.len() < end {
            if offset > self.provenance.len() {
                return Err(GridStoreError::storage(format!(
                    "provenance has {} records, cannot write at offset {}",
                    self.provenance.len(),
                    offset
                )));
            }
            self.provenance.truncate(offset);
            self.provenance.extend_from_slice(records);
        } else {
            self.provenance[offset..end].clone_from_slice(records);
        }
        Ok(())
    }
}
