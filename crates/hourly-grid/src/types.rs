//! Core types shared by the storage, provenance and precedence layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GridStoreError, Result};

/// Shape of a dataset: hours x lat x lon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub hours: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Dimensions {
    pub fn new(hours: usize, rows: usize, cols: usize) -> Self {
        Self { hours, rows, cols }
    }

    /// Number of values in one hourly grid.
    pub fn grid_len(&self) -> usize {
        self.rows * self.cols
    }
}

/// One hour's 2-D array of samples (lat rows x lon cols, row-major).
///
/// `NaN` marks a node with no data for the hour.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    /// Number of rows (latitude).
    pub rows: usize,
    /// Number of columns (longitude).
    pub cols: usize,
    /// Values in row-major order.
    pub data: Vec<f32>,
}

impl Grid {
    /// Create a grid, checking that `data` matches the shape.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(GridStoreError::ShapeMismatch {
                expected: format!("{} values ({}x{})", rows * cols, rows, cols),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// A grid where every node has the same value.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// A grid with no data at any node.
    pub fn missing(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, f32::NAN)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the value at a specific node.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col).copied()
    }

    /// True when no node carries a finite value.
    pub fn is_all_missing(&self) -> bool {
        !self.data.iter().any(|v| v.is_finite())
    }

    /// Apply `f` to every value, producing a new grid.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combine two grids of the same shape node by node.
    pub fn zip_map(&self, other: &Grid, f: impl Fn(f32, f32) -> f32) -> Result<Self> {
        self.check_shape(other.rows, other.cols)?;
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Fail with `ShapeMismatch` unless this grid is `rows x cols`.
    pub fn check_shape(&self, rows: usize, cols: usize) -> Result<()> {
        if self.rows != rows || self.cols != cols || self.data.len() != rows * cols {
            return Err(GridStoreError::ShapeMismatch {
                expected: format!("{}x{}", rows, cols),
                actual: format!("{}x{} ({} values)", self.rows, self.cols, self.data.len()),
            });
        }
        Ok(())
    }
}

/// The merge streams that compete for hours in a dataset.
///
/// Ordered from most to least trusted: primary observational analysis,
/// secondary (lower latency, lower quality) analysis, then forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    PrimaryObs,
    SecondaryObs,
    Forecast,
}

impl Stream {
    /// All streams, most trusted first.
    pub const ALL: [Stream; 3] = [Stream::PrimaryObs, Stream::SecondaryObs, Stream::Forecast];

    /// Name used for provenance tags and attribute keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryObs => "primary_obs",
            Self::SecondaryObs => "secondary_obs",
            Self::Forecast => "forecast",
        }
    }

    /// True for the two observational analyses.
    pub fn is_observation(&self) -> bool {
        matches!(self, Self::PrimaryObs | Self::SecondaryObs)
    }

    /// Streams whose data this stream may not overwrite.
    pub fn seniors(&self) -> &'static [Stream] {
        match self {
            Self::PrimaryObs => &[],
            Self::SecondaryObs => &[Stream::PrimaryObs],
            Self::Forecast => &[Stream::PrimaryObs, Stream::SecondaryObs],
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stream {
    type Err = GridStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "primary_obs" => Ok(Self::PrimaryObs),
            "secondary_obs" => Ok(Self::SecondaryObs),
            "forecast" => Ok(Self::Forecast),
            _ => Err(GridStoreError::config(format!("unknown stream \"{}\"", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_new_checks_length() {
        assert!(Grid::new(2, 3, vec![0.0; 6]).is_ok());
        assert!(matches!(
            Grid::new(2, 3, vec![0.0; 5]),
            Err(GridStoreError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_grid_get_row_major() {
        let grid = Grid::new(2, 3, vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]).unwrap();
        assert_eq!(grid.get(1, 2), Some(12.0));
        assert_eq!(grid.get(0, 1), Some(1.0));
        assert_eq!(grid.get(2, 0), None);
    }

    #[test]
    fn test_all_missing() {
        assert!(Grid::missing(3, 3).is_all_missing());
        let mut grid = Grid::missing(3, 3);
        grid.data[4] = 1.0;
        assert!(!grid.is_all_missing());
    }

    #[test]
    fn test_zip_map_shape_mismatch() {
        let a = Grid::filled(2, 2, 1.0);
        let b = Grid::filled(2, 3, 1.0);
        assert!(a.zip_map(&b, |x, y| x + y).is_err());
        let sum = a.zip_map(&a, |x, y| x + y).unwrap();
        assert_eq!(sum.data, vec![2.0; 4]);
    }

    #[test]
    fn test_stream_parse() {
        assert_eq!("primary-obs".parse::<Stream>().unwrap(), Stream::PrimaryObs);
        assert_eq!("SECONDARY_OBS".parse::<Stream>().unwrap(), Stream::SecondaryObs);
        assert_eq!("forecast".parse::<Stream>().unwrap(), Stream::Forecast);
        assert!("ndfd".parse::<Stream>().is_err());
    }

    #[test]
    fn test_stream_seniority() {
        assert!(Stream::PrimaryObs.seniors().is_empty());
        assert_eq!(Stream::SecondaryObs.seniors(), &[Stream::PrimaryObs]);
        assert_eq!(Stream::Forecast.seniors().len(), 2);
        assert!(Stream::SecondaryObs.is_observation());
        assert!(!Stream::Forecast.is_observation());
    }
}
