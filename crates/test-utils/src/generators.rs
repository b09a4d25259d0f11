//! Test data generators for creating synthetic hourly grids.
//!
//! All generators return values in row-major order (row 0 first), matching
//! the layout of one hour block in a dataset.

/// Creates a grid where every node carries its own position.
///
/// Each cell value is `base + row * 100 + col`, so a misplaced row or column
/// shows up immediately when a slice is read back.
///
/// # Example
///
/// ```
/// use test_utils::create_index_grid;
///
/// let grid = create_index_grid(2, 3, 1000.0);
/// assert_eq!(grid, vec![1000.0, 1001.0, 1002.0, 1100.0, 1101.0, 1102.0]);
/// ```
pub fn create_index_grid(rows: usize, cols: usize, base: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            data.push(base + (row * 100 + col) as f32);
        }
    }
    data
}

/// Creates a temperature-like grid in Kelvin for one hour of the day.
///
/// A south-to-north gradient plus a diurnal swing peaking at 21Z.
pub fn create_temperature_grid(rows: usize, cols: usize, hour_of_day: u32) -> Vec<f32> {
    let phase = (hour_of_day as f32 - 15.0) / 24.0 * std::f32::consts::TAU;
    let diurnal = 6.0 * phase.cos();
    let mut data = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let lat_factor = row as f32 / rows.max(1) as f32;
            let lon_factor = col as f32 / cols.max(1) as f32;
            data.push(285.0 - lat_factor * 20.0 + lon_factor * 2.0 + diurnal);
        }
    }
    data
}

/// Creates a grid with deterministic hourly precipitation totals in inches.
///
/// Most nodes are dry; roughly one in four gets up to 0.5 inches.
pub fn create_precipitation_grid(rows: usize, cols: usize, seed: u32) -> Vec<f32> {
    let mut data = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            // Simple deterministic pseudo-random
            let hash = simple_hash(col as u32, row as u32, seed);
            let precip = if hash % 4 == 0 {
                (hash % 50) as f32 / 100.0
            } else {
                0.0
            };
            data.push(precip);
        }
    }
    data
}

/// Simple deterministic hash for reproducible test data.
fn simple_hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_mul(31).wrapping_add(x);
    h = h.wrapping_mul(31).wrapping_add(y);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

/// Creates a grid filled with a constant value.
pub fn create_constant_grid(rows: usize, cols: usize, value: f32) -> Vec<f32> {
    vec![value; rows * cols]
}

/// Creates a zero grid with NaN at the given `(row, col)` positions.
pub fn create_grid_with_nans(rows: usize, cols: usize, nan_positions: &[(usize, usize)]) -> Vec<f32> {
    let mut data = vec![0.0; rows * cols];
    for &(row, col) in nan_positions {
        if row < rows && col < cols {
            data[row * cols + col] = f32::NAN;
        }
    }
    data
}
