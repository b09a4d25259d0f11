//! Per-dataset clean-up applied to incoming grids before they are stored.

use serde::{Deserialize, Serialize};

use crate::gap_fill::round_to;
use crate::types::Grid;

/// Input processor selected by the physical quantity a dataset holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputProcessor {
    /// Store grids as received.
    #[default]
    None,
    /// Round every value (temperature, dew point).
    Round { decimals: u32 },
    /// Relative humidity: round to 2 decimals and clamp to 0..=100.
    Percent,
    /// Precipitation: trace amounts below 0.01 become 0, round to 2 decimals.
    Precip,
}

impl InputProcessor {
    /// Apply the processor to a grid; NaN nodes stay NaN.
    pub fn apply(&self, grid: &Grid) -> Grid {
        match self {
            Self::None => grid.clone(),
            Self::Round { decimals } => grid.map(|v| round_to(v, *decimals)),
            Self::Percent => grid.map(|v| round_to(v, 2).clamp(0.0, 100.0)),
            Self::Precip => grid.map(|v| if v < 0.01 { 0.0 } else { round_to(v, 2) }),
        }
    }
}
