//! Synthesizing grids for hours missing between two known records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GridStoreError, Result};
use crate::time::{format_hour, hours_between};
use crate::types::Grid;

/// How hours between two sparse records are filled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FillPolicySpec", into = "FillPolicySpec")]
pub enum FillPolicy {
    /// Spread the base grid evenly across the gap, replacing the base hour too.
    Average,
    /// Repeat the base grid for every missing hour.
    Copy,
    /// Linear interpolation from the base grid to the next grid.
    Scaled,
    /// Every node of every missing hour set to one value.
    Forced(f32),
}

impl FillPolicy {
    /// Name used in provenance tags.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Average => "avg",
            Self::Copy => "copy",
            Self::Scaled => "scaled",
            Self::Forced(_) => "forced",
        }
    }
}

impl FromStr for FillPolicy {
    type Err = GridStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "average" | "avg" => Ok(Self::Average),
            "copy" => Ok(Self::Copy),
            "scaled" | "scale" => Ok(Self::Scaled),
            other => other
                .parse::<f32>()
                .map(Self::Forced)
                .map_err(|_| GridStoreError::UnsupportedFillMethod(s.to_string())),
        }
    }
}

impl fmt::Display for FillPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced(value) => write!(f, "{}", value),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// Serialized form: a policy name or a bare number for `Forced`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FillPolicySpec {
    Forced(f32),
    Named(String),
}

impl TryFrom<FillPolicySpec> for FillPolicy {
    type Error = GridStoreError;

    fn try_from(spec: FillPolicySpec) -> Result<Self> {
        match spec {
            FillPolicySpec::Forced(value) => Ok(Self::Forced(value)),
            FillPolicySpec::Named(name) => name.parse(),
        }
    }
}

impl From<FillPolicy> for FillPolicySpec {
    fn from(policy: FillPolicy) -> Self {
        match policy {
            FillPolicy::Forced(value) => Self::Forced(value),
            other => Self::Named(other.tag().to_string()),
        }
    }
}

/// A grid with the hour it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedGrid {
    pub hour: DateTime<Utc>,
    pub grid: Grid,
}

impl TimedGrid {
    pub fn new(hour: DateTime<Utc>, grid: Grid) -> Self {
        Self { hour, grid }
    }
}

/// A synthesized hour produced by [`GapFiller::fill`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilledHour {
    pub hour: DateTime<Utc>,
    pub grid: Grid,
    /// Provenance tag, e.g. "secondary_obs copy".
    pub tag: String,
}

/// Fills the hours between two records with one policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapFiller {
    policy: FillPolicy,
    decimals: Option<u32>,
}

impl GapFiller {
    /// Create a filler; `decimals` rounds the synthesized increments.
    pub fn new(policy: FillPolicy, decimals: Option<u32>) -> Self {
        Self { policy, decimals }
    }

    pub fn policy(&self) -> FillPolicy {
        self.policy
    }

    /// Hours strictly between `base` and `next`.
    pub fn missing_hours(base: &DateTime<Utc>, next: &DateTime<Utc>) -> usize {
        (hours_between(base, next, false) - 1).max(0) as usize
    }

    /// Produce the synthetic hours between two records, in time order.
    ///
    /// `source` is the stream name used to build provenance tags. Records
    /// may be passed in either order; the earlier one is the base. A gap of
    /// zero missing hours yields an empty sequence.
    ///
    /// For `Average` the first element replaces the base hour itself with
    /// the apportioned value.
    pub fn fill(&self, source: &str, base: &TimedGrid, next: &TimedGrid) -> Result<Vec<FilledHour>> {
        let (base, next) = if next.hour < base.hour {
            (next, base)
        } else {
            (base, next)
        };
        base.grid.check_shape(next.grid.rows, next.grid.cols)?;

        let missing = Self::missing_hours(&base.hour, &next.hour);
        if missing == 0 {
            return Ok(Vec::new());
        }
        let steps = (missing + 1) as f32;
        let at = |k: usize| base.hour + Duration::hours(k as i64);

        debug!(
            source = %source,
            base = %format_hour(&base.hour),
            next = %format_hour(&next.hour),
            missing,
            policy = %self.policy,
            "Filling time gap"
        );

        let mut filled = Vec::with_capacity(missing + 1);
        match self.policy {
            FillPolicy::Average => {
                let avg = base.grid.map(|v| self.round(v / steps));
                filled.push(FilledHour {
                    hour: base.hour,
                    grid: avg.clone(),
                    tag: format!("{}* avg", source),
                });
                let tag = format!("{} avg", source);
                for k in 1..=missing {
                    filled.push(FilledHour {
                        hour: at(k),
                        grid: avg.clone(),
                        tag: tag.clone(),
                    });
                }
            }
            FillPolicy::Copy => {
                let tag = format!("{} copy", source);
                for k in 1..=missing {
                    filled.push(FilledHour {
                        hour: at(k),
                        grid: base.grid.clone(),
                        tag: tag.clone(),
                    });
                }
            }
            FillPolicy::Scaled => {
                let increment = next.grid.zip_map(&base.grid, |n, b| self.round((n - b) / steps))?;
                let tag = format!("{} scaled", source);
                for k in 1..=missing {
                    let factor = k as f32;
                    filled.push(FilledHour {
                        hour: at(k),
                        grid: base.grid.zip_map(&increment, |b, inc| b + inc * factor)?,
                        tag: tag.clone(),
                    });
                }
            }
            FillPolicy::Forced(value) => {
                let grid = Grid::filled(base.grid.rows, base.grid.cols, value);
                let tag = format!("{} forced", source);
                for k in 1..=missing {
                    filled.push(FilledHour {
                        hour: at(k),
                        grid: grid.clone(),
                        tag: tag.clone(),
                    });
                }
            }
        }

        Ok(filled)
    }

    fn round(&self, value: f32) -> f32 {
        match self.decimals {
            Some(decimals) => round_to(value, decimals),
            None => value,
        }
    }
}

/// Round to a fixed number of decimal places; NaN passes through.
pub fn round_to(value: f32, decimals: u32) -> f32 {
    let factor = 10f64.powi(decimals as i32);
    ((f64::from(value) * factor).round() / factor) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, h, 0, 0).unwrap()
    }

    fn record(h: u32, value: f32) -> TimedGrid {
        TimedGrid::new(hour(h), Grid::filled(2, 2, value))
    }

    #[test]
    fn test_parse_policies() {
        assert_eq!("average".parse::<FillPolicy>().unwrap(), FillPolicy::Average);
        assert_eq!("avg".parse::<FillPolicy>().unwrap(), FillPolicy::Average);
        assert_eq!("copy".parse::<FillPolicy>().unwrap(), FillPolicy::Copy);
        assert_eq!("Scaled".parse::<FillPolicy>().unwrap(), FillPolicy::Scaled);
        assert_eq!("0.5".parse::<FillPolicy>().unwrap(), FillPolicy::Forced(0.5));
        assert!(matches!(
            "spread".parse::<FillPolicy>(),
            Err(GridStoreError::UnsupportedFillMethod(_))
        ));
    }

    #[test]
    fn test_policy_yaml() {
        let policy: FillPolicy = serde_yaml::from_str("copy").unwrap();
        assert_eq!(policy, FillPolicy::Copy);
        let policy: FillPolicy = serde_yaml::from_str("0").unwrap();
        assert_eq!(policy, FillPolicy::Forced(0.0));
        assert!(serde_yaml::from_str::<FillPolicy>("spline").is_err());
    }

    #[test]
    fn test_no_gap_is_noop() {
        let filler = GapFiller::new(FillPolicy::Copy, None);
        let filled = filler.fill("forecast", &record(3, 1.0), &record(4, 2.0)).unwrap();
        assert!(filled.is_empty());
    }

    #[test]
    fn test_copy_fills_missing_hours_only() {
        let filler = GapFiller::new(FillPolicy::Copy, None);
        let filled = filler.fill("forecast", &record(0, 7.5), &record(4, 1.0)).unwrap();
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].hour, hour(1));
        assert_eq!(filled[2].hour, hour(3));
        assert!(filled.iter().all(|f| f.grid.data == vec![7.5; 4]));
        assert_eq!(filled[0].tag, "forecast copy");
    }

    #[test]
    fn test_average_replaces_base() {
        let filler = GapFiller::new(FillPolicy::Average, None);
        let filled = filler.fill("forecast", &record(0, 12.0), &record(3, 0.0)).unwrap();
        // base hour plus two missing hours, each holding a third of the total
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].hour, hour(0));
        assert_eq!(filled[0].tag, "forecast* avg");
        assert_eq!(filled[1].tag, "forecast avg");
        assert!(filled.iter().all(|f| f.grid.data == vec![4.0; 4]));
    }

    #[test]
    fn test_scaled_interpolates_linearly() {
        let filler = GapFiller::new(FillPolicy::Scaled, None);
        let filled = filler.fill("secondary_obs", &record(0, 0.0), &record(4, 8.0)).unwrap();
        let values: Vec<f32> = filled.iter().map(|f| f.grid.data[0]).collect();
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
        assert_eq!(filled[1].tag, "secondary_obs scaled");
    }

    #[test]
    fn test_forced_constant() {
        let filler = GapFiller::new(FillPolicy::Forced(0.0), None);
        let filled = filler.fill("forecast", &record(0, 5.0), &record(3, 5.0)).unwrap();
        assert_eq!(filled.len(), 2);
        assert_eq!(filled[0].hour, hour(1));
        assert!(filled.iter().all(|f| f.grid.data == vec![0.0; 4]));
    }

    #[test]
    fn test_reversed_records_are_ordered() {
        let filler = GapFiller::new(FillPolicy::Scaled, None);
        let filled = filler.fill("forecast", &record(4, 8.0), &record(0, 0.0)).unwrap();
        assert_eq!(filled[0].hour, hour(1));
        assert_eq!(filled[0].grid.data[0], 2.0);
    }

    #[test]
    fn test_rounding_applies_to_increment() {
        let filler = GapFiller::new(FillPolicy::Average, Some(2));
        let filled = filler.fill("forecast", &record(0, 1.0), &record(3, 0.0)).unwrap();
        assert_eq!(filled[0].grid.data[0], 0.33);
    }

    #[test]
    fn test_nan_nodes_stay_missing() {
        let filler = GapFiller::new(FillPolicy::Scaled, None);
        let mut base = record(0, 0.0);
        base.grid.data[1] = f32::NAN;
        let filled = filler.fill("forecast", &base, &record(2, 2.0)).unwrap();
        assert_eq!(filled[0].grid.data[0], 1.0);
        assert!(filled[0].grid.data[1].is_nan());
    }

    #[test]
    fn test_shape_mismatch() {
        let filler = GapFiller::new(FillPolicy::Copy, None);
        let next = TimedGrid::new(hour(3), Grid::filled(3, 3, 1.0));
        assert!(filler.fill("forecast", &record(0, 1.0), &next).is_err());
    }
}
