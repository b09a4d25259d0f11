//! Per-hour provenance records kept parallel to the grid array.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GridStoreError, Result};
use crate::store::BlockStore;
use crate::time::{format_hour, hour_serde, TimeAxis};
use crate::types::{Grid, Stream};

/// Format of the `processed` timestamp.
pub const PROCESSED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source tag used by the repair path.
pub const FUDGED_TAG: &str = "fudged";

/// Summary statistics over the finite values of a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub median: f32,
}

impl GridStats {
    /// All-NaN statistics for a grid with no valid nodes.
    pub fn missing() -> Self {
        Self {
            min: f32::NAN,
            max: f32::NAN,
            mean: f32::NAN,
            median: f32::NAN,
        }
    }

    /// Compute statistics over the finite values in `values`.
    ///
    /// A grid whose only non-NaN values are infinite still holds data, so
    /// its statistics are taken over those values instead.
    pub fn from_values(values: &[f32]) -> Self {
        let mut valid: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if valid.is_empty() {
            valid = values.iter().copied().filter(|v| !v.is_nan()).collect();
        }
        if valid.is_empty() {
            return Self::missing();
        }
        valid.sort_by(|a, b| a.total_cmp(b));

        let n = valid.len();
        let sum: f64 = valid.iter().map(|v| f64::from(*v)).sum();
        let median = if n % 2 == 1 {
            valid[n / 2]
        } else {
            ((f64::from(valid[n / 2 - 1]) + f64::from(valid[n / 2])) / 2.0) as f32
        };

        Self {
            min: valid[0],
            max: valid[n - 1],
            mean: (sum / n as f64) as f32,
            median,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.min.is_nan() && self.max.is_nan()
    }
}

/// One hour's provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    #[serde(with = "hour_serde")]
    pub time: DateTime<Utc>,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub median: f32,
    /// Source tag; empty for an hour that was never written.
    pub source: String,
    /// Processing timestamp; `None` for an hour that was never written.
    pub processed: Option<DateTime<Utc>>,
}

impl ProvenanceRecord {
    /// The record every hour starts with when a dataset is built.
    pub fn empty(time: DateTime<Utc>) -> Self {
        Self::from_stats(time, GridStats::missing(), String::new(), None)
    }

    pub fn from_stats(
        time: DateTime<Utc>,
        stats: GridStats,
        source: String,
        processed: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            time,
            min: stats.min,
            max: stats.max,
            mean: stats.mean,
            median: stats.median,
            source,
            processed,
        }
    }

    pub fn stats(&self) -> GridStats {
        GridStats {
            min: self.min,
            max: self.max,
            mean: self.mean,
            median: self.median,
        }
    }

    /// True if the hour has never been written.
    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.processed.is_none()
    }

    /// True if the grid written at this hour had at least one valid node.
    pub fn has_data(&self) -> bool {
        !self.stats().is_missing()
    }

    /// Stream named by the leading token of the source tag.
    ///
    /// `"secondary_obs* avg"` and `"secondary_obs copy"` both yield
    /// `SecondaryObs`; `"fudged"` yields `None`.
    pub fn stream(&self) -> Option<Stream> {
        let token = self.source.split_whitespace().next()?;
        token.trim_end_matches('*').parse().ok()
    }

    /// Processed timestamp in its stored string form.
    pub fn processed_string(&self) -> String {
        self.processed
            .map(|t| t.format(PROCESSED_FORMAT).to_string())
            .unwrap_or_default()
    }

    /// Parse a stored processed string; empty means never processed.
    pub fn parse_processed(s: &str) -> Result<Option<DateTime<Utc>>> {
        if s.is_empty() {
            return Ok(None);
        }
        let naive = NaiveDateTime::parse_from_str(s, PROCESSED_FORMAT)
            .map_err(|_| GridStoreError::TimeParse(s.to_string()))?;
        Ok(Some(Utc.from_utc_datetime(&naive)))
    }
}

/// Writes and scans provenance records for one dataset.
#[derive(Debug, Clone)]
pub struct ProvenanceTracker {
    axis: TimeAxis,
}

impl ProvenanceTracker {
    pub fn new(axis: TimeAxis) -> Self {
        Self { axis }
    }

    /// Empty records for every hour of the axis.
    pub fn initial_records(&self) -> Vec<ProvenanceRecord> {
        self.axis
            .hours(0, self.axis.len())
            .map(ProvenanceRecord::empty)
            .collect()
    }

    /// Build the record for one grid without writing it.
    pub fn build_record(&self, hour: DateTime<Utc>, source_tag: &str, grid: &Grid) -> ProvenanceRecord {
        ProvenanceRecord::from_stats(
            hour,
            GridStats::from_values(&grid.data),
            source_tag.to_string(),
            Some(processed_now()),
        )
    }

    /// Compute and store the record for `grid` at `offset`.
    pub fn record<S: BlockStore>(
        &self,
        store: &mut S,
        offset: usize,
        hour: DateTime<Utc>,
        source_tag: &str,
        grid: &Grid,
    ) -> Result<ProvenanceRecord> {
        let expected = self.axis.hour_at(offset)?;
        if expected != hour {
            return Err(GridStoreError::invalid_input(format!(
                "provenance for {} written at offset {} which holds {}",
                format_hour(&hour),
                offset,
                format_hour(&expected)
            )));
        }

        let record = self.build_record(hour, source_tag, grid);
        store.save_provenance(offset, std::slice::from_ref(&record))?;
        Ok(record)
    }

    /// Store a run of prepared records starting at `offset`.
    pub fn record_run<S: BlockStore>(
        &self,
        store: &mut S,
        offset: usize,
        records: &[ProvenanceRecord],
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        debug!(
            start = %format_hour(&records[0].time),
            hours = records.len(),
            "Recording provenance"
        );
        store.save_provenance(offset, records)
    }

    /// Most recent hour with valid data, optionally limited to one stream.
    pub fn last_valid_hour<S: BlockStore>(
        &self,
        store: &S,
        stream: Option<Stream>,
    ) -> Result<Option<DateTime<Utc>>> {
        let records = store.load_provenance()?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.has_data())
            .find(|r| stream.map_or(true, |s| r.stream() == Some(s)))
            .map(|r| r.time))
    }
}

/// Current time truncated to whole seconds, matching the stored precision.
fn processed_now() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now)
}
