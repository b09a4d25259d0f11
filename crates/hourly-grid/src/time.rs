//! Hour arithmetic over a dataset's fixed, inclusive time window.
//!
//! Every dataset indexes its time dimension by whole hours counted from
//! `start_time`. The helpers here normalise instants to the top of the hour,
//! convert between hours and array offsets, and format hours the way they
//! are persisted in attributes and provenance (`%Y-%m-%d:%H`).

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GridStoreError, Result};

/// Format used for hours in dataset attributes and provenance records.
pub const HOUR_FORMAT: &str = "%Y-%m-%d:%H";

/// Truncate any timezone-aware instant to the start of its UTC hour.
pub fn truncate_to_hour<Tz: TimeZone>(time: &DateTime<Tz>) -> DateTime<Utc> {
    let utc = time.with_timezone(&Utc);
    utc.date_naive()
        .and_hms_opt(utc.hour(), 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(utc)
}

/// Format an hour as `%Y-%m-%d:%H`.
pub fn format_hour(hour: &DateTime<Utc>) -> String {
    hour.format(HOUR_FORMAT).to_string()
}

/// Parse an hour string.
///
/// Supports:
/// - Attribute format: "2020-01-01:05"
/// - RFC 3339: "2020-01-01T05:00:00Z" (minutes and seconds are dropped)
pub fn parse_hour(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(truncate_to_hour(&dt));
    }

    let (date, hour) = s
        .rsplit_once(':')
        .ok_or_else(|| GridStoreError::TimeParse(s.to_string()))?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| GridStoreError::TimeParse(s.to_string()))?;
    let hour: u32 = hour
        .parse()
        .map_err(|_| GridStoreError::TimeParse(s.to_string()))?;
    let naive = date
        .and_hms_opt(hour, 0, 0)
        .ok_or_else(|| GridStoreError::TimeParse(s.to_string()))?;

    Ok(Utc.from_utc_datetime(&naive))
}

/// Number of whole hours between two instants.
///
/// With `inclusive = false` this is the plain difference (00 to 04 is 4);
/// with `inclusive = true` both end points are counted (00 to 04 is 5).
/// Order of the arguments does not matter.
pub fn hours_between(a: &DateTime<Utc>, b: &DateTime<Utc>, inclusive: bool) -> i64 {
    let diff = (*b - *a).num_hours().abs();
    if inclusive {
        diff + 1
    } else {
        diff
    }
}

/// One hour after `hour`.
pub fn next_hour(hour: &DateTime<Utc>) -> DateTime<Utc> {
    *hour + Duration::hours(1)
}

/// The fixed `[start_time, end_time]` window of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAxis {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timezone: String,
}

impl TimeAxis {
    /// Create a new axis; both ends are truncated to the hour and inclusive.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: impl Into<String>,
    ) -> Result<Self> {
        let start = truncate_to_hour(&start);
        let end = truncate_to_hour(&end);
        if end < start {
            return Err(GridStoreError::config(format!(
                "end_time {} precedes start_time {}",
                format_hour(&end),
                format_hour(&start)
            )));
        }
        Ok(Self {
            start,
            end,
            timezone: timezone.into(),
        })
    }

    /// Window running `obs_days` before and `fcast_days` after `reference`.
    ///
    /// This is the usual layout of a reanalysis file: observations behind
    /// the reference hour, forecast ahead of it.
    pub fn around(
        reference: DateTime<Utc>,
        obs_days: u32,
        fcast_days: u32,
        timezone: impl Into<String>,
    ) -> Result<Self> {
        let reference = truncate_to_hour(&reference);
        let start = reference - Duration::hours(i64::from(obs_days) * 24);
        let end = reference + Duration::hours(i64::from(fcast_days) * 24);
        Self::new(start, end, timezone)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// Number of hours in the window (both ends included).
    pub fn len(&self) -> usize {
        hours_between(&self.start, &self.end, true) as usize
    }

    /// An axis always holds at least one hour.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check whether an hour falls inside the window.
    pub fn contains(&self, hour: &DateTime<Utc>) -> bool {
        let hour = truncate_to_hour(hour);
        hour >= self.start && hour <= self.end
    }

    /// Zero-based offset of `hour` within the window.
    pub fn index_for(&self, hour: &DateTime<Utc>) -> Result<usize> {
        let hour = truncate_to_hour(hour);
        if !self.contains(&hour) {
            return Err(GridStoreError::OutOfRange {
                hour: format_hour(&hour),
                start: format_hour(&self.start),
                end: format_hour(&self.end),
            });
        }
        Ok(hours_between(&self.start, &hour, false) as usize)
    }

    /// Hour at a zero-based offset.
    pub fn hour_at(&self, index: usize) -> Result<DateTime<Utc>> {
        if index >= self.len() {
            return Err(GridStoreError::Bounds {
                offset: index,
                count: 1,
                len: self.len(),
            });
        }
        Ok(self.start + Duration::hours(index as i64))
    }

    /// Iterate the hours of `count` consecutive offsets starting at `offset`.
    pub fn hours(&self, offset: usize, count: usize) -> impl Iterator<Item = DateTime<Utc>> {
        let first = self.start + Duration::hours(offset as i64);
        (0..count).map(move |i| first + Duration::hours(i as i64))
    }
}

/// Serde adapter for hours stored as `%Y-%m-%d:%H` strings.
pub mod hour_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hour: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_hour(hour))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_hour(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, h, 0, 0).unwrap()
    }

    fn axis() -> TimeAxis {
        TimeAxis::new(hour(1, 0), hour(3, 23), "UTC").unwrap()
    }

    #[test]
    fn test_axis_length_is_inclusive() {
        assert_eq!(axis().len(), 72);
    }

    #[test]
    fn test_index_for() {
        let axis = axis();
        assert_eq!(axis.index_for(&hour(1, 0)).unwrap(), 0);
        assert_eq!(axis.index_for(&hour(1, 5)).unwrap(), 5);
        assert_eq!(axis.index_for(&hour(3, 23)).unwrap(), 71);
    }

    #[test]
    fn test_index_for_out_of_range() {
        let axis = axis();
        let before = hour(1, 0) - Duration::hours(1);
        assert!(matches!(
            axis.index_for(&before),
            Err(GridStoreError::OutOfRange { .. })
        ));
        assert!(matches!(
            axis.index_for(&Utc.with_ymd_and_hms(2020, 1, 4, 0, 0, 0).unwrap()),
            Err(GridStoreError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_contains_and_next_hour() {
        let axis = axis();
        assert!(axis.contains(&hour(3, 23)));
        assert!(!axis.contains(&next_hour(&hour(3, 23))));
        assert_eq!(next_hour(&hour(1, 23)), hour(2, 0));
    }

    #[test]
    fn test_index_truncates_minutes() {
        let axis = axis();
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 5, 42, 10).unwrap();
        assert_eq!(axis.index_for(&t).unwrap(), 5);
    }

    #[test]
    fn test_hour_at_roundtrip() {
        let axis = axis();
        assert_eq!(axis.hour_at(30).unwrap(), hour(2, 6));
        assert!(axis.hour_at(72).is_err());
    }

    #[test]
    fn test_hours_between() {
        assert_eq!(hours_between(&hour(1, 0), &hour(1, 4), false), 4);
        assert_eq!(hours_between(&hour(1, 0), &hour(1, 4), true), 5);
        assert_eq!(hours_between(&hour(1, 4), &hour(1, 0), false), 4);
    }

    #[test]
    fn test_parse_and_format_hour() {
        assert_eq!(parse_hour("2020-01-02:07").unwrap(), hour(2, 7));
        assert_eq!(parse_hour("2020-01-02T07:30:00Z").unwrap(), hour(2, 7));
        assert_eq!(format_hour(&hour(2, 7)), "2020-01-02:07");
        assert!(parse_hour("yesterday").is_err());
        assert!(parse_hour("2020-01-02:25").is_err());
    }

    #[test]
    fn test_around_reference() {
        let reference = hour(11, 7);
        let axis = TimeAxis::around(reference, 10, 7, "UTC").unwrap();
        assert_eq!(axis.start(), hour(1, 7));
        assert_eq!(axis.end(), hour(18, 7));
        assert_eq!(axis.len(), 17 * 24 + 1);
    }

    #[test]
    fn test_reversed_window_rejected() {
        assert!(TimeAxis::new(hour(3, 0), hour(1, 0), "UTC").is_err());
    }
}
