//! Common test fixtures for hourly grid datasets.

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

/// The three-day window used throughout the test suite.
pub mod window {
    pub const START: &str = "2020-01-01:00";
    pub const END: &str = "2020-01-03:23";
    pub const HOURS: usize = 72;
}

/// Small grid shape that keeps on-disk tests fast.
pub const ROWS: usize = 3;
pub const COLS: usize = 4;

/// A UTC hour.
///
/// # Panics
///
/// Panics on an invalid date; fixtures only use literal dates.
pub fn hour(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("valid fixture hour")
}

/// An hour on 2020-01-01, the first day of [`window`].
pub fn jan1(h: u32) -> DateTime<Utc> {
    hour(2020, 1, 1, h)
}

/// YAML for a dataset over [`window`] with the given grid shape.
///
/// `extra` is appended verbatim, e.g. a `streams:` block.
pub fn dataset_yaml(name: &str, rows: usize, cols: usize, extra: &str) -> String {
    format!(
        "name: {name}\nunits: K\nstart_time: \"{start}\"\nend_time: \"{end}\"\nrows: {rows}\ncols: {cols}\nstorage:\n  chunk_hours: 24\n  compression: blosc_zstd\n  compression_level: 1\n{extra}",
        name = name,
        start = window::START,
        end = window::END,
        rows = rows,
        cols = cols,
        extra = extra,
    )
}

/// A fresh temporary directory for an on-disk dataset.
pub fn temp_dataset_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("hourly-grid-")
        .tempdir()
        .expect("create temp dir")
}
