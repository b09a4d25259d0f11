//! Source precedence between the three merge streams.
//!
//! Primary observations are senior to everything, secondary observations are
//! senior to the forecast. Each stream's claimed hours are kept as a
//! [`SourceSpan`] in the dataset attributes; the engine checks every write
//! against those spans and reconciles them when a senior stream advances.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::attributes::DatasetAttributes;
use crate::config::{DatasetConfig, StreamsConfig};
use crate::dataset::GridDataset;
use crate::error::{GridStoreError, Result};
use crate::gap_fill::{FilledHour, TimedGrid};
use crate::processors::InputProcessor;
use crate::provenance::{ProvenanceRecord, ProvenanceTracker, FUDGED_TAG};
use crate::span::{SourceSpan, SpanTable};
use crate::store::{check_bounds, BlockStore, GridSliceStore};
use crate::time::{format_hour, next_hour, truncate_to_hour};
use crate::types::{Grid, Stream};

/// Per-call switches for [`SourcePriorityEngine::submit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Write even if the hours belong to a senior stream.
    ///
    /// The forced hours carry the stream's tag in provenance, but its span
    /// is clipped to start after the senior span so spans never overlap.
    pub force: bool,
}

impl SubmitOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// What happened to a junior stream's span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanAdjustment {
    Unchanged,
    /// The span now starts at this hour.
    Truncated(DateTime<Utc>),
    /// The span was fully superseded and removed.
    Deleted,
}

/// Outcome of an accepted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReport {
    pub stream: Stream,
    /// First hour written, including synthesized hours.
    pub first_hour: DateTime<Utc>,
    /// Last hour written.
    pub last_hour: DateTime<Utc>,
    /// Total hours written, including synthesized hours.
    pub hours_written: usize,
    /// Hours synthesized by gap filling.
    pub filled_hours: usize,
    /// The stream's span after the write; `None` when a forced write landed
    /// entirely inside a senior span.
    pub span: Option<SourceSpan>,
    /// Junior spans pushed forward, with their new start hour.
    pub truncated: Vec<(Stream, DateTime<Utc>)>,
    /// Junior spans removed.
    pub deleted: Vec<Stream>,
}

/// Applies precedence rules, gap filling and input processing to writes.
#[derive(Debug, Clone, Default)]
pub struct SourcePriorityEngine {
    streams: StreamsConfig,
    processor: InputProcessor,
}

impl SourcePriorityEngine {
    pub fn new(streams: StreamsConfig, processor: InputProcessor) -> Self {
        Self { streams, processor }
    }

    pub fn from_config(config: &DatasetConfig) -> Self {
        Self::new(config.streams.clone(), config.processor)
    }

    /// Check whether `stream` may write at `hour` given the current spans.
    ///
    /// Forecast data may not land on or before the latest observed hour;
    /// secondary observations may not land on or before the last primary hour.
    pub fn check_precedence(
        &self,
        spans: &SpanTable,
        stream: Stream,
        hour: DateTime<Utc>,
        options: SubmitOptions,
    ) -> Result<()> {
        let blocking = stream
            .seniors()
            .iter()
            .filter_map(|senior| spans.end_time(*senior).map(|end| (*senior, end)))
            .filter(|(_, end)| hour <= *end)
            .max_by_key(|(_, end)| *end);

        let Some((senior, senior_end)) = blocking else {
            return Ok(());
        };

        if options.force {
            warn!(
                stream = %stream,
                hour = %format_hour(&hour),
                senior = %senior,
                senior_end = %format_hour(&senior_end),
                "Forcing write over senior stream"
            );
            return Ok(());
        }

        warn!(
            stream = %stream,
            hour = %format_hour(&hour),
            senior = %senior,
            senior_end = %format_hour(&senior_end),
            "Rejected write that violates source precedence"
        );
        Err(GridStoreError::PrecedenceViolation {
            stream: stream.to_string(),
            hour: format_hour(&hour),
            senior: senior.to_string(),
            senior_end: format_hour(&senior_end),
        })
    }

    /// Shrink or remove `lower`'s span after `senior` has advanced.
    ///
    /// A span ending at or before the senior end is deleted. A span starting
    /// at or before it (an absent start counts as `dataset_start`) is pushed
    /// to the hour after the senior end.
    pub fn adjust_lower_precedence(
        spans: &mut SpanTable,
        senior: Stream,
        lower: Stream,
        dataset_start: DateTime<Utc>,
    ) -> SpanAdjustment {
        let (Some(senior_end), Some(lower_span)) = (spans.end_time(senior), spans.get(lower).copied())
        else {
            return SpanAdjustment::Unchanged;
        };

        if lower_span.end_time <= senior_end {
            spans.remove(lower);
            info!(
                stream = %lower,
                senior = %senior,
                senior_end = %format_hour(&senior_end),
                "Deleted superseded span"
            );
            return SpanAdjustment::Deleted;
        }

        if lower_span.start_or(dataset_start) <= senior_end {
            let start = next_hour(&senior_end);
            spans.set(lower, SourceSpan::new(Some(start), lower_span.end_time));
            info!(
                stream = %lower,
                senior = %senior,
                start = %format_hour(&start),
                "Truncated span"
            );
            return SpanAdjustment::Truncated(start);
        }

        SpanAdjustment::Unchanged
    }

    /// Write consecutive grids for `stream` starting at `hour`.
    ///
    /// Checks precedence, fills any gap after the stream's previous last hour
    /// with the stream's fill policy, writes the grids and their provenance,
    /// then updates the span metadata. Nothing is written unless every check
    /// passes.
    pub fn submit<S: BlockStore>(
        &self,
        dataset: &mut GridDataset<S>,
        stream: Stream,
        hour: DateTime<Utc>,
        grids: Vec<Grid>,
        options: SubmitOptions,
    ) -> Result<SubmitReport> {
        let first = truncate_to_hour(&hour);
        if grids.is_empty() {
            return Err(GridStoreError::invalid_input(format!(
                "no grids submitted for {} at {}",
                stream,
                format_hour(&first)
            )));
        }

        let axis = dataset.axis().clone();
        let dims = dataset.dimensions();
        let offset = axis.index_for(&first)?;
        check_bounds(offset, grids.len(), axis.len())?;
        for grid in &grids {
            grid.check_shape(dims.rows, dims.cols)?;
        }
        let last = first + Duration::hours(grids.len() as i64 - 1);

        let spans = dataset.spans().clone();
        self.check_precedence(&spans, stream, first, options)?;

        let grids: Vec<Grid> = grids.iter().map(|g| self.processor.apply(g)).collect();

        let filled = self.plan_gap_fill(dataset, &spans, stream, first, &grids[0], options)?;
        let filled_hours = filled.len();

        // Synthesized hours run contiguously up to `first`.
        let run_start = filled.first().map(|f| f.hour).unwrap_or(first);
        let run_offset = axis.index_for(&run_start)?;
        let tracker = dataset.tracker().clone();

        let mut run_grids = Vec::with_capacity(filled.len() + grids.len());
        let mut records = Vec::with_capacity(filled.len() + grids.len());
        for fill in filled {
            records.push(tracker.build_record(fill.hour, &fill.tag, &fill.grid));
            run_grids.push(fill.grid);
        }
        for (i, grid) in grids.into_iter().enumerate() {
            let at = first + Duration::hours(i as i64);
            records.push(tracker.build_record(at, stream.as_str(), &grid));
            run_grids.push(grid);
        }

        let mut attrs = dataset.attributes().clone();
        let span = match attrs.spans.get(stream) {
            Some(existing) => SourceSpan::new(
                existing.start_time.map(|s| s.min(run_start)),
                existing.end_time.max(last),
            ),
            None => SourceSpan::new(Some(run_start), last),
        };
        attrs.spans.set(stream, span);
        if options.force {
            Self::clip_forced_span(&mut attrs.spans, stream, axis.start());
        }
        let span = attrs.spans.get(stream).copied();

        let (truncated, deleted) = Self::reconcile_spans(&mut attrs, stream, axis.start());
        update_markers(&mut attrs);

        let hours_written =
            write_run(dataset, &tracker, run_offset, &run_grids, &records, Some(attrs))?;

        info!(
            dataset = %dataset.name(),
            stream = %stream,
            start = %format_hour(&run_start),
            end = %format_hour(&last),
            hours = hours_written,
            filled = filled_hours,
            "Accepted submission"
        );

        Ok(SubmitReport {
            stream,
            first_hour: run_start,
            last_hour: last,
            hours_written,
            filled_hours,
            span,
            truncated,
            deleted,
        })
    }

    /// Write repair grids into hours no stream has written.
    ///
    /// Each hour is tagged `fudged`. Hours holding stream data are refused
    /// and spans are left alone.
    pub fn repair<S: BlockStore>(
        &self,
        dataset: &mut GridDataset<S>,
        hour: DateTime<Utc>,
        grids: Vec<Grid>,
    ) -> Result<usize> {
        let first = truncate_to_hour(&hour);
        if grids.is_empty() {
            return Err(GridStoreError::invalid_input(format!(
                "no repair grids submitted at {}",
                format_hour(&first)
            )));
        }

        let axis = dataset.axis().clone();
        let dims = dataset.dimensions();
        let offset = axis.index_for(&first)?;
        check_bounds(offset, grids.len(), axis.len())?;
        for grid in &grids {
            grid.check_shape(dims.rows, dims.cols)?;
        }

        let existing = dataset.provenance()?;
        for record in &existing[offset..offset + grids.len()] {
            if let Some(owner) = record.stream() {
                let owner_end = dataset
                    .spans()
                    .end_time(owner)
                    .unwrap_or(record.time);
                warn!(
                    hour = %format_hour(&record.time),
                    owner = %owner,
                    "Refused repair of hour holding stream data"
                );
                return Err(GridStoreError::PrecedenceViolation {
                    stream: FUDGED_TAG.to_string(),
                    hour: format_hour(&record.time),
                    senior: owner.to_string(),
                    senior_end: format_hour(&owner_end),
                });
            }
        }

        let grids: Vec<Grid> = grids.iter().map(|g| self.processor.apply(g)).collect();
        let tracker = dataset.tracker().clone();
        let records: Vec<ProvenanceRecord> = grids
            .iter()
            .enumerate()
            .map(|(i, grid)| tracker.build_record(first + Duration::hours(i as i64), FUDGED_TAG, grid))
            .collect();

        let written = write_run(dataset, &tracker, offset, &grids, &records, None)?;

        info!(
            dataset = %dataset.name(),
            start = %format_hour(&first),
            hours = written,
            "Inserted repair data"
        );
        Ok(written)
    }

    /// Synthesize the hours between the stream's last hour and `first`.
    fn plan_gap_fill<S: BlockStore>(
        &self,
        dataset: &GridDataset<S>,
        spans: &SpanTable,
        stream: Stream,
        first: DateTime<Utc>,
        next_grid: &Grid,
        options: SubmitOptions,
    ) -> Result<Vec<FilledHour>> {
        let Some(filler) = self.streams.get(stream).gap_filler() else {
            return Ok(Vec::new());
        };
        let Some(previous) = spans.end_time(stream) else {
            return Ok(Vec::new());
        };
        if first <= next_hour(&previous) {
            return Ok(Vec::new());
        }

        let base_offset = dataset.offset_for(&previous)?;
        let base_record = dataset.provenance_at(previous)?;
        if base_record.stream() != Some(stream) {
            debug!(
                stream = %stream,
                base = %format_hour(&previous),
                owner = %base_record.source,
                "Skipping gap fill, base hour not held by stream"
            );
            return Ok(Vec::new());
        }
        let base_grid = dataset
            .store()
            .read_slice(base_offset, 1)?
            .pop()
            .ok_or_else(|| GridStoreError::storage("empty read"))?;

        let base = TimedGrid::new(previous, base_grid);
        let next = TimedGrid::new(first, next_grid.clone());
        let mut filled = filler.fill(stream.as_str(), &base, &next)?;

        if !options.force {
            // Drop synthesized hours that fall inside a senior span.
            let senior_end = stream
                .seniors()
                .iter()
                .filter_map(|s| spans.end_time(*s))
                .max();
            if let Some(senior_end) = senior_end {
                let before = filled.len();
                filled.retain(|f| f.hour > senior_end);
                if filled.len() < before {
                    debug!(
                        stream = %stream,
                        dropped = before - filled.len(),
                        senior_end = %format_hour(&senior_end),
                        "Dropped synthesized hours owned by senior stream"
                    );
                }
            }
        }

        Ok(filled)
    }

    /// Keep a forced junior span clear of its seniors' spans.
    fn clip_forced_span(spans: &mut SpanTable, stream: Stream, dataset_start: DateTime<Utc>) {
        for senior in stream.seniors() {
            match Self::adjust_lower_precedence(spans, *senior, stream, dataset_start) {
                SpanAdjustment::Unchanged => {}
                SpanAdjustment::Truncated(start) => debug!(
                    stream = %stream,
                    senior = %senior,
                    start = %format_hour(&start),
                    "Clipped forced span"
                ),
                SpanAdjustment::Deleted => debug!(
                    stream = %stream,
                    senior = %senior,
                    "Forced write left no span outside senior stream"
                ),
            }
        }
    }

    /// Reconcile junior spans after `stream` has advanced.
    ///
    /// Primary observations push back the secondary span. Whichever
    /// observational stream holds the latest observed hour pushes back the
    /// forecast span.
    fn reconcile_spans(
        attrs: &mut DatasetAttributes,
        stream: Stream,
        dataset_start: DateTime<Utc>,
    ) -> (Vec<(Stream, DateTime<Utc>)>, Vec<Stream>) {
        let mut truncated = Vec::new();
        let mut deleted = Vec::new();
        if !stream.is_observation() {
            return (truncated, deleted);
        }

        let mut pairs = Vec::with_capacity(2);
        if stream == Stream::PrimaryObs {
            pairs.push(Stream::SecondaryObs);
        }
        let stream_end = attrs.spans.end_time(stream);
        if attrs.spans.latest_observation().map(|(_, end)| end) == stream_end {
            pairs.push(Stream::Forecast);
        }

        for lower in pairs {
            match Self::adjust_lower_precedence(&mut attrs.spans, stream, lower, dataset_start) {
                SpanAdjustment::Unchanged => {}
                SpanAdjustment::Truncated(start) => truncated.push((lower, start)),
                SpanAdjustment::Deleted => deleted.push(lower),
            }
        }
        (truncated, deleted)
    }
}

/// Grid and provenance contents of a run of hours, taken before a write.
struct RunSnapshot {
    offset: usize,
    grids: Vec<Grid>,
    records: Vec<ProvenanceRecord>,
}

impl RunSnapshot {
    fn capture<S: BlockStore>(store: &S, offset: usize, count: usize) -> Result<Self> {
        let grids = store.read_slice(offset, count)?;
        let records = store
            .load_provenance()?
            .get(offset..offset + count)
            .map(<[ProvenanceRecord]>::to_vec)
            .ok_or_else(|| GridStoreError::storage("provenance shorter than grid array"))?;
        Ok(Self { offset, grids, records })
    }

    fn restore<S: BlockStore>(&self, store: &mut S) -> Result<()> {
        store.write_slice(self.offset, &self.grids)?;
        store.save_provenance(self.offset, &self.records)
    }
}

/// Write grids, their provenance and optionally new attributes as one unit.
///
/// If any step fails the touched hours are put back as they were and the
/// first error is returned.
fn write_run<S: BlockStore>(
    dataset: &mut GridDataset<S>,
    tracker: &ProvenanceTracker,
    offset: usize,
    grids: &[Grid],
    records: &[ProvenanceRecord],
    attrs: Option<DatasetAttributes>,
) -> Result<usize> {
    let snapshot = RunSnapshot::capture(dataset.store(), offset, grids.len())?;

    let result = apply_run(dataset, tracker, offset, grids, records, attrs);
    if let Err(err) = &result {
        warn!(
            dataset = %dataset.name(),
            offset,
            hours = grids.len(),
            error = %err,
            "Write failed, restoring previous hours"
        );
        if let Err(restore_err) = snapshot.restore(dataset.store_mut()) {
            error!(
                dataset = %dataset.name(),
                offset,
                error = %restore_err,
                "Failed to restore hours after write failure"
            );
        }
    }
    result
}

fn apply_run<S: BlockStore>(
    dataset: &mut GridDataset<S>,
    tracker: &ProvenanceTracker,
    offset: usize,
    grids: &[Grid],
    records: &[ProvenanceRecord],
    attrs: Option<DatasetAttributes>,
) -> Result<usize> {
    let written = dataset.store_mut().write_slice(offset, grids)?;
    tracker.record_run(dataset.store_mut(), offset, records)?;
    if let Some(attrs) = attrs {
        dataset.commit_attributes(attrs)?;
    }
    Ok(written)
}

/// Advance the last observed and last valid hour markers.
fn update_markers(attrs: &mut DatasetAttributes) {
    if let Some((_, end)) = attrs.spans.latest_observation() {
        attrs.last_obs_time = attrs.last_obs_time.max(Some(end));
    }
    if let Some(end) = attrs.spans.latest_end() {
        attrs.last_valid_time = attrs.last_valid_time.max(Some(end));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::gap_fill::FillPolicy;
    use crate::store::{Attributes, MemoryBlockStore};
    use crate::types::Dimensions;
    use chrono::TimeZone;

    fn hour(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, h, 0, 0).unwrap()
    }

    fn dataset() -> GridDataset<MemoryBlockStore> {
        let config = DatasetConfig::from_yaml_str(
            r#"
name: TMP
start_time: "2020-01-01:00"
end_time: "2020-01-03:23"
rows: 2
cols: 2
"#,
        )
        .unwrap();
        GridDataset::create(MemoryBlockStore::new(config.dimensions().unwrap()), &config).unwrap()
    }

    /// Memory store whose next provenance or attribute write fails.
    #[derive(Debug)]
    struct FlakyStore {
        inner: MemoryBlockStore,
        fail_provenance: bool,
        fail_attributes: bool,
    }

    impl BlockStore for FlakyStore {
        fn dimensions(&self) -> Dimensions {
            self.inner.dimensions()
        }

        fn read_blocks(&self, offset: usize, count: usize) -> Result<Vec<f32>> {
            self.inner.read_blocks(offset, count)
        }

        fn write_blocks(&mut self, offset: usize, values: &[f32]) -> Result<()> {
            self.inner.write_blocks(offset, values)
        }

        fn load_attributes(&self) -> Result<Attributes> {
            self.inner.load_attributes()
        }

        fn save_attributes(&mut self, attributes: &Attributes) -> Result<()> {
            if std::mem::take(&mut self.fail_attributes) {
                return Err(GridStoreError::storage("disk full"));
            }
            self.inner.save_attributes(attributes)
        }

        fn load_provenance(&self) -> Result<Vec<ProvenanceRecord>> {
            self.inner.load_provenance()
        }

        fn save_provenance(&mut self, offset: usize, records: &[ProvenanceRecord]) -> Result<()> {
            if std::mem::take(&mut self.fail_provenance) {
                return Err(GridStoreError::storage("disk full"));
            }
            self.inner.save_provenance(offset, records)
        }
    }

    fn flaky_dataset() -> GridDataset<FlakyStore> {
        let config = DatasetConfig::from_yaml_str(
            r#"
name: TMP
start_time: "2020-01-01:00"
end_time: "2020-01-03:23"
rows: 2
cols: 2
"#,
        )
        .unwrap();
        let store = FlakyStore {
            inner: MemoryBlockStore::new(config.dimensions().unwrap()),
            fail_provenance: false,
            fail_attributes: false,
        };
        GridDataset::create(store, &config).unwrap()
    }

    fn grid(v: f32) -> Grid {
        Grid::filled(2, 2, v)
    }

    fn spans(entries: &[(Stream, Option<DateTime<Utc>>, DateTime<Utc>)]) -> SpanTable {
        let mut spans = SpanTable::new();
        for (stream, start, end) in entries {
            spans.set(*stream, SourceSpan::new(*start, *end));
        }
        spans
    }

    #[test]
    fn test_check_precedence_forecast() {
        let engine = SourcePriorityEngine::default();
        let spans = spans(&[
            (Stream::PrimaryObs, None, hour(1, 5)),
            (Stream::SecondaryObs, Some(hour(1, 6)), hour(1, 9)),
        ]);
        let opts = SubmitOptions::default();
        assert!(engine.check_precedence(&spans, Stream::Forecast, hour(1, 10), opts).is_ok());
        let err = engine
            .check_precedence(&spans, Stream::Forecast, hour(1, 9), opts)
            .unwrap_err();
        match err {
            GridStoreError::PrecedenceViolation { senior, senior_end, .. } => {
                assert_eq!(senior, "secondary_obs");
                assert_eq!(senior_end, "2020-01-01:09");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine
            .check_precedence(&spans, Stream::Forecast, hour(1, 2), SubmitOptions::forced())
            .is_ok());
    }

    #[test]
    fn test_check_precedence_observations() {
        let engine = SourcePriorityEngine::default();
        let spans = spans(&[
            (Stream::PrimaryObs, None, hour(1, 5)),
            (Stream::Forecast, Some(hour(1, 6)), hour(2, 9)),
        ]);
        let opts = SubmitOptions::default();
        assert!(engine.check_precedence(&spans, Stream::PrimaryObs, hour(1, 0), opts).is_ok());
        assert!(engine.check_precedence(&spans, Stream::SecondaryObs, hour(1, 6), opts).is_ok());
        assert!(engine
            .check_precedence(&spans, Stream::SecondaryObs, hour(1, 5), opts)
            .unwrap_err()
            .is_precedence_violation());
    }

    #[test]
    fn test_adjust_deletes_subsumed_span() {
        let mut spans = spans(&[
            (Stream::PrimaryObs, None, hour(1, 15)),
            (Stream::SecondaryObs, Some(hour(1, 3)), hour(1, 10)),
        ]);
        let outcome = SourcePriorityEngine::adjust_lower_precedence(
            &mut spans,
            Stream::PrimaryObs,
            Stream::SecondaryObs,
            hour(1, 0),
        );
        assert_eq!(outcome, SpanAdjustment::Deleted);
        assert!(spans.get(Stream::SecondaryObs).is_none());
    }

    #[test]
    fn test_adjust_truncates_overlapping_span() {
        let mut spans = spans(&[
            (Stream::PrimaryObs, None, hour(1, 5)),
            (Stream::SecondaryObs, None, hour(1, 10)),
        ]);
        let outcome = SourcePriorityEngine::adjust_lower_precedence(
            &mut spans,
            Stream::PrimaryObs,
            Stream::SecondaryObs,
            hour(1, 0),
        );
        assert_eq!(outcome, SpanAdjustment::Truncated(hour(1, 6)));
        assert_eq!(
            spans.get(Stream::SecondaryObs),
            Some(&SourceSpan::new(Some(hour(1, 6)), hour(1, 10)))
        );
    }

    #[test]
    fn test_adjust_leaves_later_span() {
        let mut spans = spans(&[
            (Stream::PrimaryObs, None, hour(1, 5)),
            (Stream::Forecast, Some(hour(1, 8)), hour(2, 10)),
        ]);
        let outcome = SourcePriorityEngine::adjust_lower_precedence(
            &mut spans,
            Stream::PrimaryObs,
            Stream::Forecast,
            hour(1, 0),
        );
        assert_eq!(outcome, SpanAdjustment::Unchanged);
    }

    #[test]
    fn test_submit_rejects_empty_and_misshapen() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = dataset();
        let opts = SubmitOptions::default();
        assert!(matches!(
            engine.submit(&mut dataset, Stream::PrimaryObs, hour(1, 0), vec![], opts),
            Err(GridStoreError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.submit(&mut dataset, Stream::PrimaryObs, hour(1, 0), vec![Grid::filled(3, 2, 0.0)], opts),
            Err(GridStoreError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            engine.submit(&mut dataset, Stream::PrimaryObs, hour(3, 23), vec![grid(0.0), grid(1.0)], opts),
            Err(GridStoreError::Bounds { .. })
        ));
        assert!(dataset.spans().latest_end().is_none());
    }

    #[test]
    fn test_submit_reports_span_changes() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = dataset();
        let opts = SubmitOptions::default();

        engine
            .submit(&mut dataset, Stream::SecondaryObs, hour(1, 0), vec![grid(1.0); 4], opts)
            .unwrap();
        engine
            .submit(&mut dataset, Stream::Forecast, hour(1, 4), vec![grid(2.0); 10], opts)
            .unwrap();

        let report = engine
            .submit(&mut dataset, Stream::PrimaryObs, hour(1, 0), vec![grid(3.0); 6], opts)
            .unwrap();
        assert_eq!(report.deleted, vec![Stream::SecondaryObs]);
        assert_eq!(report.truncated, vec![(Stream::Forecast, hour(1, 6))]);
        assert_eq!(report.span, Some(SourceSpan::new(Some(hour(1, 0)), hour(1, 5))));
        assert_eq!(dataset.last_obs_time(), Some(hour(1, 5)));
        assert_eq!(dataset.last_valid_time(), Some(hour(1, 13)));
    }

    #[test]
    fn test_secondary_does_not_touch_primary() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = dataset();
        let opts = SubmitOptions::default();
        engine
            .submit(&mut dataset, Stream::PrimaryObs, hour(1, 0), vec![grid(1.0); 3], opts)
            .unwrap();
        let report = engine
            .submit(&mut dataset, Stream::SecondaryObs, hour(1, 3), vec![grid(2.0); 5], opts)
            .unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(dataset.span(Stream::PrimaryObs).unwrap().end_time, hour(1, 2));
        assert_eq!(dataset.last_obs_time(), Some(hour(1, 7)));
    }

    #[test]
    fn test_gap_fill_dropped_inside_senior_span() {
        let mut streams = StreamsConfig::default();
        streams.secondary_obs = StreamConfig::with_fill(FillPolicy::Copy);
        let engine = SourcePriorityEngine::new(streams, InputProcessor::None);
        let mut dataset = dataset();
        let opts = SubmitOptions::default();

        engine
            .submit(&mut dataset, Stream::SecondaryObs, hour(1, 0), vec![grid(1.0)], opts)
            .unwrap();
        // primary claims hours 0-2 without the secondary span being adjusted
        let mut attrs = dataset.attributes().clone();
        attrs.spans.set(Stream::PrimaryObs, SourceSpan::new(None, hour(1, 2)));
        dataset.commit_attributes(attrs).unwrap();

        let report = engine
            .submit(&mut dataset, Stream::SecondaryObs, hour(1, 5), vec![grid(5.0)], opts)
            .unwrap();
        assert_eq!(report.filled_hours, 2);
        assert_eq!(report.first_hour, hour(1, 3));
        assert!(dataset.read_hour(hour(1, 2)).unwrap().is_all_missing());
        assert_eq!(dataset.read_hour(hour(1, 3)).unwrap(), grid(1.0));
    }

    #[test]
    fn test_failed_provenance_write_restores_grids() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = flaky_dataset();
        let opts = SubmitOptions::default();
        engine
            .submit(&mut dataset, Stream::PrimaryObs, hour(1, 0), vec![grid(1.0); 3], opts)
            .unwrap();

        dataset.store_mut().fail_provenance = true;
        let err = engine
            .submit(&mut dataset, Stream::PrimaryObs, hour(1, 2), vec![grid(7.0); 2], opts)
            .unwrap_err();
        assert!(matches!(err, GridStoreError::Storage(_)));

        assert_eq!(dataset.read_hour(hour(1, 2)).unwrap(), grid(1.0));
        assert!(dataset.read_hour(hour(1, 3)).unwrap().is_all_missing());
        assert_eq!(dataset.provenance_at(hour(1, 2)).unwrap().mean, 1.0);
        assert!(dataset.provenance_at(hour(1, 3)).unwrap().is_empty());
        assert_eq!(dataset.span(Stream::PrimaryObs).unwrap().end_time, hour(1, 2));
    }

    #[test]
    fn test_failed_attribute_write_restores_hours() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = flaky_dataset();
        let opts = SubmitOptions::default();
        engine
            .submit(&mut dataset, Stream::SecondaryObs, hour(1, 0), vec![grid(1.0); 2], opts)
            .unwrap();

        dataset.store_mut().fail_attributes = true;
        assert!(engine
            .submit(&mut dataset, Stream::SecondaryObs, hour(1, 1), vec![grid(4.0); 2], opts)
            .is_err());

        assert_eq!(dataset.read_hour(hour(1, 1)).unwrap(), grid(1.0));
        let record = dataset.provenance_at(hour(1, 1)).unwrap();
        assert_eq!(record.source, "secondary_obs");
        assert_eq!(record.mean, 1.0);
        assert!(dataset.read_hour(hour(1, 2)).unwrap().is_all_missing());
        assert!(dataset.provenance_at(hour(1, 2)).unwrap().is_empty());
        assert_eq!(dataset.span(Stream::SecondaryObs).unwrap().end_time, hour(1, 1));

        // the store works again once the failure has passed
        engine
            .submit(&mut dataset, Stream::SecondaryObs, hour(1, 1), vec![grid(4.0); 2], opts)
            .unwrap();
        assert_eq!(dataset.read_hour(hour(1, 2)).unwrap(), grid(4.0));
    }

    #[test]
    fn test_failed_repair_restores_grids() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = flaky_dataset();
        dataset.store_mut().fail_provenance = true;
        assert!(engine.repair(&mut dataset, hour(1, 0), vec![grid(9.0); 2]).is_err());
        assert!(dataset.read_hour(hour(1, 0)).unwrap().is_all_missing());
        assert!(dataset.read_hour(hour(1, 1)).unwrap().is_all_missing());
        assert!(dataset.provenance_at(hour(1, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_forced_span_starts_after_senior() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = dataset();
        engine
            .submit(&mut dataset, Stream::PrimaryObs, hour(1, 0), vec![grid(1.0); 10], SubmitOptions::default())
            .unwrap();

        let report = engine
            .submit(&mut dataset, Stream::Forecast, hour(1, 5), vec![grid(2.0); 10], SubmitOptions::forced())
            .unwrap();
        assert_eq!(report.span, Some(SourceSpan::new(Some(hour(1, 10)), hour(1, 14))));
        assert_eq!(dataset.span(Stream::Forecast), report.span);
        // the forced hours themselves are written and tagged
        assert_eq!(dataset.read_hour(hour(1, 5)).unwrap(), grid(2.0));
        assert_eq!(dataset.provenance_at(hour(1, 5)).unwrap().source, "forecast");

        let report = engine
            .submit(&mut dataset, Stream::SecondaryObs, hour(1, 2), vec![grid(3.0); 3], SubmitOptions::forced())
            .unwrap();
        assert_eq!(report.span, None);
        assert!(dataset.span(Stream::SecondaryObs).is_none());
        assert_eq!(dataset.last_obs_time(), Some(hour(1, 9)));
    }

    #[test]
    fn test_repair_rejects_empty_batch() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = dataset();
        assert!(matches!(
            engine.repair(&mut dataset, hour(1, 0), vec![]),
            Err(GridStoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_repair_only_unwritten_hours() {
        let engine = SourcePriorityEngine::default();
        let mut dataset = dataset();
        engine
            .submit(&mut dataset, Stream::PrimaryObs, hour(1, 2), vec![grid(1.0)], SubmitOptions::default())
            .unwrap();

        let err = engine
            .repair(&mut dataset, hour(1, 1), vec![grid(9.0); 2])
            .unwrap_err();
        assert!(err.is_precedence_violation());
        assert!(dataset.read_hour(hour(1, 1)).unwrap().is_all_missing());

        assert_eq!(engine.repair(&mut dataset, hour(1, 0), vec![grid(9.0); 2]).unwrap(), 2);
        let record = dataset.provenance_at(hour(1, 1)).unwrap();
        assert_eq!(record.source, FUDGED_TAG);
        assert_eq!(dataset.read_hour(hour(1, 1)).unwrap(), grid(9.0));
        assert_eq!(dataset.span(Stream::PrimaryObs).unwrap().end_time, hour(1, 2));
    }
}
