//! Per-stream time spans carried as dataset metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Stream;

/// Hours claimed by one merge stream.
///
/// `start_time` is optional; when absent the span runs from the beginning
/// of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
}

impl SourceSpan {
    pub fn new(start_time: Option<DateTime<Utc>>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// First hour of the span, resolving an absent start to `dataset_start`.
    pub fn start_or(&self, dataset_start: DateTime<Utc>) -> DateTime<Utc> {
        self.start_time.unwrap_or(dataset_start)
    }
}

/// The spans of all three streams for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanTable {
    primary_obs: Option<SourceSpan>,
    secondary_obs: Option<SourceSpan>,
    forecast: Option<SourceSpan>,
}

impl SpanTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stream: Stream) -> Option<&SourceSpan> {
        self.slot(stream).as_ref()
    }

    pub fn set(&mut self, stream: Stream, span: SourceSpan) {
        *self.slot_mut(stream) = Some(span);
    }

    /// Remove a stream's span, returning what was there.
    pub fn remove(&mut self, stream: Stream) -> Option<SourceSpan> {
        self.slot_mut(stream).take()
    }

    pub fn end_time(&self, stream: Stream) -> Option<DateTime<Utc>> {
        self.get(stream).map(|span| span.end_time)
    }

    /// Latest hour claimed by either observational stream, with its owner.
    ///
    /// Ties go to the primary stream.
    pub fn latest_observation(&self) -> Option<(Stream, DateTime<Utc>)> {
        match (
            self.end_time(Stream::PrimaryObs),
            self.end_time(Stream::SecondaryObs),
        ) {
            (Some(p), Some(s)) if s > p => Some((Stream::SecondaryObs, s)),
            (Some(p), _) => Some((Stream::PrimaryObs, p)),
            (None, Some(s)) => Some((Stream::SecondaryObs, s)),
            (None, None) => None,
        }
    }

    /// Latest end time of any stream.
    pub fn latest_end(&self) -> Option<DateTime<Utc>> {
        Stream::ALL.iter().filter_map(|s| self.end_time(*s)).max()
    }

    /// Iterate the spans that are present.
    pub fn iter(&self) -> impl Iterator<Item = (Stream, &SourceSpan)> {
        Stream::ALL
            .iter()
            .filter_map(move |s| self.get(*s).map(|span| (*s, span)))
    }

    fn slot(&self, stream: Stream) -> &Option<SourceSpan> {
        match stream {
            Stream::PrimaryObs => &self.primary_obs,
            Stream::SecondaryObs => &self.secondary_obs,
            Stream::Forecast => &self.forecast,
        }
    }

    fn slot_mut(&mut self, stream: Stream) -> &mut Option<SourceSpan> {
        match stream {
            Stream::PrimaryObs => &mut self.primary_obs,
            Stream::SecondaryObs => &mut self.secondary_obs,
            Stream::Forecast => &mut self.forecast,
        }
    }
}
