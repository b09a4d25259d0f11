//! Dataset metadata persisted in the store's attribute map.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::DatasetConfig;
use crate::error::{GridStoreError, Result};
use crate::span::{SourceSpan, SpanTable};
use crate::store::Attributes;
use crate::time::{format_hour, parse_hour, TimeAxis};
use crate::types::Stream;

/// Typed view of the dataset attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetAttributes {
    pub name: String,
    pub units: String,
    pub timezone: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub rows: usize,
    pub cols: usize,
    pub spans: SpanTable,
    /// Latest hour held by either observational stream.
    pub last_obs_time: Option<DateTime<Utc>>,
    /// Latest hour held by any stream.
    pub last_valid_time: Option<DateTime<Utc>>,
}

impl DatasetAttributes {
    /// Attributes of a freshly built dataset: no spans, no markers.
    pub fn from_config(config: &DatasetConfig) -> Result<Self> {
        let axis = config.time_axis()?;
        Ok(Self {
            name: config.name.clone(),
            units: config.units.clone(),
            timezone: config.timezone.clone(),
            start_time: axis.start(),
            end_time: axis.end(),
            rows: config.rows,
            cols: config.cols,
            spans: SpanTable::new(),
            last_obs_time: None,
            last_valid_time: None,
        })
    }

    pub fn time_axis(&self) -> Result<TimeAxis> {
        TimeAxis::new(self.start_time, self.end_time, self.timezone.clone())
    }

    /// Encode into the flat attribute map stored with the array.
    pub fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), json!(self.name));
        attrs.insert("units".to_string(), json!(self.units));
        attrs.insert("timezone".to_string(), json!(self.timezone));
        attrs.insert("start_time".to_string(), json!(format_hour(&self.start_time)));
        attrs.insert("end_time".to_string(), json!(format_hour(&self.end_time)));
        let num_hours = (self.end_time - self.start_time).num_hours() + 1;
        attrs.insert("num_hours".to_string(), json!(num_hours));
        attrs.insert("rows".to_string(), json!(self.rows));
        attrs.insert("cols".to_string(), json!(self.cols));
        attrs.insert("missing".to_string(), json!("NaN"));

        for (stream, span) in self.spans.iter() {
            if let Some(start) = span.start_time {
                attrs.insert(start_key(stream), json!(format_hour(&start)));
            }
            attrs.insert(end_key(stream), json!(format_hour(&span.end_time)));
        }

        if let Some(t) = self.last_obs_time {
            attrs.insert("last_obs_time".to_string(), json!(format_hour(&t)));
        }
        if let Some(t) = self.last_valid_time {
            attrs.insert("last_valid_time".to_string(), json!(format_hour(&t)));
        }
        attrs
    }

    /// Decode from a stored attribute map.
    pub fn from_attributes(attrs: &Attributes) -> Result<Self> {
        let mut spans = SpanTable::new();
        for stream in Stream::ALL {
            if let Some(end) = optional_hour(attrs, &end_key(stream))? {
                let start = optional_hour(attrs, &start_key(stream))?;
                spans.set(stream, SourceSpan::new(start, end));
            }
        }

        Ok(Self {
            name: required_str(attrs, "name")?,
            units: optional_str(attrs, "units"),
            timezone: optional_str(attrs, "timezone"),
            start_time: required_hour(attrs, "start_time")?,
            end_time: required_hour(attrs, "end_time")?,
            rows: required_usize(attrs, "rows")?,
            cols: required_usize(attrs, "cols")?,
            spans,
            last_obs_time: optional_hour(attrs, "last_obs_time")?,
            last_valid_time: optional_hour(attrs, "last_valid_time")?,
        })
    }
}

fn start_key(stream: Stream) -> String {
    format!("{}_start_time", stream.as_str())
}

fn end_key(stream: Stream) -> String {
    format!("{}_end_time", stream.as_str())
}

fn required_str(attrs: &Attributes, key: &str) -> Result<String> {
    attrs
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GridStoreError::invalid_metadata(format!("missing attribute '{}'", key)))
}

fn optional_str(attrs: &Attributes, key: &str) -> String {
    attrs
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn required_hour(attrs: &Attributes, key: &str) -> Result<DateTime<Utc>> {
    parse_hour(&required_str(attrs, key)?)
}

fn optional_hour(attrs: &Attributes, key: &str) -> Result<Option<DateTime<Utc>>> {
    match attrs.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_hour(s).map(Some),
        Some(other) => Err(GridStoreError::invalid_metadata(format!(
            "attribute '{}' is not a time string: {}",
            key, other
        ))),
    }
}

fn required_usize(attrs: &Attributes, key: &str) -> Result<usize> {
    attrs
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .ok_or_else(|| GridStoreError::invalid_metadata(format!("missing attribute '{}'", key)))
}
