//! Dataset configuration, built once when a dataset is created.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GridStoreError, Result};
use crate::gap_fill::{FillPolicy, GapFiller};
use crate::processors::InputProcessor;
use crate::time::{hour_serde, TimeAxis};
use crate::types::{Dimensions, Stream};

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Configuration for one hourly grid dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset name, e.g. "TMP".
    pub name: String,

    /// Physical units label.
    #[serde(default)]
    pub units: String,

    /// Timezone label recorded with the dataset.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// First hour in the dataset.
    #[serde(with = "hour_serde")]
    pub start_time: DateTime<Utc>,

    /// Last hour in the dataset (inclusive).
    #[serde(with = "hour_serde")]
    pub end_time: DateTime<Utc>,

    /// Number of latitude rows in each grid.
    pub rows: usize,

    /// Number of longitude columns in each grid.
    pub cols: usize,

    /// Chunked array settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Clean-up applied to every incoming grid.
    #[serde(default)]
    pub processor: InputProcessor,

    /// Per-stream gap fill settings.
    #[serde(default)]
    pub streams: StreamsConfig,
}

impl DatasetConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GridStoreError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Override storage settings from environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.storage.apply_env_overrides();
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GridStoreError::config("dataset name must not be empty"));
        }

        if self.rows == 0 || self.cols == 0 {
            return Err(GridStoreError::config(format!(
                "grid dimensions must be > 0, got {}x{}",
                self.rows, self.cols
            )));
        }

        if self.end_time < self.start_time {
            return Err(GridStoreError::config("end_time must not precede start_time"));
        }

        self.storage.validate()
    }

    /// The dataset's time axis.
    pub fn time_axis(&self) -> Result<TimeAxis> {
        TimeAxis::new(self.start_time, self.end_time, self.timezone.clone())
    }

    /// Array dimensions implied by the time window and grid shape.
    pub fn dimensions(&self) -> Result<Dimensions> {
        Ok(Dimensions::new(self.time_axis()?.len(), self.rows, self.cols))
    }

    /// Replace the time window with one centred on a reference hour.
    pub fn with_window_around(
        mut self,
        reference: DateTime<Utc>,
        obs_days: u32,
        fcast_days: u32,
    ) -> Result<Self> {
        let axis = TimeAxis::around(reference, obs_days, fcast_days, self.timezone.clone())?;
        self.start_time = axis.start();
        self.end_time = axis.end();
        Ok(self)
    }
}

/// Chunked array storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Number of hours per chunk along the time dimension.
    pub chunk_hours: usize,

    /// Compression codec for the grid array.
    pub compression: ZarrCompression,

    /// Compression level (1-9).
    pub compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub shuffle: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_hours: 24,
            compression: ZarrCompression::BloscZstd,
            compression_level: 1,
            shuffle: true,
        }
    }
}

impl StorageConfig {
    /// Override settings from environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOURLY_GRID_CHUNK_HOURS") {
            if let Ok(hours) = val.parse() {
                self.chunk_hours = hours;
            }
        }

        if let Ok(val) = std::env::var("HOURLY_GRID_COMPRESSION") {
            match val.parse() {
                Ok(compression) => self.compression = compression,
                Err(_) => warn!(
                    value = %val,
                    keeping = %self.compression,
                    "Ignoring unknown HOURLY_GRID_COMPRESSION"
                ),
            }
        }

        if let Ok(val) = std::env::var("HOURLY_GRID_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                self.compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("HOURLY_GRID_SHUFFLE") {
            self.shuffle = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Validate the storage settings.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_hours == 0 {
            return Err(GridStoreError::config("chunk_hours must be > 0"));
        }

        if self.compression != ZarrCompression::None
            && (self.compression_level == 0 || self.compression_level > 9)
        {
            return Err(GridStoreError::config("compression_level must be 1-9"));
        }

        Ok(())
    }
}

/// Compression of grid chunks. Both compressors run inside Blosc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    None,
    /// Blosc with LZ4; `lz4` is accepted as an alias.
    #[serde(alias = "lz4")]
    BloscLz4,
    /// Blosc with Zstd; `zstd` is accepted as an alias.
    #[default]
    #[serde(alias = "zstd")]
    BloscZstd,
}

impl ZarrCompression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl FromStr for ZarrCompression {
    type Err = GridStoreError;

    /// Case-insensitive; unknown names are an error.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lz4" | "blosc_lz4" => Ok(Self::BloscLz4),
            "zstd" | "blosc_zstd" => Ok(Self::BloscZstd),
            other => Err(GridStoreError::config(format!(
                "unknown compression '{}', expected none, blosc_lz4 or blosc_zstd",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gap fill settings of one stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Policy used when a write leaves a hole after the stream's last hour.
    /// No policy means gaps stay missing.
    #[serde(default)]
    pub fill: Option<FillPolicy>,

    /// Round synthesized increments to this many decimals.
    #[serde(default)]
    pub fill_decimals: Option<u32>,

    /// Free-form description of the upstream product (e.g. "URMA").
    #[serde(default)]
    pub description: String,
}

impl StreamConfig {
    /// A stream config with a fill policy and no rounding.
    pub fn with_fill(policy: FillPolicy) -> Self {
        Self {
            fill: Some(policy),
            ..Default::default()
        }
    }

    /// The gap filler for this stream, if it fills gaps at all.
    pub fn gap_filler(&self) -> Option<GapFiller> {
        self.fill.map(|policy| GapFiller::new(policy, self.fill_decimals))
    }
}

/// Settings for all three streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamsConfig {
    #[serde(default)]
    pub primary_obs: StreamConfig,
    #[serde(default)]
    pub secondary_obs: StreamConfig,
    #[serde(default)]
    pub forecast: StreamConfig,
}

impl StreamsConfig {
    pub fn get(&self, stream: Stream) -> &StreamConfig {
        match stream {
            Stream::PrimaryObs => &self.primary_obs,
            Stream::SecondaryObs => &self.secondary_obs,
            Stream::Forecast => &self.forecast,
        }
    }
}
