use crate::error::{ProcessingError, Result};
use crate::utils::constants::{
    CONFIG_ENV_PREFIX, DEFAULT_CHUNK_SIZE, DEFAULT_COVERAGE_THRESHOLD, DEFAULT_MAX_UPSAMPLE_FACTOR,
    DEFAULT_MIN_PIXELS_PER_POLYGON, DEFAULT_WEIGHT_TOLERANCE,
};
use chrono::Duration;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Spatial upsampling factor: a fixed integer multiple or chosen per polygon set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsampleFactor {
    #[default]
    Auto,
    Fixed(u32),
}

impl Serialize for UpsampleFactor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            UpsampleFactor::Auto => serializer.serialize_str("auto"),
            UpsampleFactor::Fixed(factor) => serializer.serialize_u32(*factor),
        }
    }
}

impl<'de> Deserialize<'de> for UpsampleFactor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FactorVisitor;

        impl Visitor<'_> for FactorVisitor {
            type Value = UpsampleFactor;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a positive integer or \"auto\"")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Self::Value, E> {
                u32::try_from(value)
                    .map(UpsampleFactor::Fixed)
                    .map_err(|_| E::custom(format!("upsample factor {} is too large", value)))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Self::Value, E> {
                if value < 0 {
                    return Err(E::custom(format!("upsample factor {} is negative", value)));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Self::Value, E> {
                let trimmed = value.trim();
                if trimmed.eq_ignore_ascii_case("auto") {
                    return Ok(UpsampleFactor::Auto);
                }
                trimmed
                    .parse::<u32>()
                    .map(UpsampleFactor::Fixed)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(FactorVisitor)
    }
}

/// Options recognised by every pipeline component.
///
/// Built with the `with_*` methods or loaded from a TOML file layered under
/// `PRECIP_ZONAL_*` environment variables. Components receive the config
/// explicitly; nothing reads it from global state.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// Backward shift of accumulation timestamps, in minutes. `None` uses the native step.
    #[validate(range(min = 1))]
    pub shift_unit: Option<u32>,

    #[validate(range(min = 1))]
    pub min_pixels_per_polygon: usize,

    #[validate(range(min = 0.0, max = 1.0))]
    pub coverage_threshold: f64,

    pub upsample_factor: UpsampleFactor,

    /// Upper bound for the automatic factor search.
    #[validate(range(min = 1, max = 256))]
    pub max_upsample_factor: u32,

    pub weight_cache_path: Option<PathBuf>,

    #[validate(range(min = 0.0, max = 1.0))]
    pub weight_tolerance: f64,

    #[validate(range(min = 1))]
    pub max_workers: usize,

    /// Days per aggregation partition.
    #[validate(range(min = 1))]
    pub chunk_size: usize,

    pub compression: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shift_unit: None,
            min_pixels_per_polygon: DEFAULT_MIN_PIXELS_PER_POLYGON,
            coverage_threshold: DEFAULT_COVERAGE_THRESHOLD,
            upsample_factor: UpsampleFactor::Auto,
            max_upsample_factor: DEFAULT_MAX_UPSAMPLE_FACTOR,
            weight_cache_path: None,
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
            max_workers: num_cpus::get(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: "snappy".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an optional TOML/JSON/YAML file, then `PRECIP_ZONAL_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(CONFIG_ENV_PREFIX).try_parsing(true),
        );

        let loaded: PipelineConfig = builder.build()?.try_deserialize()?;
        loaded.validated()
    }

    /// Run field validation plus the cross-field checks the derive cannot express.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;

        if let UpsampleFactor::Fixed(factor) = self.upsample_factor {
            if factor == 0 || factor > self.max_upsample_factor {
                return Err(ProcessingError::Config(format!(
                    "upsample_factor must be between 1 and {}, got {}",
                    self.max_upsample_factor, factor
                )));
            }
        }

        match self.compression.to_lowercase().as_str() {
            "snappy" | "gzip" | "lz4" | "zstd" | "none" => {}
            other => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    other
                )))
            }
        }

        Ok(self)
    }

    pub fn shift_duration(&self) -> Option<Duration> {
        self.shift_unit.map(|minutes| Duration::minutes(minutes as i64))
    }

    pub fn with_shift_unit(mut self, minutes: u32) -> Self {
        self.shift_unit = Some(minutes);
        self
    }

    pub fn with_min_pixels_per_polygon(mut self, pixels: usize) -> Self {
        self.min_pixels_per_polygon = pixels;
        self
    }

    pub fn with_coverage_threshold(mut self, threshold: f64) -> Self {
        self.coverage_threshold = threshold;
        self
    }

    pub fn with_upsample_factor(mut self, factor: UpsampleFactor) -> Self {
        self.upsample_factor = factor;
        self
    }

    pub fn with_weight_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.weight_cache_path = Some(path.into());
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_compression(mut self, compression: &str) -> Self {
        self.compression = compression.to_string();
        self
    }
}
