/// Fragment and cube column names
pub const TIME_COLUMN: &str = "time";
pub const LATITUDE_COLUMN: &str = "latitude";
pub const LONGITUDE_COLUMN: &str = "longitude";

/// Fragment and cube key/value metadata
pub const CRS_METADATA_KEY: &str = "crs";
pub const FREQUENCY_METADATA_KEY: &str = "frequency";
pub const DAILY_FREQUENCY: &str = "daily";
pub const DEFAULT_CRS: &str = "EPSG:4326";

/// Relative tolerance used when comparing grid spacing and origins
pub const GRID_TOLERANCE: f64 = 1e-6;

/// Pipeline defaults
pub const DEFAULT_MIN_PIXELS_PER_POLYGON: usize = 4;
pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 1e-3;
pub const DEFAULT_MAX_UPSAMPLE_FACTOR: u32 = 16;
pub const DEFAULT_CHUNK_SIZE: usize = 32;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Boundary attribute defaults (COD-AB naming)
pub const DEFAULT_CODE_FIELD: &str = "ADM2_PCODE";
pub const DEFAULT_NAME_FIELD: &str = "ADM2_EN";
pub const DEFAULT_ADMIN_LEVEL: u8 = 2;

/// Environment prefix for configuration overrides
pub const CONFIG_ENV_PREFIX: &str = "PRECIP_ZONAL";

/// ADM1 units monitored by the Chad anticipatory action framework
pub const AOI_ADM1_PCODES: &[&str] = &["TD01", "TD06", "TD07", "TD14", "TD17", "TD19", "TD21"];

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
