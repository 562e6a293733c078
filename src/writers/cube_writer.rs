use crate::error::Result;
use crate::models::TimeCube;
use crate::utils::constants::{
    CRS_METADATA_KEY, DAILY_FREQUENCY, DEFAULT_ROW_GROUP_SIZE, FREQUENCY_METADATA_KEY,
    LATITUDE_COLUMN, LONGITUDE_COLUMN, TIME_COLUMN,
};
use crate::writers::parquet_writer::{parse_compression, stage, StagedFile};
use arrow::array::{Float64Array, TimestampSecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Writes a [`TimeCube`] in the long layout the fragment reader accepts:
/// one row per (time, cell) with the variable as the only data column.
pub struct CubeWriter {
    compression: Compression,
    frequency: Option<String>,
}

impl CubeWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            frequency: None,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = parse_compression(compression)?;
        Ok(self)
    }

    /// Tag the file as a daily product.
    pub fn daily(mut self) -> Self {
        self.frequency = Some(DAILY_FREQUENCY.to_string());
        self
    }

    pub fn write_cube(&self, cube: &TimeCube, path: &Path) -> Result<()> {
        self.stage_cube(cube, path)?.commit()?;
        info!(
            path = %path.display(),
            timestamps = cube.len(),
            cells = cube.grid().cell_count(),
            "wrote cube"
        );
        Ok(())
    }

    /// Encode `cube` next to `path` without publishing it yet.
    pub fn stage_cube(&self, cube: &TimeCube, path: &Path) -> Result<StagedFile> {
        let schema = Arc::new(Schema::new(vec![
            Field::new(TIME_COLUMN, DataType::Timestamp(TimeUnit::Second, None), false),
            Field::new(LATITUDE_COLUMN, DataType::Float64, false),
            Field::new(LONGITUDE_COLUMN, DataType::Float64, false),
            Field::new(cube.variable(), DataType::Float64, true),
        ]));

        let mut metadata = vec![KeyValue::new(
            CRS_METADATA_KEY.to_string(),
            cube.crs().to_string(),
        )];
        if let Some(frequency) = &self.frequency {
            metadata.push(KeyValue::new(
                FREQUENCY_METADATA_KEY.to_string(),
                frequency.clone(),
            ));
        }
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(DEFAULT_ROW_GROUP_SIZE)
            .set_key_value_metadata(Some(metadata))
            .build();

        let grid = cube.grid();
        let latitudes = grid.latitudes();
        let longitudes = grid.longitudes();
        let cells = grid.cell_count();

        // row-major cell coordinates, shared by every timestamp
        let cell_lats: Vec<f64> = latitudes
            .iter()
            .flat_map(|lat| std::iter::repeat(*lat).take(longitudes.len()))
            .collect();
        let cell_lons: Vec<f64> = latitudes
            .iter()
            .flat_map(|_| longitudes.iter().copied())
            .collect();
        let cell_lats = Arc::new(Float64Array::from(cell_lats));
        let cell_lons = Arc::new(Float64Array::from(cell_lons));

        stage(path, |file| {
            let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
            for field in cube.fields() {
                let seconds = field.timestamp().and_utc().timestamp();
                let values: Vec<f64> = field.values().iter().copied().collect();
                let batch = RecordBatch::try_new(
                    schema.clone(),
                    vec![
                        Arc::new(TimestampSecondArray::from(vec![seconds; cells])),
                        cell_lats.clone(),
                        cell_lons.clone(),
                        Arc::new(Float64Array::from(values)),
                    ],
                )?;
                writer.write(&batch)?;
            }
            writer.close()?;
            Ok(())
        })
    }
}

impl Default for CubeWriter {
    fn default() -> Self {
        Self::new()
    }
}
