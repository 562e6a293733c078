use crate::error::{ProcessingError, Result};
use crate::models::GridGeometry;
use crate::utils::constants::{
    CRS_METADATA_KEY, DEFAULT_CRS, LATITUDE_COLUMN, LONGITUDE_COLUMN, TIME_COLUMN,
};
use arrow::array::{Array, ArrayRef, Float64Array, TimestampSecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime};
use ndarray::Array2;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// One decoded fragment: a variable on a grid at one or more timestamps.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub source: String,
    pub variable: String,
    pub grid: GridGeometry,
    pub fields: Vec<(NaiveDateTime, Array2<f64>)>,
}

impl Fragment {
    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let first = self.fields.iter().map(|(t, _)| *t).min()?;
        let last = self.fields.iter().map(|(t, _)| *t).max()?;
        Some((first, last))
    }
}

/// Reads long-format Parquet fragments (`time`, `latitude`, `longitude`, `<variable>`).
pub struct FragmentReader {
    batch_size: usize,
}

impl FragmentReader {
    pub fn new() -> Self {
        Self { batch_size: 8192 }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn read(&self, path: &Path) -> Result<Fragment> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

        let crs = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kvs| kvs.iter().find(|kv| kv.key == CRS_METADATA_KEY))
            .and_then(|kv| kv.value.clone())
            .unwrap_or_else(|| DEFAULT_CRS.to_string());

        let variable = Self::variable_name(builder.schema().fields().iter().map(|f| f.name()))?;
        let reader = builder.with_batch_size(self.batch_size).build()?;

        let mut samples = Samples::default();
        for batch in reader {
            samples.extend(&batch?, &variable)?;
        }

        let source = path.display().to_string();
        let fragment = samples.into_fragment(source, variable, crs)?;
        debug!(
            fragment = %fragment.source,
            variable = %fragment.variable,
            timestamps = fragment.fields.len(),
            "read fragment"
        );
        Ok(fragment)
    }

    /// The single column that is not a coordinate names the variable.
    fn variable_name<'a>(columns: impl Iterator<Item = &'a String>) -> Result<String> {
        let data_columns: Vec<&String> = columns
            .filter(|name| {
                !matches!(
                    name.as_str(),
                    TIME_COLUMN | LATITUDE_COLUMN | LONGITUDE_COLUMN
                )
            })
            .collect();

        match data_columns.as_slice() {
            [single] => Ok((*single).clone()),
            [] => Err(ProcessingError::InvalidFormat(
                "Fragment has no data variable column".to_string(),
            )),
            many => Err(ProcessingError::InvalidFormat(format!(
                "Fragment must hold exactly one variable, found {:?}",
                many
            ))),
        }
    }
}

impl Default for FragmentReader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Samples {
    times: Vec<i64>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    values: Vec<f64>,
}

impl Samples {
    fn extend(&mut self, batch: &RecordBatch, variable: &str) -> Result<()> {
        let times = column_as(batch, TIME_COLUMN, &DataType::Timestamp(TimeUnit::Second, None))?;
        let times = times
            .as_any()
            .downcast_ref::<TimestampSecondArray>()
            .ok_or_else(|| ProcessingError::InvalidFormat("Invalid time column type".to_string()))?;
        let latitudes = float_column(batch, LATITUDE_COLUMN)?;
        let longitudes = float_column(batch, LONGITUDE_COLUMN)?;
        let values = float_column(batch, variable)?;

        if times.null_count() > 0 || latitudes.null_count() > 0 || longitudes.null_count() > 0 {
            return Err(ProcessingError::InvalidFormat(
                "Coordinate columns must not contain nulls".to_string(),
            ));
        }

        self.times.extend(times.values().iter().copied());
        self.latitudes.extend(latitudes.values().iter().copied());
        self.longitudes.extend(longitudes.values().iter().copied());
        // missing cells become NaN
        self.values
            .extend(values.iter().map(|v| v.unwrap_or(f64::NAN)));
        Ok(())
    }

    fn into_fragment(self, source: String, variable: String, crs: String) -> Result<Fragment> {
        if self.times.is_empty() {
            return Err(ProcessingError::MissingData(format!(
                "Fragment {} has no rows",
                source
            )));
        }

        let grid = GridGeometry::from_centers(crs, &self.latitudes, &self.longitudes)?;
        let shape = grid.shape();

        let mut fields: BTreeMap<i64, (Array2<f64>, usize)> = BTreeMap::new();
        let mut seen: BTreeMap<i64, Array2<bool>> = BTreeMap::new();

        for i in 0..self.times.len() {
            let (row, col) = grid
                .locate_center(self.latitudes[i], self.longitudes[i])
                .ok_or_else(|| {
                    ProcessingError::InvalidFormat(format!(
                        "Coordinate ({}, {}) lies outside the fragment grid",
                        self.latitudes[i], self.longitudes[i]
                    ))
                })?;

            let time = self.times[i];
            let mask = seen.entry(time).or_insert_with(|| Array2::from_elem(shape, false));
            if mask[[row, col]] {
                return Err(ProcessingError::InvalidFormat(format!(
                    "Cell ({}, {}) appears twice at {}",
                    self.latitudes[i],
                    self.longitudes[i],
                    to_datetime(time)?
                )));
            }
            mask[[row, col]] = true;

            let (values, filled) = fields
                .entry(time)
                .or_insert_with(|| (Array2::from_elem(shape, f64::NAN), 0));
            values[[row, col]] = self.values[i];
            *filled += 1;
        }

        let cells = grid.cell_count();
        let mut decoded = Vec::with_capacity(fields.len());
        for (time, (values, filled)) in fields {
            let timestamp = to_datetime(time)?;
            if filled != cells {
                return Err(ProcessingError::InvalidFormat(format!(
                    "Timestamp {} covers {} of {} grid cells",
                    timestamp, filled, cells
                )));
            }
            decoded.push((timestamp, values));
        }

        Ok(Fragment {
            source,
            variable,
            grid,
            fields: decoded,
        })
    }
}

fn column_as(batch: &RecordBatch, name: &str, data_type: &DataType) -> Result<ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("Missing column '{}'", name)))?;
    Ok(cast(column, data_type)?)
}

fn float_column(batch: &RecordBatch, name: &str) -> Result<Float64Array> {
    let column = column_as(batch, name, &DataType::Float64)?;
    column
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("Invalid {} column type", name)))
}

fn to_datetime(seconds: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("Invalid timestamp: {}", seconds)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GriddedField, TimeCube};
    use crate::writers::CubeWriter;
    use arrow::datatypes::{Field, Schema};
    use chrono::NaiveDate;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_reads_what_cube_writer_writes() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("tp-2023.parquet");

        let grid = Arc::new(GridGeometry::new("EPSG:4326", 14.0, 12.0, 0.25, 0.25, 2, 3)?);
        let values = Array2::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as f64);
        let fields = vec![
            GriddedField::new(at(1, 3), grid.clone(), values.clone())?,
            GriddedField::new(at(1, 0), grid.clone(), values.mapv(|v| v * 2.0))?,
        ];
        let cube = TimeCube::new("tp", grid.clone(), fields)?;
        CubeWriter::new().write_cube(&cube, &path)?;

        let fragment = FragmentReader::new().read(&path)?;
        assert_eq!(fragment.variable, "tp");
        assert!(fragment.grid.mismatch(&grid).is_none());
        assert_eq!(fragment.fields.len(), 2);
        assert_eq!(fragment.fields[0].0, at(1, 0));
        assert_eq!(fragment.fields[1].1, values);
        assert_eq!(fragment.time_range(), Some((at(1, 0), at(1, 3))));
        Ok(())
    }

    #[test]
    fn test_incomplete_timestamp_is_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("broken.parquet");

        // 2x2 grid at the first time, one cell missing at the second
        let schema = Arc::new(Schema::new(vec![
            Field::new(TIME_COLUMN, DataType::Timestamp(TimeUnit::Second, None), false),
            Field::new(LATITUDE_COLUMN, DataType::Float64, false),
            Field::new(LONGITUDE_COLUMN, DataType::Float64, false),
            Field::new("tp", DataType::Float64, true),
        ]));
        let t0 = at(1, 0).and_utc().timestamp();
        let t1 = at(1, 3).and_utc().timestamp();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(TimestampSecondArray::from(vec![t0, t0, t0, t0, t1, t1, t1])),
                Arc::new(Float64Array::from(vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0])),
                Arc::new(Float64Array::from(vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0])),
                Arc::new(Float64Array::from(vec![0.1; 7])),
            ],
        )?;
        let mut writer = ArrowWriter::try_new(File::create(&path)?, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        let result = FragmentReader::new().read(&path);
        assert!(matches!(result, Err(ProcessingError::InvalidFormat(msg)) if msg.contains("3 of 4")));
        Ok(())
    }

    #[test]
    fn test_variable_name_requires_single_data_column() {
        let names = ["time", "latitude", "longitude", "tp", "t2m"].map(String::from);
        assert!(FragmentReader::variable_name(names.iter()).is_err());

        let names = ["time", "latitude", "longitude", "tp"].map(String::from);
        assert_eq!(FragmentReader::variable_name(names.iter()).unwrap(), "tp");
    }
}
