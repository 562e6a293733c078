use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{ResultTable, ZonalStatistic};
use crate::utils::constants::DEFAULT_ROW_GROUP_SIZE;
use chrono::NaiveDate;
use arrow::array::*;
use arrow::datatypes::{DataType, Date32Type, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub(crate) fn parse_compression(compression: &str) -> Result<Compression> {
    Ok(match compression.to_lowercase().as_str() {
        "snappy" => Compression::SNAPPY,
        "gzip" => Compression::GZIP(GzipLevel::default()),
        "lz4" => Compression::LZ4,
        "zstd" => Compression::ZSTD(ZstdLevel::default()),
        "none" => Compression::UNCOMPRESSED,
        _ => {
            return Err(ProcessingError::Config(format!(
                "Unsupported compression: {}",
                compression
            )))
        }
    })
}

/// A fully written file sitting next to its destination, not yet visible
/// under the final name.
///
/// Dropping it without [`StagedFile::commit`] deletes the temporary file, so
/// several outputs can be staged and only published once all of them wrote.
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged file over its target.
    pub fn commit(self) -> Result<()> {
        self.temp.persist(&self.target)?;
        debug!(path = %self.target.display(), "committed staged file");
        Ok(())
    }
}

/// Write to a temporary file in the destination directory without touching
/// `path` itself.
pub(crate) fn stage<F>(path: &Path, write: F) -> Result<StagedFile>
where
    F: FnOnce(File) -> Result<()>,
{
    if path.is_dir() {
        return Err(ProcessingError::InvalidFormat(format!(
            "Output path {} is a directory",
            path.display()
        )));
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    write(temp.as_file().try_clone()?)?;
    temp.as_file().sync_all()?;
    Ok(StagedFile {
        temp,
        target: path.to_path_buf(),
    })
}

/// Stage and commit in one step. A failed write leaves any existing file
/// untouched.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(File) -> Result<()>,
{
    stage(path, write)?.commit()
}

/// Persists [`ResultTable`]s as Parquet.
pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new().with_compression(&config.compression)
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = parse_compression(compression)?;
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("date", DataType::Date32, false),
            Field::new("region_code", DataType::Utf8, false),
            Field::new("mean_value", DataType::Float64, false),
            Field::new("pixel_count", DataType::Int64, false),
            Field::new("coverage_fraction", DataType::Float64, false),
            Field::new("low_coverage", DataType::Boolean, false),
        ]))
    }

    /// Write `table` to `path`, replacing any previous file atomically.
    ///
    /// An empty table still produces a file carrying the schema.
    pub fn write_table(&self, table: &ResultTable, path: &Path) -> Result<()> {
        self.stage_table(table, path)?.commit()?;
        info!(path = %path.display(), rows = table.len(), "wrote result table");
        Ok(())
    }

    /// Encode `table` for `path` without publishing it yet.
    pub fn stage_table(&self, table: &ResultTable, path: &Path) -> Result<StagedFile> {
        let schema = Self::schema();
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        stage(path, |file| {
            let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
            for chunk in table.rows().chunks(self.row_group_size) {
                let batch = Self::rows_to_batch(chunk, schema.clone())?;
                writer.write(&batch)?;
            }
            writer.close()?;
            Ok(())
        })
    }

    /// Merge `table` into the file at `path`, replacing the rows dated inside
    /// `range`, or inside `table`'s own dates when no range is given.
    ///
    /// Returns the table that was written.
    pub fn write_replacing(
        &self,
        table: &ResultTable,
        range: Option<(NaiveDate, NaiveDate)>,
        path: &Path,
    ) -> Result<ResultTable> {
        let (merged, staged) = self.stage_replacing(table, range, path)?;
        staged.commit()?;
        info!(path = %path.display(), rows = merged.len(), "wrote result table");
        Ok(merged)
    }

    /// The merge of [`ParquetWriter::write_replacing`], staged but not committed.
    pub fn stage_replacing(
        &self,
        table: &ResultTable,
        range: Option<(NaiveDate, NaiveDate)>,
        path: &Path,
    ) -> Result<(ResultTable, StagedFile)> {
        let range = range.or_else(|| table.date_range());
        let merged = match range {
            Some(range) if path.exists() => {
                let existing = self.read_table(path)?;
                debug!(
                    existing = existing.len(),
                    incoming = table.len(),
                    start = %range.0,
                    end = %range.1,
                    "replacing date range"
                );
                existing.replace_range(table.clone(), range)?
            }
            None if path.exists() => self.read_table(path)?,
            _ => table.clone(),
        };

        let staged = self.stage_table(&merged, path)?;
        Ok((merged, staged))
    }

    fn rows_to_batch(rows: &[ZonalStatistic], schema: Arc<Schema>) -> Result<RecordBatch> {
        let dates: Vec<i32> = rows.iter().map(|r| Date32Type::from_naive_date(r.date)).collect();
        let codes: Vec<&str> = rows.iter().map(|r| r.region_code.as_str()).collect();
        let means: Vec<f64> = rows.iter().map(|r| r.mean_value).collect();
        let counts: Vec<i64> = rows.iter().map(|r| r.pixel_count).collect();
        let coverage: Vec<f64> = rows.iter().map(|r| r.coverage_fraction).collect();
        let flags: Vec<bool> = rows.iter().map(|r| r.low_coverage).collect();

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Date32Array::from(dates)),
                Arc::new(StringArray::from(codes)),
                Arc::new(Float64Array::from(means)),
                Arc::new(Int64Array::from(counts)),
                Arc::new(Float64Array::from(coverage)),
                Arc::new(BooleanArray::from(flags)),
            ],
        )?;
        Ok(batch)
    }

    fn batch_to_rows(batch: &RecordBatch, limit: usize) -> Result<Vec<ZonalStatistic>> {
        fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<T>())
                .ok_or_else(|| {
                    ProcessingError::InvalidFormat(format!("Missing or invalid {} column", name))
                })
        }

        let dates = column::<Date32Array>(batch, "date")?;
        let codes = column::<StringArray>(batch, "region_code")?;
        let means = column::<Float64Array>(batch, "mean_value")?;
        let counts = column::<Int64Array>(batch, "pixel_count")?;
        let coverage = column::<Float64Array>(batch, "coverage_fraction")?;
        let flags = column::<BooleanArray>(batch, "low_coverage")?;

        Ok((0..batch.num_rows().min(limit))
            .map(|i| {
                ZonalStatistic::new(
                    Date32Type::to_naive_date(dates.value(i)),
                    codes.value(i).to_string(),
                    means.value(i),
                    counts.value(i),
                    coverage.value(i),
                    flags.value(i),
                )
            })
            .collect())
    }

    /// Read back a whole table in stored order.
    pub fn read_table(&self, path: &Path) -> Result<ResultTable> {
        let rows = self.read_sample(path, usize::MAX)?;
        ResultTable::new(rows)
    }

    /// Up to `limit` rows from the start of the file.
    pub fn read_sample(&self, path: &Path, limit: usize) -> Result<Vec<ZonalStatistic>> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(limit.clamp(1, 8192))
            .build()?;

        let mut rows = Vec::new();
        for batch in reader {
            let remaining = limit - rows.len();
            rows.extend(Self::batch_to_rows(&batch?, remaining)?);
            if rows.len() >= limit {
                break;
            }
        }
        Ok(rows)
    }

    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let row_groups = metadata.num_row_groups();
        let row_group_sizes = (0..row_groups)
            .map(|i| metadata.row_group(i).num_rows())
            .collect();
        let compression = (0..row_groups)
            .find_map(|i| metadata.row_group(i).columns().first().map(|c| c.compression()))
            .unwrap_or(self.compression);

        Ok(ParquetFileInfo {
            total_rows: metadata.file_metadata().num_rows(),
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size: std::fs::metadata(path)?.len(),
            compression,
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        let avg_rows = if self.row_groups > 0 {
            self.total_rows as f64 / self.row_groups as f64
        } else {
            0.0
        };
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}\n\
            - Avg rows per group: {:.0}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0,
            self.compression,
            avg_rows
        )
    }
}
