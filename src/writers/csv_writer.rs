use crate::error::Result;
use crate::models::ResultTable;
use crate::writers::parquet_writer::{stage, StagedFile};
use std::path::Path;
use tracing::info;

/// CSV export of a [`ResultTable`] with the same columns as the Parquet file.
pub struct CsvWriter {
    delimiter: u8,
}

impl CsvWriter {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn write_table(&self, table: &ResultTable, path: &Path) -> Result<()> {
        self.stage_table(table, path)?.commit()?;
        info!(path = %path.display(), rows = table.len(), "exported CSV");
        Ok(())
    }

    pub fn stage_table(&self, table: &ResultTable, path: &Path) -> Result<StagedFile> {
        stage(path, |file| {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .from_writer(file);
            if table.is_empty() {
                writer.write_record([
                    "date",
                    "region_code",
                    "mean_value",
                    "pixel_count",
                    "coverage_fraction",
                    "low_coverage",
                ])?;
            }
            for row in table.rows() {
                writer.serialize(row)?;
            }
            writer.flush()?;
            Ok(())
        })
    }
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self::new()
    }
}
