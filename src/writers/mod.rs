pub mod csv_writer;
pub mod cube_writer;
pub mod parquet_writer;

pub use csv_writer::CsvWriter;
pub use cube_writer::CubeWriter;
pub use parquet_writer::{ParquetFileInfo, ParquetWriter, StagedFile};
