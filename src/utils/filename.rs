use chrono::{Datelike, Local};
use std::path::PathBuf;

/// Generate default results filename with format: precip-zonal-{YYMMDD}.parquet
pub fn generate_default_results_filename() -> PathBuf {
    dated_output("precip-zonal")
}

/// Generate default daily cube filename with format: precip-daily-cube-{YYMMDD}.parquet
pub fn generate_default_cube_filename() -> PathBuf {
    dated_output("precip-daily-cube")
}

fn dated_output(stem: &str) -> PathBuf {
    let now = Local::now();
    let filename = format!(
        "{}-{:02}{:02}{:02}.parquet",
        stem,
        now.year() % 100,
        now.month(),
        now.day()
    );
    PathBuf::from("output").join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_default_results_filename() {
        let filename = generate_default_results_filename();
        let filename_str = filename.to_string_lossy();

        assert!(filename_str.ends_with(".parquet"));
        assert!(filename_str.starts_with("output"));

        let file_part = filename.file_name().unwrap().to_string_lossy();
        assert!(file_part.starts_with("precip-zonal-"));
        // precip-zonal- + YYMMDD + .parquet
        assert_eq!(file_part.len(), "precip-zonal-".len() + 6 + ".parquet".len());
    }

    #[test]
    fn test_generate_default_cube_filename() {
        let filename = generate_default_cube_filename();
        let file_part = filename.file_name().unwrap().to_string_lossy();

        assert!(file_part.starts_with("precip-daily-cube-"));
        assert!(file_part.ends_with(".parquet"));
    }
}
