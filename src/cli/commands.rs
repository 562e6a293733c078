use crate::cli::args::{Cli, Commands};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::BoundarySet;
use crate::processors::{OutputOptions, Pipeline};
use crate::readers::{BoundaryReader, FragmentReader, GridLoader};
use crate::utils::constants::DEFAULT_ADMIN_LEVEL;
use crate::utils::filename::{generate_default_cube_filename, generate_default_results_filename};
use crate::utils::progress::ProgressReporter;
use crate::writers::ParquetWriter;
use std::path::{Path, PathBuf};

pub fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Process {
            fragments,
            boundaries,
            output,
            cube_output,
            csv,
            replace_range,
            code_field,
            name_field,
            admin_level,
            aoi_only,
        } => {
            let fragment_paths = expand_fragments(&fragments)?;
            let output = output.unwrap_or_else(generate_default_results_filename);

            println!("Processing precipitation fragments...");
            println!("Fragments: {}", fragment_paths.len());
            println!("Boundaries: {}", boundaries.display());
            println!("Output file: {}", output.display());
            println!(
                "Workers: {}, Chunk size: {} days",
                config.max_workers, config.chunk_size
            );

            let boundary_set = read_boundaries(
                &boundaries,
                code_field.as_deref(),
                name_field.as_deref(),
                admin_level,
                aoi_only,
            )?;

            let pipeline = Pipeline::new(config)?;
            let options = OutputOptions {
                replace_range,
                cube_output: cube_output
                    .map(|path| path.unwrap_or_else(generate_default_cube_filename)),
                csv_output: csv,
            };

            let progress = ProgressReporter::new_spinner("Processing data...", cli.quiet);
            let result = pipeline.run_to_file(
                &fragment_paths,
                &boundary_set,
                &output,
                &options,
                &progress,
            )?;
            progress.finish_with_message(&format!("Wrote {} rows", result.table.len()));

            println!("\n{}", result.report.generate_summary());

            let file_info = ParquetWriter::new().get_file_info(&output)?;
            println!("{}", file_info.summary());
            println!("Processing complete!");
        }

        Commands::Weights {
            grid_from,
            boundaries,
            code_field,
            aoi_only,
        } => {
            let fragment = FragmentReader::new().read(&grid_from)?;
            let boundary_set = read_boundaries(
                &boundaries,
                code_field.as_deref(),
                None,
                DEFAULT_ADMIN_LEVEL,
                aoi_only,
            )?;

            let tolerance = config.weight_tolerance;
            let pipeline = Pipeline::new(config)?;
            let (plan, matrix) = pipeline.weights_for(&fragment.grid, &boundary_set);

            println!("Grid: {}x{} cells", fragment.grid.nrows, fragment.grid.ncols);
            println!("Upsample factor: {}", plan.factor);
            if let Some(warning) = &plan.warning {
                println!("⚠️  Resolution too coarse: {}", warning);
            }

            println!("\nRegion coverage:");
            for weights in matrix.iter() {
                let marker = if weights.is_conserved(tolerance) { "" } else { " (partial)" };
                println!(
                    "  {}: {} pixels, weight {:.4}{}",
                    weights.region_code,
                    weights.pixel_count(),
                    weights.total_weight(),
                    marker
                );
            }
            for code in matrix.unmatched() {
                println!("  {}: no overlap", code);
            }
        }

        Commands::Info { file, sample } => {
            println!("Analyzing Parquet file: {}", file.display());

            let writer = ParquetWriter::new();
            let file_info = writer.get_file_info(&file)?;
            println!("\n{}", file_info.summary());

            if sample > 0 {
                println!("\nSample Rows (showing up to {}):", sample);
                match writer.read_sample(&file, sample) {
                    Ok(rows) => {
                        for (i, row) in rows.iter().enumerate() {
                            println!(
                                "{}. {} on {}: mean={:.2}, pixels={}, coverage={:.2}{}",
                                i + 1,
                                row.region_code,
                                row.date,
                                row.mean_value,
                                row.pixel_count,
                                row.coverage_fraction,
                                if row.low_coverage { " (low coverage)" } else { "" }
                            );
                        }
                    }
                    Err(e) => println!("Error reading sample data: {}", e),
                }
            }
        }
    }

    Ok(())
}

/// Directories expand to the Parquet files they contain.
fn expand_fragments(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            paths.extend(GridLoader::discover(input)?);
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

fn read_boundaries(
    path: &Path,
    code_field: Option<&str>,
    name_field: Option<&str>,
    admin_level: u8,
    aoi_only: bool,
) -> Result<BoundarySet> {
    let mut reader = BoundaryReader::new().with_admin_level(admin_level);
    if let Some(field) = code_field {
        reader = reader.with_code_field(field);
    }
    if let Some(field) = name_field {
        reader = reader.with_name_field(field);
    }
    if aoi_only {
        reader = reader.aoi_only();
    }
    reader.read(path)
}
