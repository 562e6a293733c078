use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "precip-zonal")]
#[command(about = "Daily per-region precipitation statistics from gridded reanalysis fragments")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Pipeline configuration file (TOML)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Hide progress spinners")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Merge fragments, aggregate to daily totals and compute zonal statistics
    Process {
        #[arg(
            short,
            long,
            required = true,
            num_args = 1..,
            help = "Fragment directory or fragment files"
        )]
        fragments: Vec<PathBuf>,

        #[arg(short, long, help = "Boundary GeoJSON or shapefile, plain or zipped")]
        boundaries: PathBuf,

        #[arg(
            short,
            long,
            help = "Output Parquet file path [default: output/precip-zonal-{YYMMDD}.parquet]"
        )]
        output: Option<PathBuf>,

        #[arg(
            long,
            num_args = 0..=1,
            help = "Also write the daily cube [default: output/precip-daily-cube-{YYMMDD}.parquet]"
        )]
        cube_output: Option<Option<PathBuf>>,

        #[arg(long, help = "Also export the results as CSV")]
        csv: Option<PathBuf>,

        #[arg(long, help = "Merge into an existing output, replacing the processed date range")]
        replace_range: bool,

        #[arg(long, help = "Boundary property holding the region code")]
        code_field: Option<String>,

        #[arg(long, help = "Boundary property holding the region name")]
        name_field: Option<String>,

        #[arg(long, default_value_t = 2)]
        admin_level: u8,

        #[arg(long, help = "Keep only the anticipatory-action area of interest")]
        aoi_only: bool,
    },

    /// Compute (or reuse) overlap weights and print per-region coverage
    Weights {
        #[arg(short, long, help = "Fragment whose grid defines the weights")]
        grid_from: PathBuf,

        #[arg(short, long, help = "Boundary GeoJSON or shapefile, plain or zipped")]
        boundaries: PathBuf,

        #[arg(long, help = "Boundary property holding the region code")]
        code_field: Option<String>,

        #[arg(long, help = "Keep only the anticipatory-action area of interest")]
        aoi_only: bool,
    },

    /// Display information about a results Parquet file
    Info {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "10")]
        sample: usize,
    },
}
