use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{BoundarySet, GridGeometry, ResultTable, TimeCube, WeightMatrix};
use crate::processors::run_report::RunReport;
use crate::processors::spatial_resampler::{ResamplePlan, SpatialResampler};
use crate::processors::temporal_aligner::TemporalAligner;
use crate::processors::weight_cache::WeightCache;
use crate::processors::zonal_aggregator::ZonalAggregator;
use crate::readers::GridLoader;
use crate::utils::{PipelineStage, ProgressReporter};
use crate::writers::{CsvWriter, CubeWriter, ParquetWriter, StagedFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything one run produces.
#[derive(Debug)]
pub struct PipelineOutput {
    pub table: ResultTable,
    /// Daily totals at native resolution.
    pub daily_cube: TimeCube,
    pub report: RunReport,
}

/// Where [`Pipeline::run_to_file`] puts its artifacts.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Merge into an existing table, replacing only the run's date range.
    pub replace_range: bool,
    pub cube_output: Option<PathBuf>,
    pub csv_output: Option<PathBuf>,
}

/// Fragments to zonal statistics: load, align, resample, weight, aggregate.
pub struct Pipeline {
    config: PipelineConfig,
    weight_cache: Arc<WeightCache>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let config = config.validated()?;
        let weight_cache = Arc::new(WeightCache::from_config(&config));
        Ok(Self {
            config,
            weight_cache,
        })
    }

    /// Share one cache between pipelines so repeated runs reuse weights.
    pub fn with_weight_cache(mut self, cache: Arc<WeightCache>) -> Self {
        self.weight_cache = cache;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn weight_cache(&self) -> &Arc<WeightCache> {
        &self.weight_cache
    }

    pub fn run(
        &self,
        fragments: &[PathBuf],
        boundaries: &BoundarySet,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutput> {
        progress.stage(PipelineStage::LoadFragments);
        let outcome = GridLoader::from_config(&self.config).load(fragments)?;

        let mut output = self.run_cube(&outcome.cube, boundaries, progress)?;
        output.report.fragments_loaded = outcome.fragments_loaded;
        output.report.skipped_fragments = outcome.skipped;
        Ok(output)
    }

    /// Run every stage after loading on an already merged sub-daily cube.
    pub fn run_cube(
        &self,
        cube: &TimeCube,
        boundaries: &BoundarySet,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutput> {
        let mut report = RunReport::default();

        progress.stage(PipelineStage::AlignDays);
        let aligned = TemporalAligner::from_config(&self.config).align(cube)?;
        report.native_step_minutes = aligned.native_step.num_minutes();
        report.shift_minutes = aligned.shift.num_minutes();
        report.days_aggregated = aligned.cube.len();
        report.excluded_days = aligned.excluded;
        report.evaluated_range = aligned.evaluated;

        // the fine grid only exists as weights; the aggregator reads the
        // native daily cube through it
        progress.stage(PipelineStage::Resample);
        let plan = SpatialResampler::from_config(&self.config).plan(aligned.cube.grid(), boundaries);
        report.upsample_factor = plan.factor;
        report.resolution_warning = plan.warning;

        progress.stage(PipelineStage::ComputeWeights);
        let fine_grid = aligned.cube.grid().upsampled(plan.factor);
        let matrix = self.weight_cache.get_or_compute(&fine_grid, boundaries);
        report.unmatched_regions = matrix.unmatched().to_vec();
        report.partial_regions = matrix.partial_regions(self.config.weight_tolerance);

        progress.stage(PipelineStage::Aggregate);
        let table = ZonalAggregator::from_config(&self.config).aggregate_upsampled(
            &aligned.cube,
            plan.factor,
            &matrix,
        )?;
        report.rows_written = table.len();
        report.low_coverage_rows = table.low_coverage_count();

        if table.is_empty() {
            warn!("no complete day to aggregate");
        }
        info!(
            rows = table.len(),
            days = report.days_aggregated,
            factor = report.upsample_factor,
            "pipeline finished"
        );

        Ok(PipelineOutput {
            table,
            daily_cube: aligned.cube,
            report,
        })
    }

    /// Run and persist. Nothing is written unless every stage succeeded.
    ///
    /// Every artifact is staged before any is published. Side outputs are
    /// committed first and the results table last, so a failure never leaves
    /// a replaced table next to stale or missing side outputs.
    pub fn run_to_file(
        &self,
        fragments: &[PathBuf],
        boundaries: &BoundarySet,
        output: &Path,
        options: &OutputOptions,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutput> {
        let mut result = self.run(fragments, boundaries, progress)?;

        progress.stage(PipelineStage::Write);
        let writer = ParquetWriter::from_config(&self.config)?;
        let staged_table = if options.replace_range {
            let (merged, staged) =
                writer.stage_replacing(&result.table, result.report.evaluated_range, output)?;
            result.report.rows_written = merged.len();
            result.table = merged;
            staged
        } else {
            writer.stage_table(&result.table, output)?
        };

        let mut side_outputs: Vec<StagedFile> = Vec::new();
        if let Some(cube_path) = &options.cube_output {
            side_outputs.push(
                CubeWriter::new()
                    .with_compression(&self.config.compression)?
                    .daily()
                    .stage_cube(&result.daily_cube, cube_path)?,
            );
        }
        if let Some(csv_path) = &options.csv_output {
            side_outputs.push(CsvWriter::new().stage_table(&result.table, csv_path)?);
        }

        for staged in side_outputs {
            info!(path = %staged.target().display(), "writing side output");
            staged.commit()?;
        }
        staged_table.commit()?;
        info!(path = %output.display(), rows = result.table.len(), "wrote result table");

        Ok(result)
    }

    /// The factor and weights a run would use for `grid`, without any time data.
    pub fn weights_for(
        &self,
        grid: &GridGeometry,
        boundaries: &BoundarySet,
    ) -> (ResamplePlan, Arc<WeightMatrix>) {
        let plan = SpatialResampler::from_config(&self.config).plan(grid, boundaries);
        let matrix = self
            .weight_cache
            .get_or_compute(&grid.upsampled(plan.factor), boundaries);
        (plan, matrix)
    }
}
