use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{GriddedField, PolygonWeights, ResultTable, TimeCube, WeightMatrix, ZonalStatistic};
use crate::utils::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_COVERAGE_THRESHOLD};
use rayon::prelude::*;
use tracing::{debug, info};

/// Applies a [`WeightMatrix`] to every day of a cube.
pub struct ZonalAggregator {
    coverage_threshold: f64,
    max_workers: usize,
    chunk_size: usize,
}

impl ZonalAggregator {
    pub fn new() -> Self {
        Self {
            coverage_threshold: DEFAULT_COVERAGE_THRESHOLD,
            max_workers: num_cpus::get(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            coverage_threshold: config.coverage_threshold,
            max_workers: config.max_workers.max(1),
            chunk_size: config.chunk_size.max(1),
        }
    }

    pub fn with_coverage_threshold(mut self, threshold: f64) -> Self {
        self.coverage_threshold = threshold;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Statistics for one region on one day.
    ///
    /// Non-finite pixels are left out of the sums, so they lower both the
    /// pixel count and the coverage instead of poisoning the mean.
    pub fn statistic(&self, field: &GriddedField, weights: &PolygonWeights) -> ZonalStatistic {
        self.statistic_upsampled(field, 1, weights)
    }

    /// Like [`ZonalAggregator::statistic`], with `weights` indexing the grid
    /// `factor` times finer than `field`. Fine pixel (r, c) reads the source
    /// cell (r / factor, c / factor), the value nearest-neighbour upsampling
    /// would have put there.
    fn statistic_upsampled(
        &self,
        field: &GriddedField,
        factor: usize,
        weights: &PolygonWeights,
    ) -> ZonalStatistic {
        let values = field.values();
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        let mut pixel_count = 0i64;

        for pixel in &weights.pixels {
            let value = values[[pixel.row / factor, pixel.col / factor]];
            if !value.is_finite() || pixel.weight <= 0.0 {
                continue;
            }
            weighted_sum += value * pixel.weight;
            weight_sum += pixel.weight;
            pixel_count += 1;
        }

        let mean_value = if weight_sum > 0.0 {
            weighted_sum / weight_sum
        } else {
            f64::NAN
        };

        ZonalStatistic::new(
            field.date(),
            weights.region_code.clone(),
            mean_value,
            pixel_count,
            weight_sum,
            weight_sum < self.coverage_threshold,
        )
    }

    pub fn aggregate_field(&self, field: &GriddedField, matrix: &WeightMatrix) -> Vec<ZonalStatistic> {
        self.aggregate_field_upsampled(field, 1, matrix)
    }

    fn aggregate_field_upsampled(
        &self,
        field: &GriddedField,
        factor: usize,
        matrix: &WeightMatrix,
    ) -> Vec<ZonalStatistic> {
        matrix
            .iter()
            .map(|weights| self.statistic_upsampled(field, factor, weights))
            .collect()
    }

    /// Aggregate every day, partitioned into chunks processed in parallel.
    pub fn aggregate(&self, cube: &TimeCube, matrix: &WeightMatrix) -> Result<ResultTable> {
        self.aggregate_upsampled(cube, 1, matrix)
    }

    /// Aggregate `cube` against weights computed on its grid upsampled by
    /// `factor`.
    ///
    /// Gives the same table as resampling the cube first and calling
    /// [`ZonalAggregator::aggregate`], while only ever holding the native
    /// resolution fields.
    pub fn aggregate_upsampled(
        &self,
        cube: &TimeCube,
        factor: u32,
        matrix: &WeightMatrix,
    ) -> Result<ResultTable> {
        if factor == 0 {
            return Err(ProcessingError::Config(
                "Upsample factor must be at least 1".to_string(),
            ));
        }
        let grid = cube.grid().upsampled(factor);
        if grid.shape() != matrix.grid_shape() || grid.signature() != matrix.key().grid {
            return Err(ProcessingError::InvalidFormat(format!(
                "Weight matrix for a {:?} grid cannot be applied to a {:?} cube at factor {}",
                matrix.grid_shape(),
                cube.grid().shape(),
                factor
            )));
        }
        let factor = factor as usize;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let partitions: Vec<Vec<ZonalStatistic>> = pool.install(|| {
            cube.fields()
                .par_chunks(self.chunk_size)
                .map(|chunk| {
                    debug!(days = chunk.len(), "aggregating partition");
                    chunk
                        .iter()
                        .flat_map(|field| self.aggregate_field_upsampled(field, factor, matrix))
                        .collect()
                })
                .collect()
        });

        let rows: Vec<ZonalStatistic> = partitions.into_iter().flatten().collect();
        let table = ResultTable::new(rows)?;
        info!(
            rows = table.len(),
            low_coverage = table.low_coverage_count(),
            "aggregated zonal statistics"
        );
        Ok(table)
    }
}

impl Default for ZonalAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdminPolygon, BoundarySet, GridGeometry};
    use crate::processors::{SpatialResampler, WeightCache};
    use chrono::{Duration, NaiveDate};
    use geo::polygon;
    use ndarray::Array2;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn grid() -> Arc<GridGeometry> {
        Arc::new(GridGeometry::new("EPSG:4326", 0.0, 2.0, 1.0, 1.0, 2, 2).unwrap())
    }

    fn square(code: &str, x: f64, y: f64, w: f64, h: f64) -> AdminPolygon {
        AdminPolygon::from_polygon(
            code,
            2,
            polygon![
                (x: x, y: y),
                (x: x + w, y: y),
                (x: x + w, y: y + h),
                (x: x, y: y + h),
                (x: x, y: y),
            ],
        )
    }

    fn boundaries() -> BoundarySet {
        BoundarySet::new(vec![
            // top row: three quarters in the west cell, one quarter in the east cell
            square("NORTH", 0.25, 1.0, 1.0, 1.0),
            // half outside the grid to the east
            square("EAST", 1.5, 0.0, 1.0, 1.0),
        ])
        .unwrap()
    }

    fn field(day: u32, values: [f64; 4]) -> GriddedField {
        let date = NaiveDate::from_ymd_opt(2023, 8, day).unwrap();
        GriddedField::new(
            date.and_hms_opt(0, 0, 0).unwrap(),
            grid(),
            Array2::from_shape_vec((2, 2), values.to_vec()).unwrap(),
        )
        .unwrap()
    }

    fn matrix() -> Arc<WeightMatrix> {
        WeightCache::new().get_or_compute(&grid(), &boundaries())
    }

    #[test]
    fn test_weighted_mean_and_coverage() {
        let rows = ZonalAggregator::new().aggregate_field(&field(1, [4.0, 8.0, 0.0, 0.0]), &matrix());

        let north = &rows[1];
        assert_eq!(north.region_code, "NORTH");
        assert!((north.mean_value - 5.0).abs() < 1e-6);
        assert_eq!(north.pixel_count, 2);
        assert!((north.coverage_fraction - 1.0).abs() < 1e-6);
        assert!(!north.low_coverage);

        let east = &rows[0];
        assert_eq!(east.region_code, "EAST");
        assert!((east.coverage_fraction - 0.5).abs() < 1e-6);
        assert!(east.low_coverage == (east.coverage_fraction < 0.5));
    }

    #[test]
    fn test_low_coverage_rows_are_kept_and_flagged() {
        let aggregator = ZonalAggregator::new().with_coverage_threshold(0.75);
        let rows = aggregator.aggregate_field(&field(1, [1.0, 1.0, 1.0, 1.0]), &matrix());

        assert_eq!(rows.len(), 2);
        assert!(rows[0].low_coverage);
        assert!(!rows[1].low_coverage);
    }

    #[test]
    fn test_nan_pixels_do_not_contribute() {
        let rows = ZonalAggregator::new()
            .aggregate_field(&field(1, [f64::NAN, 8.0, f64::NAN, f64::NAN]), &matrix());

        let north = &rows[1];
        assert_eq!(north.pixel_count, 1);
        assert!((north.mean_value - 8.0).abs() < 1e-9);
        assert!((north.coverage_fraction - 0.25).abs() < 1e-6);
        assert!(north.low_coverage);

        let east = &rows[0];
        assert!(east.mean_value.is_nan());
        assert_eq!(east.pixel_count, 0);
        assert_eq!(east.coverage_fraction, 0.0);
        assert!(east.low_coverage);
    }

    #[test]
    fn test_partitioning_does_not_change_result() {
        let grid = grid();
        let start = NaiveDate::from_ymd_opt(2023, 8, 1).unwrap();
        let fields: Vec<GriddedField> = (0..23)
            .map(|i| {
                let date = start + Duration::days(i);
                let values = Array2::from_shape_fn((2, 2), |(r, c)| (i as f64) * 0.5 + (r * 2 + c) as f64);
                GriddedField::new(date.and_hms_opt(0, 0, 0).unwrap(), grid.clone(), values).unwrap()
            })
            .collect();
        let cube = TimeCube::new("tp", grid, fields).unwrap();
        let matrix = matrix();

        let sequential = ZonalAggregator::new()
            .with_max_workers(1)
            .with_chunk_size(usize::MAX)
            .aggregate(&cube, &matrix)
            .unwrap();

        for (workers, chunk) in [(2, 1), (4, 5), (3, 7)] {
            let parallel = ZonalAggregator::new()
                .with_max_workers(workers)
                .with_chunk_size(chunk)
                .aggregate(&cube, &matrix)
                .unwrap();
            assert_eq!(parallel, sequential);
        }
        assert_eq!(sequential.len(), 46);
    }

    #[test]
    fn test_upsampled_view_matches_resampled_cube() {
        let grid = grid();
        let start = NaiveDate::from_ymd_opt(2023, 8, 1).unwrap();
        let fields: Vec<GriddedField> = (0..4)
            .map(|i| {
                let date = start + Duration::days(i);
                let mut values = Array2::from_shape_fn((2, 2), |(r, c)| (i as f64) + (r * 2 + c) as f64);
                if i == 2 {
                    values[[0, 1]] = f64::NAN;
                }
                GriddedField::new(date.and_hms_opt(0, 0, 0).unwrap(), grid.clone(), values).unwrap()
            })
            .collect();
        let cube = TimeCube::new("tp", grid.clone(), fields).unwrap();

        let factor = 4;
        let fine_matrix = WeightCache::new().get_or_compute(&grid.upsampled(factor), &boundaries());
        let fine = SpatialResampler::new().resample(&cube, factor).unwrap();

        let aggregator = ZonalAggregator::new().with_max_workers(2);
        let materialised = aggregator.aggregate(&fine, &fine_matrix).unwrap();
        let folded = aggregator
            .aggregate_upsampled(&cube, factor, &fine_matrix)
            .unwrap();

        assert_eq!(folded.len(), 8);
        for (a, b) in folded.rows().iter().zip(materialised.rows()) {
            assert_eq!(a.key(), b.key());
            assert_eq!(a.pixel_count, b.pixel_count);
            assert!((a.mean_value - b.mean_value).abs() < 1e-12);
            assert!((a.coverage_fraction - b.coverage_fraction).abs() < 1e-12);
        }
        assert!(matches!(
            aggregator.aggregate_upsampled(&cube, 2, &fine_matrix),
            Err(ProcessingError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_matrix_for_other_grid_is_rejected() {
        let fine = Arc::new(grid().upsampled(2));
        let field = GriddedField::new(
            NaiveDate::from_ymd_opt(2023, 8, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            fine.clone(),
            Array2::zeros((4, 4)),
        )
        .unwrap();
        let cube = TimeCube::new("tp", fine, vec![field]).unwrap();

        let result = ZonalAggregator::new().aggregate(&cube, &matrix());
        assert!(matches!(result, Err(ProcessingError::InvalidFormat(_))));
    }
}
