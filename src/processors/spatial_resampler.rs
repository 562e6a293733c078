use crate::config::{PipelineConfig, UpsampleFactor};
use crate::error::{ProcessingError, Result};
use crate::models::{AdminPolygon, BoundarySet, GridGeometry, GriddedField, TimeCube};
use crate::processors::run_report::ResolutionWarning;
use crate::utils::constants::{DEFAULT_MAX_UPSAMPLE_FACTOR, DEFAULT_MIN_PIXELS_PER_POLYGON};
use ndarray::Array2;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Factor chosen for a grid and polygon set, with the warning raised if it
/// still leaves the smallest polygon under-resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResamplePlan {
    pub factor: u32,
    pub warning: Option<ResolutionWarning>,
}

/// Nearest-neighbour upsampling by an integer factor.
///
/// Extent, origin and CRS are preserved; every source cell becomes a
/// `factor` x `factor` block carrying the same value.
pub struct SpatialResampler {
    upsample_factor: UpsampleFactor,
    min_pixels: usize,
    max_factor: u32,
    max_workers: usize,
}

impl SpatialResampler {
    pub fn new() -> Self {
        Self {
            upsample_factor: UpsampleFactor::Auto,
            min_pixels: DEFAULT_MIN_PIXELS_PER_POLYGON,
            max_factor: DEFAULT_MAX_UPSAMPLE_FACTOR,
            max_workers: num_cpus::get(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            upsample_factor: config.upsample_factor,
            min_pixels: config.min_pixels_per_polygon,
            max_factor: config.max_upsample_factor,
            max_workers: config.max_workers.max(1),
        }
    }

    pub fn with_upsample_factor(mut self, factor: UpsampleFactor) -> Self {
        self.upsample_factor = factor;
        self
    }

    pub fn with_min_pixels(mut self, min_pixels: usize) -> Self {
        self.min_pixels = min_pixels;
        self
    }

    pub fn with_max_factor(mut self, max_factor: u32) -> Self {
        self.max_factor = max_factor.max(1);
        self
    }

    /// Pick the factor for `grid` against the smallest polygon that touches it.
    pub fn plan(&self, grid: &GridGeometry, boundaries: &BoundarySet) -> ResamplePlan {
        let smallest = boundaries
            .polygons()
            .iter()
            .filter(|p| !grid.overlapping_cells(&p.geometry).is_empty())
            .min_by(|a, b| a.area().total_cmp(&b.area()));

        let Some(smallest) = smallest else {
            let factor = match self.upsample_factor {
                UpsampleFactor::Fixed(factor) => factor,
                UpsampleFactor::Auto => 1,
            };
            debug!(factor, "no polygon overlaps the grid");
            return ResamplePlan {
                factor,
                warning: None,
            };
        };

        let candidates: Vec<u32> = match self.upsample_factor {
            UpsampleFactor::Fixed(factor) => vec![factor],
            UpsampleFactor::Auto => (1..=self.max_factor).collect(),
        };

        let mut last = (1, 0);
        for factor in candidates {
            let pixels = Self::pixels_at(grid, smallest, factor);
            debug!(factor, pixels, region = %smallest.region_code, "resolution check");
            if pixels >= self.min_pixels {
                return ResamplePlan {
                    factor,
                    warning: None,
                };
            }
            last = (factor, pixels);
        }

        let (factor, pixels) = last;
        let warning = ResolutionWarning {
            region_code: smallest.region_code.clone(),
            factor,
            pixels,
            required: self.min_pixels,
        };
        warn!("resolution too coarse: {}", warning);
        ResamplePlan {
            factor,
            warning: Some(warning),
        }
    }

    fn pixels_at(grid: &GridGeometry, polygon: &AdminPolygon, factor: u32) -> usize {
        grid.upsampled(factor)
            .overlapping_cells(&polygon.geometry)
            .len()
    }

    pub fn resample_field(
        field: &GriddedField,
        factor: u32,
        fine_grid: &Arc<GridGeometry>,
    ) -> Result<GriddedField> {
        let f = factor.max(1) as usize;
        let source = field.values();
        let values = Array2::from_shape_fn(fine_grid.shape(), |(row, col)| source[[row / f, col / f]]);
        GriddedField::new(field.timestamp(), fine_grid.clone(), values)
    }

    /// Upsample every field of `cube` by `factor`.
    pub fn resample(&self, cube: &TimeCube, factor: u32) -> Result<TimeCube> {
        if factor == 0 {
            return Err(ProcessingError::Config(
                "Upsample factor must be at least 1".to_string(),
            ));
        }
        if factor == 1 {
            return Ok(cube.clone());
        }

        let fine_grid = Arc::new(cube.grid().upsampled(factor));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let fields = pool.install(|| {
            cube.fields()
                .par_iter()
                .map(|field| Self::resample_field(field, factor, &fine_grid))
                .collect::<Result<Vec<_>>>()
        })?;

        info!(
            factor,
            rows = fine_grid.nrows,
            cols = fine_grid.ncols,
            "upsampled daily cube"
        );
        TimeCube::new(cube.variable(), fine_grid, fields)
    }
}

impl Default for SpatialResampler {
    fn default() -> Self {
        Self::new()
    }
}
