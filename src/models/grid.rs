use crate::error::{ProcessingError, Result};
use crate::utils::constants::GRID_TOLERANCE;
use crate::utils::StableHasher;
use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A regular latitude/longitude grid.
///
/// Row 0 is the northernmost row and column 0 the westernmost column; cells
/// are addressed as `(row, col)` throughout the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub crs: String,
    /// Western edge of the first column.
    pub west: f64,
    /// Northern edge of the first row.
    pub north: f64,
    pub lon_step: f64,
    pub lat_step: f64,
    pub nrows: usize,
    pub ncols: usize,
}

/// Area shared by one grid cell and a geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellOverlap {
    pub row: usize,
    pub col: usize,
    pub area: f64,
}

impl GridGeometry {
    pub fn new(
        crs: impl Into<String>,
        west: f64,
        north: f64,
        lon_step: f64,
        lat_step: f64,
        nrows: usize,
        ncols: usize,
    ) -> Result<Self> {
        let valid_step = |step: f64| step.is_finite() && step > 0.0;
        if !valid_step(lon_step) || !valid_step(lat_step) {
            return Err(ProcessingError::InvalidFormat(format!(
                "Grid spacing must be positive, got lon_step={} lat_step={}",
                lon_step, lat_step
            )));
        }
        if !west.is_finite() || !north.is_finite() {
            return Err(ProcessingError::InvalidFormat(
                "Grid origin must be finite".to_string(),
            ));
        }
        if nrows == 0 || ncols == 0 {
            return Err(ProcessingError::InvalidFormat(format!(
                "Grid must have at least one cell, got {}x{}",
                nrows, ncols
            )));
        }

        Ok(Self {
            crs: crs.into(),
            west,
            north,
            lon_step,
            lat_step,
            nrows,
            ncols,
        })
    }

    /// Reconstruct the grid from cell-centre coordinates.
    ///
    /// Coordinates may arrive in any order and with repeats; each axis must
    /// contain at least two distinct values at a uniform spacing.
    pub fn from_centers(crs: impl Into<String>, latitudes: &[f64], longitudes: &[f64]) -> Result<Self> {
        let lats = regular_axis("latitude", latitudes)?;
        let lons = regular_axis("longitude", longitudes)?;

        let lat_step = lats.step;
        let lon_step = lons.step;
        Self::new(
            crs,
            lons.min - lon_step / 2.0,
            lats.max + lat_step / 2.0,
            lon_step,
            lat_step,
            lats.count,
            lons.count,
        )
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn cell_count(&self) -> usize {
        self.nrows * self.ncols
    }

    pub fn east(&self) -> f64 {
        self.west + self.lon_step * self.ncols as f64
    }

    pub fn south(&self) -> f64 {
        self.north - self.lat_step * self.nrows as f64
    }

    pub fn extent(&self) -> Rect<f64> {
        Rect::new((self.west, self.south()), (self.east(), self.north))
    }

    pub fn cell_area(&self) -> f64 {
        self.lon_step * self.lat_step
    }

    pub fn row_center(&self, row: usize) -> f64 {
        self.north - self.lat_step * (row as f64 + 0.5)
    }

    pub fn col_center(&self, col: usize) -> f64 {
        self.west + self.lon_step * (col as f64 + 0.5)
    }

    /// Latitudes of row centres, north to south.
    pub fn latitudes(&self) -> Vec<f64> {
        (0..self.nrows).map(|row| self.row_center(row)).collect()
    }

    /// Longitudes of column centres, west to east.
    pub fn longitudes(&self) -> Vec<f64> {
        (0..self.ncols).map(|col| self.col_center(col)).collect()
    }

    pub fn cell_rect(&self, row: usize, col: usize) -> Rect<f64> {
        let west = self.west + self.lon_step * col as f64;
        let north = self.north - self.lat_step * row as f64;
        Rect::new((west, north - self.lat_step), (west + self.lon_step, north))
    }

    /// Index of the cell whose centre is nearest to the given coordinate.
    pub fn locate_center(&self, latitude: f64, longitude: f64) -> Option<(usize, usize)> {
        let row = ((self.north - latitude) / self.lat_step - 0.5).round();
        let col = ((longitude - self.west) / self.lon_step - 0.5).round();
        if row < 0.0 || col < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        Some((row, col))
    }

    /// The same extent split into `factor` x `factor` sub-cells per cell.
    pub fn upsampled(&self, factor: u32) -> Self {
        let factor = factor.max(1) as usize;
        Self {
            crs: self.crs.clone(),
            west: self.west,
            north: self.north,
            lon_step: self.lon_step / factor as f64,
            lat_step: self.lat_step / factor as f64,
            nrows: self.nrows * factor,
            ncols: self.ncols * factor,
        }
    }

    /// Describe how `other` differs from this grid, or `None` when they agree.
    pub fn mismatch(&self, other: &GridGeometry) -> Option<String> {
        if self.crs != other.crs {
            return Some(format!("CRS {} differs from {}", other.crs, self.crs));
        }
        if self.shape() != other.shape() {
            return Some(format!(
                "shape {}x{} differs from {}x{}",
                other.nrows, other.ncols, self.nrows, self.ncols
            ));
        }
        let close = |a: f64, b: f64, scale: f64| (a - b).abs() <= GRID_TOLERANCE * scale;
        if !close(self.lon_step, other.lon_step, self.lon_step)
            || !close(self.lat_step, other.lat_step, self.lat_step)
        {
            return Some(format!(
                "spacing {}x{} differs from {}x{}",
                other.lon_step, other.lat_step, self.lon_step, self.lat_step
            ));
        }
        if !close(self.west, other.west, self.lon_step)
            || !close(self.north, other.north, self.lat_step)
        {
            return Some(format!(
                "origin ({}, {}) differs from ({}, {})",
                other.west, other.north, self.west, self.north
            ));
        }
        None
    }

    /// Stable signature of CRS, origin, spacing and shape.
    pub fn signature(&self) -> u64 {
        let mut hasher = StableHasher::new();
        hasher.write_str(&self.crs);
        hasher.write_f64(self.west);
        hasher.write_f64(self.north);
        hasher.write_f64(self.lon_step);
        hasher.write_f64(self.lat_step);
        hasher.write_u64(self.nrows as u64);
        hasher.write_u64(self.ncols as u64);
        hasher.finish()
    }

    /// Row and column ranges of the cells touching `rect`, clamped to the grid.
    pub fn cell_window(&self, rect: &Rect<f64>) -> Option<(Range<usize>, Range<usize>)> {
        let clamp = |value: f64, limit: usize| value.max(0.0).min(limit as f64) as usize;

        let col_start = clamp(((rect.min().x - self.west) / self.lon_step).floor(), self.ncols);
        let col_end = clamp(((rect.max().x - self.west) / self.lon_step).ceil(), self.ncols);
        let row_start = clamp(((self.north - rect.max().y) / self.lat_step).floor(), self.nrows);
        let row_end = clamp(((self.north - rect.min().y) / self.lat_step).ceil(), self.nrows);

        if col_start >= col_end || row_start >= row_end {
            return None;
        }
        Some((row_start..row_end, col_start..col_end))
    }

    /// Every cell sharing a positive area with `geometry`, in row-major order.
    pub fn overlapping_cells(&self, geometry: &MultiPolygon<f64>) -> Vec<CellOverlap> {
        let Some(bounds) = geometry.bounding_rect() else {
            return Vec::new();
        };
        let Some((rows, cols)) = self.cell_window(&bounds) else {
            return Vec::new();
        };

        // slivers from floating-point noise along shared edges
        let min_area = self.cell_area() * 1e-9;
        let mut overlaps = Vec::new();
        for row in rows {
            for col in cols.clone() {
                let cell = MultiPolygon::new(vec![self.cell_rect(row, col).to_polygon()]);
                let area = geometry.intersection(&cell).unsigned_area();
                if area > min_area {
                    overlaps.push(CellOverlap { row, col, area });
                }
            }
        }
        overlaps
    }
}

struct RegularAxis {
    min: f64,
    max: f64,
    step: f64,
    count: usize,
}

fn regular_axis(name: &str, values: &[f64]) -> Result<RegularAxis> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ProcessingError::InvalidFormat(format!(
            "{} coordinates must be finite",
            name
        )));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();

    if sorted.len() < 2 {
        return Err(ProcessingError::InvalidFormat(format!(
            "{} axis needs at least two distinct coordinates to infer spacing, found {}",
            name,
            sorted.len()
        )));
    }

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let step = (max - min) / (sorted.len() - 1) as f64;

    for (i, value) in sorted.iter().enumerate() {
        let expected = min + step * i as f64;
        if (value - expected).abs() > GRID_TOLERANCE * step.max(1.0) {
            return Err(ProcessingError::InvalidFormat(format!(
                "{} axis is not regular: {} found where {} was expected",
                name, value, expected
            )));
        }
    }

    Ok(RegularAxis {
        min,
        max,
        step,
        count: sorted.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn unit_grid() -> GridGeometry {
        // 4x4 one-degree cells covering lon 0..4, lat 0..4
        GridGeometry::new("EPSG:4326", 0.0, 4.0, 1.0, 1.0, 4, 4).unwrap()
    }

    #[test]
    fn test_from_centers_orders_rows_north_to_south() {
        let grid = GridGeometry::from_centers(
            "EPSG:4326",
            &[10.25, 10.0, 10.5, 10.0],
            &[20.0, 20.25, 20.5, 20.75],
        )
        .unwrap();

        assert_eq!(grid.shape(), (3, 4));
        assert!((grid.north - 10.625).abs() < 1e-12);
        assert!((grid.west - 19.875).abs() < 1e-12);
        assert!((grid.row_center(0) - 10.5).abs() < 1e-12);
        assert_eq!(grid.locate_center(10.0, 20.75), Some((2, 3)));
    }

    #[test]
    fn test_from_centers_rejects_irregular_axis() {
        let result = GridGeometry::from_centers("EPSG:4326", &[0.0, 1.0, 3.0], &[0.0, 1.0]);
        assert!(matches!(result, Err(ProcessingError::InvalidFormat(_))));
    }

    #[test]
    fn test_from_centers_needs_two_coordinates() {
        let result = GridGeometry::from_centers("EPSG:4326", &[5.0, 5.0], &[0.0, 1.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_upsampled_keeps_extent() {
        let grid = unit_grid();
        let fine = grid.upsampled(4);

        assert_eq!(fine.shape(), (16, 16));
        assert_eq!(fine.extent(), grid.extent());
        assert!((fine.cell_area() - grid.cell_area() / 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_mismatch_reports_shape_and_crs() {
        let grid = unit_grid();
        let other = GridGeometry::new("EPSG:4326", 0.0, 4.0, 1.0, 1.0, 3, 4).unwrap();
        assert!(grid.mismatch(&other).unwrap().contains("shape"));

        let mut reprojected = unit_grid();
        reprojected.crs = "EPSG:3857".to_string();
        assert!(grid.mismatch(&reprojected).unwrap().contains("CRS"));

        assert!(grid.mismatch(&unit_grid()).is_none());
        assert_eq!(grid.signature(), unit_grid().signature());
        assert_ne!(grid.signature(), other.signature());
    }

    #[test]
    fn test_overlapping_cells_for_straddling_square() {
        let grid = unit_grid();
        // 1x1 square centred on the corner shared by four cells
        let square = MultiPolygon::new(vec![polygon![
            (x: 1.5, y: 1.5),
            (x: 2.5, y: 1.5),
            (x: 2.5, y: 2.5),
            (x: 1.5, y: 2.5),
            (x: 1.5, y: 1.5),
        ]]);

        let cells = grid.overlapping_cells(&square);
        assert_eq!(cells.len(), 4);
        for cell in &cells {
            assert!((cell.area - 0.25).abs() < 1e-6);
        }
        let total: f64 = cells.iter().map(|c| c.area).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_overlapping_cells_outside_extent() {
        let grid = unit_grid();
        let far = MultiPolygon::new(vec![polygon![
            (x: 10.0, y: 10.0),
            (x: 11.0, y: 10.0),
            (x: 11.0, y: 11.0),
            (x: 10.0, y: 10.0),
        ]]);
        assert!(grid.overlapping_cells(&far).is_empty());
    }
}
