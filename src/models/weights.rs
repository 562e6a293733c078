use crate::error::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies a weight matrix by grid signature and polygon-set content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeightKey {
    pub grid: u64,
    pub polygons: u64,
}

impl WeightKey {
    pub fn file_name(&self) -> String {
        format!("weights-{:016x}-{:016x}.json", self.grid, self.polygons)
    }
}

/// Overlap of one grid cell with one polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelWeight {
    pub row: usize,
    pub col: usize,
    /// Intersection area over cell area.
    pub cell_fraction: f64,
    /// Intersection area over polygon area; sums to 1 for interior polygons.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonWeights {
    pub region_code: String,
    pub pixels: Vec<PixelWeight>,
}

impl PolygonWeights {
    pub fn total_weight(&self) -> f64 {
        self.pixels.iter().map(|p| p.weight).sum()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.iter().filter(|p| p.weight > 0.0).count()
    }

    pub fn is_conserved(&self, tolerance: f64) -> bool {
        (self.total_weight() - 1.0).abs() <= tolerance
    }
}

/// Pixel-to-polygon overlap weights for one (grid, polygon set) pair.
///
/// Polygons without any overlapping cell are listed in `unmatched` and have
/// no entry; asking for their weights yields [`ProcessingError::NoOverlap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMatrix {
    key: WeightKey,
    grid_shape: (usize, usize),
    entries: BTreeMap<String, PolygonWeights>,
    unmatched: Vec<String>,
}

impl WeightMatrix {
    pub fn new(
        key: WeightKey,
        grid_shape: (usize, usize),
        weights: Vec<PolygonWeights>,
        mut unmatched: Vec<String>,
    ) -> Self {
        let entries = weights
            .into_iter()
            .map(|w| (w.region_code.clone(), w))
            .collect();
        unmatched.sort();

        Self {
            key,
            grid_shape,
            entries,
            unmatched,
        }
    }

    pub fn key(&self) -> WeightKey {
        self.key
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        self.grid_shape
    }

    pub fn get(&self, region_code: &str) -> Result<&PolygonWeights> {
        self.entries
            .get(region_code)
            .ok_or_else(|| ProcessingError::NoOverlap {
                region_code: region_code.to_string(),
            })
    }

    /// Weighted polygons in region-code order.
    pub fn iter(&self) -> impl Iterator<Item = &PolygonWeights> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unmatched(&self) -> &[String] {
        &self.unmatched
    }

    /// Regions whose weights fall short of 1 by more than `tolerance`,
    /// typically polygons cut by the grid extent.
    pub fn partial_regions(&self, tolerance: f64) -> Vec<(String, f64)> {
        self.entries
            .values()
            .filter(|w| !w.is_conserved(tolerance))
            .map(|w| (w.region_code.clone(), w.total_weight()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(row: usize, col: usize, weight: f64) -> PixelWeight {
        PixelWeight {
            row,
            col,
            cell_fraction: weight,
            weight,
        }
    }

    fn matrix() -> WeightMatrix {
        WeightMatrix::new(
            WeightKey { grid: 1, polygons: 2 },
            (2, 2),
            vec![
                PolygonWeights {
                    region_code: "B".to_string(),
                    pixels: vec![pixel(0, 0, 0.6), pixel(0, 1, 0.4)],
                },
                PolygonWeights {
                    region_code: "A".to_string(),
                    pixels: vec![pixel(1, 1, 0.3)],
                },
            ],
            vec!["Z".to_string()],
        )
    }

    #[test]
    fn test_entries_iterate_in_code_order() {
        let m = matrix();
        let codes: Vec<&str> = m.iter().map(|w| w.region_code.as_str()).collect();
        assert_eq!(codes, vec!["A", "B"]);
    }

    #[test]
    fn test_unmatched_region_is_no_overlap() {
        let matrix = matrix();
        assert!(matches!(
            matrix.get("Z"),
            Err(ProcessingError::NoOverlap { region_code }) if region_code == "Z"
        ));
        assert_eq!(matrix.unmatched(), &["Z".to_string()]);
    }

    #[test]
    fn test_partial_regions() {
        let matrix = matrix();
        assert!(matrix.get("B").unwrap().is_conserved(1e-3));

        let partial = matrix.partial_regions(1e-3);
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].0, "A");
    }

    #[test]
    fn test_json_round_trip_keeps_key() {
        let matrix = matrix();
        let json = serde_json::to_string(&matrix).unwrap();
        let restored: WeightMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, matrix);
        assert_eq!(
            restored.key().file_name(),
            "weights-0000000000000001-0000000000000002.json"
        );
    }
}
