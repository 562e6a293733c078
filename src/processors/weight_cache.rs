use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{
    AdminPolygon, BoundarySet, GridGeometry, PixelWeight, PolygonWeights, WeightKey, WeightMatrix,
};
use crate::writers::parquet_writer::write_atomically;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

type Slot = Arc<OnceLock<Arc<WeightMatrix>>>;

/// Memoises pixel-to-polygon weights per (grid, polygon set) key.
///
/// Concurrent first use of a key blocks every caller but one; the matrix is
/// computed once and shared read-only afterwards.
pub struct WeightCache {
    slots: Mutex<HashMap<WeightKey, Slot>>,
    disk_path: Option<PathBuf>,
    computations: AtomicUsize,
}

impl WeightCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            disk_path: None,
            computations: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let cache = Self::new();
        match &config.weight_cache_path {
            Some(path) => cache.with_disk_cache(path),
            None => cache,
        }
    }

    /// Also persist matrices as JSON under `dir` and reuse them across runs.
    pub fn with_disk_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(dir.into());
        self
    }

    pub fn key_for(grid: &GridGeometry, boundaries: &BoundarySet) -> WeightKey {
        WeightKey {
            grid: grid.signature(),
            polygons: boundaries.signature(),
        }
    }

    pub fn get_or_compute(&self, grid: &GridGeometry, boundaries: &BoundarySet) -> Arc<WeightMatrix> {
        let key = Self::key_for(grid, boundaries);
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.entry(key).or_default().clone()
        };

        slot.get_or_init(|| Arc::new(self.load_or_compute(key, grid, boundaries)))
            .clone()
    }

    /// Number of matrices computed from geometry by this cache.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    pub fn cached_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    fn load_or_compute(&self, key: WeightKey, grid: &GridGeometry, boundaries: &BoundarySet) -> WeightMatrix {
        let Some(dir) = &self.disk_path else {
            return self.compute_counted(key, grid, boundaries);
        };

        let path = dir.join(key.file_name());
        if path.exists() {
            match Self::load(&path, key) {
                Ok(matrix) => {
                    info!(path = %path.display(), "reusing cached weights");
                    return matrix;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring unusable weight cache"),
            }
        }

        let matrix = self.compute_counted(key, grid, boundaries);
        if let Err(e) = Self::store(&path, &matrix) {
            warn!(path = %path.display(), error = %e, "could not persist weights");
        }
        matrix
    }

    fn compute_counted(&self, key: WeightKey, grid: &GridGeometry, boundaries: &BoundarySet) -> WeightMatrix {
        self.computations.fetch_add(1, Ordering::SeqCst);
        Self::compute(key, grid, boundaries)
    }

    /// Overlap weights for every polygon; polygons touching no cell are unmatched.
    pub fn compute(key: WeightKey, grid: &GridGeometry, boundaries: &BoundarySet) -> WeightMatrix {
        let results: Vec<std::result::Result<PolygonWeights, String>> = boundaries
            .polygons()
            .par_iter()
            .map(|polygon| Self::polygon_weights(grid, polygon))
            .collect();

        let mut weights = Vec::new();
        let mut unmatched = Vec::new();
        for result in results {
            match result {
                Ok(entry) => weights.push(entry),
                Err(code) => {
                    warn!(region = %code, "region does not overlap the grid");
                    unmatched.push(code);
                }
            }
        }

        info!(
            regions = weights.len(),
            unmatched = unmatched.len(),
            rows = grid.nrows,
            cols = grid.ncols,
            "computed weight matrix"
        );
        WeightMatrix::new(key, grid.shape(), weights, unmatched)
    }

    fn polygon_weights(
        grid: &GridGeometry,
        polygon: &AdminPolygon,
    ) -> std::result::Result<PolygonWeights, String> {
        let polygon_area = polygon.area();
        if polygon_area <= 0.0 {
            return Err(polygon.region_code.clone());
        }

        let cell_area = grid.cell_area();
        let pixels: Vec<PixelWeight> = grid
            .overlapping_cells(&polygon.geometry)
            .into_iter()
            .map(|cell| PixelWeight {
                row: cell.row,
                col: cell.col,
                cell_fraction: (cell.area / cell_area).min(1.0),
                weight: cell.area / polygon_area,
            })
            .collect();

        if pixels.is_empty() {
            return Err(polygon.region_code.clone());
        }
        debug!(region = %polygon.region_code, pixels = pixels.len(), "weighted region");
        Ok(PolygonWeights {
            region_code: polygon.region_code.clone(),
            pixels,
        })
    }

    fn load(path: &Path, key: WeightKey) -> Result<WeightMatrix> {
        let reader = BufReader::new(File::open(path)?);
        let matrix: WeightMatrix = serde_json::from_reader(reader)?;
        if matrix.key() != key {
            return Err(ProcessingError::InvalidFormat(format!(
                "Cached weights carry key {:?}, expected {:?}",
                matrix.key(),
                key
            )));
        }
        Ok(matrix)
    }

    fn store(path: &Path, matrix: &WeightMatrix) -> Result<()> {
        write_atomically(path, |file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, matrix)?;
            writer.flush()?;
            Ok(())
        })?;
        debug!(path = %path.display(), "stored weights");
        Ok(())
    }
}

impl Default for WeightCache {
    fn default() -> Self {
        Self::new()
    }
}
