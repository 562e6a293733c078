use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{GridGeometry, GriddedField, TimeCube};
use crate::processors::run_report::SkippedFragment;
use crate::readers::fragment_reader::{Fragment, FragmentReader};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of loading fragments: the merged cube plus every fragment that was skipped.
#[derive(Debug)]
pub struct LoadOutcome {
    pub cube: TimeCube,
    pub fragments_loaded: usize,
    pub skipped: Vec<SkippedFragment>,
}

/// Reads fragments in parallel, validates them against each other and
/// merges them into one [`TimeCube`].
pub struct GridLoader {
    max_workers: usize,
}

impl GridLoader {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_workers)
    }

    /// Parquet files directly inside `dir`, sorted by file name.
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(ProcessingError::InvalidFormat(format!(
                "Path is not a directory: {}",
                dir.display()
            )));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "parquet") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Read every fragment, skip unreadable ones, and merge the rest.
    pub fn load(&self, paths: &[PathBuf]) -> Result<LoadOutcome> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        // one failure boundary per fragment
        let results: Vec<Result<Fragment>> = pool.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    FragmentReader::new()
                        .read(path)
                        .map_err(|e| ProcessingError::fragment_unavailable(path, e))
                })
                .collect()
        });

        let mut fragments = Vec::new();
        let mut skipped = Vec::new();
        for (path, result) in paths.iter().zip(results) {
            match result {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => {
                    warn!(fragment = %path.display(), error = %e, "skipping unavailable fragment");
                    skipped.push(SkippedFragment {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let fragments_loaded = fragments.len();
        let cube = self.merge(fragments)?;
        info!(
            fragments = fragments_loaded,
            skipped = skipped.len(),
            timestamps = cube.len(),
            "merged fragments"
        );

        Ok(LoadOutcome {
            cube,
            fragments_loaded,
            skipped,
        })
    }

    /// Merge already-decoded fragments.
    ///
    /// The first fragment fixes variable, CRS and grid; any fragment that
    /// disagrees aborts the merge with [`ProcessingError::SchemaMismatch`],
    /// and a timestamp present in two fragments with
    /// [`ProcessingError::DuplicateTimestamp`].
    pub fn merge(&self, fragments: Vec<Fragment>) -> Result<TimeCube> {
        let Some(reference) = fragments.first() else {
            return Err(ProcessingError::MissingData(
                "No readable grid fragments".to_string(),
            ));
        };

        let variable = reference.variable.clone();
        let grid: Arc<GridGeometry> = Arc::new(reference.grid.clone());

        for fragment in &fragments[1..] {
            if fragment.variable != variable {
                return Err(ProcessingError::SchemaMismatch {
                    fragment: fragment.source.clone(),
                    detail: format!(
                        "variable '{}' differs from '{}'",
                        fragment.variable, variable
                    ),
                });
            }
            if let Some(detail) = grid.mismatch(&fragment.grid) {
                return Err(ProcessingError::SchemaMismatch {
                    fragment: fragment.source.clone(),
                    detail,
                });
            }
        }

        let mut fields = Vec::new();
        for fragment in fragments {
            debug!(fragment = %fragment.source, timestamps = fragment.fields.len(), "merging");
            for (timestamp, values) in fragment.fields {
                fields.push(GriddedField::new(timestamp, grid.clone(), values)?);
            }
        }

        TimeCube::new(variable, grid, fields)
    }
}

impl Default for GridLoader {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}
