pub mod constants;
pub mod filename;
pub mod progress;
pub mod stable_hash;

pub use constants::*;
pub use filename::{generate_default_cube_filename, generate_default_results_filename};
pub use progress::{PipelineStage, ProgressReporter};
pub use stable_hash::StableHasher;
