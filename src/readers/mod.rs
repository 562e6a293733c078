pub mod boundary_reader;
pub mod fragment_reader;
pub mod grid_loader;

pub use boundary_reader::BoundaryReader;
pub use fragment_reader::{Fragment, FragmentReader};
pub use grid_loader::{GridLoader, LoadOutcome};
