pub mod boundary;
pub mod field;
pub mod grid;
pub mod statistic;
pub mod weights;

pub use boundary::{AdminPolygon, BoundarySet};
pub use field::{GriddedField, TimeCube};
pub use grid::{CellOverlap, GridGeometry};
pub use statistic::{ResultTable, ZonalStatistic};
pub use weights::{PixelWeight, PolygonWeights, WeightKey, WeightMatrix};
