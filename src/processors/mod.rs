pub mod pipeline;
pub mod run_report;
pub mod spatial_resampler;
pub mod temporal_aligner;
pub mod weight_cache;
pub mod zonal_aggregator;

pub use pipeline::{OutputOptions, Pipeline, PipelineOutput};
pub use run_report::{ExcludedDay, ExclusionReason, ResolutionWarning, RunReport, SkippedFragment};
pub use spatial_resampler::{ResamplePlan, SpatialResampler};
pub use temporal_aligner::{AlignedDays, TemporalAligner};
pub use weight_cache::WeightCache;
pub use zonal_aggregator::ZonalAggregator;
