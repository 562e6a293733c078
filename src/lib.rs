pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod processors;
pub mod readers;
pub mod utils;
pub mod writers;

pub use crate::config::{PipelineConfig, UpsampleFactor};
pub use crate::error::{ProcessingError, Result};
