use crate::error::{ProcessingError, Result};
use crate::models::grid::GridGeometry;
use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array2;
use std::sync::Arc;

/// One timestamped 2-D field of precipitation depth on a [`GridGeometry`].
#[derive(Debug, Clone)]
pub struct GriddedField {
    timestamp: NaiveDateTime,
    grid: Arc<GridGeometry>,
    values: Array2<f64>,
}

impl GriddedField {
    pub fn new(timestamp: NaiveDateTime, grid: Arc<GridGeometry>, values: Array2<f64>) -> Result<Self> {
        if values.dim() != grid.shape() {
            return Err(ProcessingError::InvalidFormat(format!(
                "Field at {} has shape {:?}, grid expects {:?}",
                timestamp,
                values.dim(),
                grid.shape()
            )));
        }

        Ok(Self {
            timestamp,
            grid,
            values,
        })
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn grid(&self) -> &Arc<GridGeometry> {
        &self.grid
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get((row, col)).copied()
    }
}

/// Time-ordered fields sharing one variable, grid and CRS.
///
/// Construction sorts the fields and rejects repeated timestamps; the cube
/// is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TimeCube {
    variable: String,
    grid: Arc<GridGeometry>,
    fields: Vec<GriddedField>,
}

impl TimeCube {
    pub fn new(
        variable: impl Into<String>,
        grid: Arc<GridGeometry>,
        mut fields: Vec<GriddedField>,
    ) -> Result<Self> {
        for field in &fields {
            if !Arc::ptr_eq(field.grid(), &grid) {
                if let Some(detail) = grid.mismatch(field.grid()) {
                    return Err(ProcessingError::InvalidFormat(format!(
                        "Field at {} is on a different grid: {}",
                        field.timestamp(),
                        detail
                    )));
                }
            }
        }

        fields.sort_by_key(|f| f.timestamp());
        if let Some(pair) = fields
            .windows(2)
            .find(|pair| pair[0].timestamp() == pair[1].timestamp())
        {
            return Err(ProcessingError::DuplicateTimestamp {
                timestamp: pair[1].timestamp(),
            });
        }

        Ok(Self {
            variable: variable.into(),
            grid,
            fields,
        })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn grid(&self) -> &Arc<GridGeometry> {
        &self.grid
    }

    pub fn crs(&self) -> &str {
        &self.grid.crs
    }

    pub fn fields(&self) -> &[GriddedField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.fields.iter().map(|f| f.timestamp()).collect()
    }

    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        match (self.fields.first(), self.fields.last()) {
            (Some(first), Some(last)) => Some((first.timestamp(), last.timestamp())),
            _ => None,
        }
    }
}
