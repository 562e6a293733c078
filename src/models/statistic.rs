use crate::error::{ProcessingError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Aggregate precipitation for one region on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalStatistic {
    pub date: NaiveDate,
    pub region_code: String,
    pub mean_value: f64,
    pub pixel_count: i64,
    pub coverage_fraction: f64,
    pub low_coverage: bool,
}

impl ZonalStatistic {
    pub fn new(
        date: NaiveDate,
        region_code: String,
        mean_value: f64,
        pixel_count: i64,
        coverage_fraction: f64,
        low_coverage: bool,
    ) -> Self {
        Self {
            date,
            region_code,
            mean_value,
            pixel_count,
            coverage_fraction,
            low_coverage,
        }
    }

    pub fn key(&self) -> (NaiveDate, &str) {
        (self.date, self.region_code.as_str())
    }
}

/// Rows ordered by date then region code, with no repeated key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultTable {
    rows: Vec<ZonalStatistic>,
}

impl ResultTable {
    pub fn new(mut rows: Vec<ZonalStatistic>) -> Result<Self> {
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        if let Some(pair) = rows.windows(2).find(|pair| pair[0].key() == pair[1].key()) {
            return Err(ProcessingError::DuplicateStatistic {
                region_code: pair[1].region_code.clone(),
                date: pair[1].date,
            });
        }
        Ok(Self { rows })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[ZonalStatistic] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => Some((first.date, last.date)),
            _ => None,
        }
    }

    pub fn low_coverage_count(&self) -> usize {
        self.rows.iter().filter(|r| r.low_coverage).count()
    }

    pub fn rows_for(&self, region_code: &str) -> Vec<&ZonalStatistic> {
        self.rows
            .iter()
            .filter(|r| r.region_code == region_code)
            .collect()
    }

    /// Drop every row dated inside `range` (inclusive) and add `newer`'s rows.
    ///
    /// `range` is the span the newer run evaluated, not the span of its rows:
    /// a day the rerun excluded must not keep a stale row from an earlier run.
    /// Rows outside the range are kept, so re-running a period swaps it in
    /// place instead of accumulating duplicates.
    pub fn replace_range(
        self,
        newer: ResultTable,
        (start, end): (NaiveDate, NaiveDate),
    ) -> Result<ResultTable> {
        let mut rows: Vec<ZonalStatistic> = self
            .rows
            .into_iter()
            .filter(|r| r.date < start || r.date > end)
            .collect();
        rows.extend(newer.rows);
        ResultTable::new(rows)
    }
}
