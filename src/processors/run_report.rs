use chrono::NaiveDate;
use std::fmt;
use std::path::PathBuf;

/// A fragment left out of the merge because it could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFragment {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// First or last day of the shifted series.
    Boundary,
    /// An internal day with fewer sub-daily samples than expected.
    MissingSamples { present: usize, expected: usize },
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Boundary => write!(f, "boundary day"),
            ExclusionReason::MissingSamples { present, expected } => {
                write!(f, "{} of {} samples", present, expected)
            }
        }
    }
}

/// A calendar day dropped from the daily cube.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedDay {
    pub date: NaiveDate,
    pub reason: ExclusionReason,
}

/// The chosen grid is still too coarse for the smallest polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionWarning {
    pub region_code: String,
    pub factor: u32,
    pub pixels: usize,
    pub required: usize,
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "region {} overlaps {} pixels at factor {}, {} required",
            self.region_code, self.pixels, self.factor, self.required
        )
    }
}

/// Recoverable conditions collected over one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub fragments_loaded: usize,
    pub skipped_fragments: Vec<SkippedFragment>,
    pub native_step_minutes: i64,
    pub shift_minutes: i64,
    pub days_aggregated: usize,
    pub excluded_days: Vec<ExcludedDay>,
    /// First and last internal day; a range replace clears exactly this span.
    pub evaluated_range: Option<(NaiveDate, NaiveDate)>,
    pub upsample_factor: u32,
    pub resolution_warning: Option<ResolutionWarning>,
    pub unmatched_regions: Vec<String>,
    pub partial_regions: Vec<(String, f64)>,
    pub rows_written: usize,
    pub low_coverage_rows: usize,
}

impl RunReport {
    pub fn has_warnings(&self) -> bool {
        !self.skipped_fragments.is_empty()
            || self.resolution_warning.is_some()
            || !self.unmatched_regions.is_empty()
            || self
                .excluded_days
                .iter()
                .any(|d| d.reason != ExclusionReason::Boundary)
    }

    /// Days excluded for missing samples, excluding the two boundary days.
    pub fn incomplete_days(&self) -> Vec<NaiveDate> {
        self.excluded_days
            .iter()
            .filter(|d| matches!(d.reason, ExclusionReason::MissingSamples { .. }))
            .map(|d| d.date)
            .collect()
    }

    pub fn generate_summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("=== Pipeline Run Report ===\n");
        summary.push_str(&format!(
            "Fragments: {} loaded, {} skipped\n",
            self.fragments_loaded,
            self.skipped_fragments.len()
        ));
        for skipped in &self.skipped_fragments {
            summary.push_str(&format!(
                "  - {}: {}\n",
                skipped.path.display(),
                skipped.reason
            ));
        }

        summary.push_str(&format!(
            "Native step: {} min, shift: {} min\n",
            self.native_step_minutes, self.shift_minutes
        ));
        summary.push_str(&format!("Days aggregated: {}\n", self.days_aggregated));
        if let Some((start, end)) = self.evaluated_range {
            summary.push_str(&format!("Evaluated: {} to {}\n", start, end));
        }
        summary.push_str(&format!("Days excluded: {}\n", self.excluded_days.len()));
        for day in self.excluded_days.iter().take(10) {
            summary.push_str(&format!("  - {} ({})\n", day.date, day.reason));
        }
        if self.excluded_days.len() > 10 {
            summary.push_str(&format!(
                "  ... and {} more\n",
                self.excluded_days.len() - 10
            ));
        }

        summary.push_str(&format!("Upsample factor: {}\n", self.upsample_factor));
        if let Some(warning) = &self.resolution_warning {
            summary.push_str(&format!("Resolution too coarse: {}\n", warning));
        }

        if !self.unmatched_regions.is_empty() {
            summary.push_str(&format!(
                "Regions without overlap: {}\n",
                self.unmatched_regions.join(", ")
            ));
        }
        if !self.partial_regions.is_empty() {
            summary.push_str(&format!(
                "Regions cut by the grid extent: {}\n",
                self.partial_regions.len()
            ));
            for (code, total) in self.partial_regions.iter().take(10) {
                summary.push_str(&format!("  - {} (weight {:.3})\n", code, total));
            }
        }

        summary.push_str(&format!(
            "\nRows written: {} ({} low coverage)\n",
            self.rows_written, self.low_coverage_rows
        ));

        summary
    }
}
