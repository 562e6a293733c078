use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{GriddedField, TimeCube};
use crate::processors::run_report::{ExcludedDay, ExclusionReason};
use crate::utils::constants::SECONDS_PER_DAY;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Daily cube plus the days that were dropped on the way.
#[derive(Debug)]
pub struct AlignedDays {
    pub cube: TimeCube,
    pub excluded: Vec<ExcludedDay>,
    pub native_step: Duration,
    pub shift: Duration,
    /// Internal days of the shifted series, first to last, whether or not
    /// they came out complete. `None` when only boundary days exist.
    pub evaluated: Option<(NaiveDate, NaiveDate)>,
}

/// Turns a sub-daily accumulation cube into calendar-day totals.
///
/// Accumulation samples are stamped at the end of their window, so every
/// timestamp is moved back by one shift unit before grouping by date.
pub struct TemporalAligner {
    shift: Option<Duration>,
}

impl TemporalAligner {
    pub fn new() -> Self {
        Self { shift: None }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            shift: config.shift_duration(),
        }
    }

    /// Use a fixed shift instead of the cube's native step.
    pub fn with_shift(mut self, shift: Duration) -> Self {
        self.shift = Some(shift);
        self
    }

    /// Most frequent gap between consecutive timestamps; ties go to the smaller gap.
    pub fn native_step(timestamps: &[NaiveDateTime]) -> Result<Duration> {
        if timestamps.len() < 2 {
            return Err(ProcessingError::InvalidFormat(format!(
                "Need at least two timestamps to infer the time step, found {}",
                timestamps.len()
            )));
        }

        let mut gaps: HashMap<i64, usize> = HashMap::new();
        for pair in timestamps.windows(2) {
            let gap = (pair[1] - pair[0]).num_seconds();
            if gap > 0 {
                *gaps.entry(gap).or_default() += 1;
            }
        }

        let step = gaps
            .into_iter()
            .max_by(|(gap_a, count_a), (gap_b, count_b)| {
                count_a.cmp(count_b).then(gap_b.cmp(gap_a))
            })
            .map(|(gap, _)| gap)
            .ok_or_else(|| {
                ProcessingError::InvalidFormat("Timestamps are not increasing".to_string())
            })?;

        if SECONDS_PER_DAY % step != 0 {
            return Err(ProcessingError::InvalidFormat(format!(
                "Time step of {} seconds does not divide a day",
                step
            )));
        }
        Ok(Duration::seconds(step))
    }

    /// Offset within the step shared by most samples; ties go to the smaller offset.
    pub fn slot_phase(timestamps: impl IntoIterator<Item = NaiveDateTime>, step: Duration) -> i64 {
        let step_secs = step.num_seconds().max(1);
        let mut phases: HashMap<i64, usize> = HashMap::new();
        for t in timestamps {
            *phases.entry(phase_of(&t, step_secs)).or_default() += 1;
        }
        phases
            .into_iter()
            .max_by(|(phase_a, count_a), (phase_b, count_b)| {
                count_a.cmp(count_b).then(phase_b.cmp(phase_a))
            })
            .map_or(0, |(phase, _)| phase)
    }

    pub fn shift_timestamp(timestamp: NaiveDateTime, shift: Duration) -> NaiveDateTime {
        timestamp - shift
    }

    pub fn align(&self, cube: &TimeCube) -> Result<AlignedDays> {
        let native_step = Self::native_step(&cube.timestamps())?;
        let shift = self.shift.unwrap_or(native_step);
        let step_secs = native_step.num_seconds();
        let expected = (SECONDS_PER_DAY / step_secs) as usize;

        let shifted: Vec<(NaiveDateTime, &GriddedField)> = cube
            .fields()
            .iter()
            .map(|f| (Self::shift_timestamp(f.timestamp(), shift), f))
            .collect();

        let reference_phase = Self::slot_phase(shifted.iter().map(|(t, _)| *t), native_step);

        let mut days: BTreeMap<NaiveDate, DaySamples> = BTreeMap::new();
        for (timestamp, field) in &shifted {
            let day = days.entry(timestamp.date()).or_default();
            if phase_of(timestamp, step_secs) == reference_phase {
                day.fields.push(*field);
            } else {
                day.off_slot += 1;
            }
        }

        let (Some(first), Some(last)) = (
            days.keys().next().copied(),
            days.keys().next_back().copied(),
        ) else {
            return Err(ProcessingError::MissingData(
                "No samples to align".to_string(),
            ));
        };

        let evaluated = first
            .succ_opt()
            .zip(last.pred_opt())
            .filter(|(start, end)| start <= end);

        let mut excluded = Vec::new();
        let mut complete = Vec::new();
        for date in first.iter_days().take_while(|d| *d <= last) {
            if date == first || date == last {
                excluded.push(ExcludedDay {
                    date,
                    reason: ExclusionReason::Boundary,
                });
                continue;
            }

            match days.get(&date) {
                Some(day) if day.off_slot == 0 && day.fields.len() == expected => {
                    complete.push((date, &day.fields));
                }
                other => {
                    let present = other.map_or(0, |day| day.fields.len());
                    warn!(%date, present, expected, "excluding incomplete day");
                    excluded.push(ExcludedDay {
                        date,
                        reason: ExclusionReason::MissingSamples { present, expected },
                    });
                }
            }
        }

        let grid = cube.grid().clone();
        let daily: Vec<GriddedField> = complete
            .par_iter()
            .map(|(date, fields)| {
                let mut total = Array2::<f64>::zeros(grid.shape());
                for field in fields.iter() {
                    total += field.values();
                }
                GriddedField::new(date.and_time(chrono::NaiveTime::MIN), grid.clone(), total)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            native_step_secs = step_secs,
            shift_secs = shift.num_seconds(),
            "aligned sub-daily samples"
        );
        info!(
            days = daily.len(),
            excluded = excluded.len(),
            "aggregated to daily totals"
        );

        Ok(AlignedDays {
            cube: TimeCube::new(cube.variable(), grid, daily)?,
            excluded,
            native_step,
            shift,
            evaluated,
        })
    }
}

impl Default for TemporalAligner {
    fn default() -> Self {
        Self::new()
    }
}

fn phase_of(timestamp: &NaiveDateTime, step_secs: i64) -> i64 {
    timestamp.time().num_seconds_from_midnight() as i64 % step_secs
}

#[derive(Default)]
struct DaySamples<'a> {
    fields: Vec<&'a GriddedField>,
    off_slot: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GridGeometry;
    use std::sync::Arc;

    fn grid() -> Arc<GridGeometry> {
        Arc::new(GridGeometry::new("EPSG:4326", 14.0, 13.0, 1.0, 1.0, 1, 2).unwrap())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 7, d).unwrap()
    }

    /// Three-hourly samples from `start` for `count` steps; the value is the step index.
    fn three_hourly(start: NaiveDateTime, count: usize, skip: &[usize]) -> TimeCube {
        let grid = grid();
        let fields = (0..count)
            .filter(|i| !skip.contains(i))
            .map(|i| {
                let t = start + Duration::hours(3 * i as i64);
                GriddedField::new(t, grid.clone(), Array2::from_elem((1, 2), i as f64)).unwrap()
            })
            .collect();
        TimeCube::new("tp", grid, fields).unwrap()
    }

    fn at(d: u32, hour: u32) -> NaiveDateTime {
        day(d).and_hms_opt(hour, 0, 0).unwrap()
    }

    #[test]
    fn test_native_step_prefers_most_frequent_gap() {
        let times = vec![at(1, 0), at(1, 3), at(1, 6), at(1, 9), at(1, 21), at(2, 0)];
        assert_eq!(
            TemporalAligner::native_step(&times).unwrap(),
            Duration::hours(3)
        );

        let tie = vec![at(1, 0), at(1, 1), at(1, 3)];
        assert_eq!(TemporalAligner::native_step(&tie).unwrap(), Duration::hours(1));
    }

    #[test]
    fn test_native_step_must_divide_day() {
        let times = vec![at(1, 0), at(1, 7), at(1, 14)];
        assert!(TemporalAligner::native_step(&times).is_err());
        assert!(TemporalAligner::native_step(&[at(1, 0)]).is_err());
    }

    #[test]
    fn test_shift_by_native_step_assigns_window_end_to_previous_slot() {
        // 03:00 on day 2 through 00:00 on day 3 describe day 2 once shifted back 3h
        let cube = three_hourly(at(1, 3), 24, &[]);
        let aligned = TemporalAligner::new().align(&cube).unwrap();

        assert_eq!(aligned.native_step, Duration::hours(3));
        assert_eq!(aligned.shift, Duration::hours(3));
        assert_eq!(aligned.cube.len(), 1);

        let field = &aligned.cube.fields()[0];
        assert_eq!(field.date(), day(2));
        // samples 8..=15 fall on day 2
        let expected: f64 = (8..16).map(|i| i as f64).sum();
        assert_eq!(field.value(0, 0), Some(expected));
    }

    #[test]
    fn test_one_day_shift_moves_next_day_samples_back() {
        // samples 00:00..21:00 on day 3 belong to day 2 with a one-day shift
        let cube = three_hourly(at(2, 0), 24, &[]);
        let aligned = TemporalAligner::new()
            .with_shift(Duration::days(1))
            .align(&cube)
            .unwrap();

        assert_eq!(aligned.cube.len(), 1);
        let field = &aligned.cube.fields()[0];
        assert_eq!(field.date(), day(2));
        let expected: f64 = (8..16).map(|i| i as f64).sum();
        assert_eq!(field.value(0, 1), Some(expected));
    }

    #[test]
    fn test_boundary_days_always_dropped() {
        // four full days after shifting, with no partial edges at all
        let cube = three_hourly(at(1, 3), 32, &[]);
        let aligned = TemporalAligner::new().align(&cube).unwrap();

        let dates: Vec<NaiveDate> = aligned.cube.fields().iter().map(|f| f.date()).collect();
        assert_eq!(dates, vec![day(2), day(3)]);
        let boundary: Vec<NaiveDate> = aligned
            .excluded
            .iter()
            .filter(|d| d.reason == ExclusionReason::Boundary)
            .map(|d| d.date)
            .collect();
        assert_eq!(boundary, vec![day(1), day(4)]);
        assert_eq!(aligned.evaluated, Some((day(2), day(3))));
    }

    #[test]
    fn test_only_boundary_days_evaluate_nothing() {
        let cube = three_hourly(at(1, 3), 16, &[]);
        let aligned = TemporalAligner::new().align(&cube).unwrap();
        assert!(aligned.cube.is_empty());
        assert_eq!(aligned.evaluated, None);
    }

    #[test]
    fn test_stray_leading_sample_does_not_set_the_slot_phase() {
        // an extra 01:30 sample ahead of a regular three-hourly series
        let regular = three_hourly(at(1, 3), 32, &[]);
        let stray = GriddedField::new(
            day(1).and_hms_opt(1, 30, 0).unwrap(),
            grid(),
            Array2::from_elem((1, 2), 100.0),
        )
        .unwrap();
        let mut fields = vec![stray];
        fields.extend(regular.fields().iter().cloned());
        let cube = TimeCube::new("tp", grid(), fields).unwrap();

        let aligned = TemporalAligner::new().align(&cube).unwrap();
        let dates: Vec<NaiveDate> = aligned.cube.fields().iter().map(|f| f.date()).collect();
        // the stray sample opens 30 June, so 1 July becomes a complete internal day
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
        assert_eq!(aligned.evaluated, Some((day(1), day(3))));
        let expected: f64 = (8..16).map(|i| i as f64).sum();
        assert_eq!(aligned.cube.fields()[1].value(0, 0), Some(expected));
    }

    #[test]
    fn test_slot_phase_takes_the_majority() {
        let step = Duration::hours(3);
        let times = vec![
            day(1).and_hms_opt(1, 30, 0).unwrap(),
            at(1, 3),
            at(1, 6),
            at(1, 9),
        ];
        assert_eq!(TemporalAligner::slot_phase(times, step), 0);

        // one sample per phase: the smaller offset wins
        let tie = vec![day(1).and_hms_opt(1, 30, 0).unwrap(), at(1, 3)];
        assert_eq!(TemporalAligner::slot_phase(tie, step), 0);
        assert_eq!(TemporalAligner::slot_phase(Vec::new(), step), 0);
    }

    #[test]
    fn test_missing_sample_excludes_internal_day() {
        // drop one sample of day 3
        let cube = three_hourly(at(1, 3), 32, &[18]);
        let aligned = TemporalAligner::new().align(&cube).unwrap();

        let dates: Vec<NaiveDate> = aligned.cube.fields().iter().map(|f| f.date()).collect();
        assert_eq!(dates, vec![day(2)]);
        assert!(aligned.excluded.contains(&ExcludedDay {
            date: day(3),
            reason: ExclusionReason::MissingSamples {
                present: 7,
                expected: 8
            },
        }));
    }

    #[test]
    fn test_gap_day_without_samples_is_reported() {
        // day 3 entirely absent (samples 16..=23 removed)
        let skip: Vec<usize> = (16..24).collect();
        let cube = three_hourly(at(1, 3), 40, &skip);
        let aligned = TemporalAligner::new().align(&cube).unwrap();

        let dates: Vec<NaiveDate> = aligned.cube.fields().iter().map(|f| f.date()).collect();
        assert_eq!(dates, vec![day(2), day(4)]);
        assert!(aligned.excluded.contains(&ExcludedDay {
            date: day(3),
            reason: ExclusionReason::MissingSamples {
                present: 0,
                expected: 8
            },
        }));
    }
}
