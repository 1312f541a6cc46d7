use super::countable;
use crate::consumption::PointWindow;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Durable state of the running total
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TotalizerState {
    pub total: f64,

    /// Newest interval already added to `total`
    pub last_counted_timestamp: Option<DateTime<FixedOffset>>,

    /// Interval the total was started from
    pub seed_timestamp: Option<DateTime<FixedOffset>>,
}

/// What one application did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalOutcome {
    /// Nothing new in the window
    Unchanged,
    /// First sight of data: only the latest point was taken
    Seeded,
    /// A restored zero total picked up the latest point's value
    SeedCorrected,
    /// This many points after the marker were passed
    Counted(usize),
}

/// Running total of every interval seen since the first successful poll.
///
/// History before the first poll is never backfilled: a cold start takes
/// only the latest point of the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalTotalizer;

impl IncrementalTotalizer {
    /// Next state for `window` applied on top of `state`
    pub fn apply(window: &PointWindow, state: &TotalizerState) -> TotalizerState {
        Self::evaluate(window, state).0
    }

    pub fn evaluate(
        window: &PointWindow,
        state: &TotalizerState,
    ) -> (TotalizerState, IncrementalOutcome) {
        let mut next = state.clone();

        let Some(latest) = window.latest() else {
            return (next, IncrementalOutcome::Unchanged);
        };
        let latest_ts = latest.timestamp.fixed_offset();

        let Some(last) = state.last_counted_timestamp else {
            if let Some(value) = countable(latest.value) {
                next.total += value;
            }
            next.last_counted_timestamp = Some(latest_ts);
            next.seed_timestamp = Some(latest_ts);
            return (next, IncrementalOutcome::Seeded);
        };

        // State restored with a zero total right on the latest point: the
        // seed point's own value has not been added yet
        if state.total <= 0.0 && last == latest_ts && state.seed_timestamp != Some(latest_ts) {
            if let Some(value) = countable(latest.value) {
                next.total += value;
            }
            next.seed_timestamp = Some(latest_ts);
            return (next, IncrementalOutcome::SeedCorrected);
        }

        let mut passed = 0;
        for point in window.iter() {
            let ts = point.timestamp.fixed_offset();
            if ts <= last {
                continue;
            }
            if let Some(value) = countable(point.value) {
                next.total += value;
            }
            next.last_counted_timestamp = Some(ts);
            passed += 1;
        }

        let outcome = if passed == 0 {
            IncrementalOutcome::Unchanged
        } else {
            IncrementalOutcome::Counted(passed)
        };
        (next, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumption::ConsumptionPoint;
    use crate::timestamp::TimeNormalizer;

    fn window(points: &[(&str, Option<f64>)]) -> PointWindow {
        let n = TimeNormalizer::default();
        PointWindow::from_points(
            points
                .iter()
                .map(|(ts, v)| ConsumptionPoint::new(n.parse(ts).unwrap(), *v, None)),
        )
    }

    fn ts(text: &str) -> DateTime<FixedOffset> {
        TimeNormalizer::default().parse(text).unwrap().fixed_offset()
    }

    #[test]
    fn cold_start_takes_latest_only() {
        let w = window(&[
            ("2026-01-17T00:00:00", Some(1.0)),
            ("2026-01-17T01:00:00", Some(2.0)),
            ("2026-01-17T02:00:00", Some(3.0)),
        ]);
        let (state, outcome) = IncrementalTotalizer::evaluate(&w, &TotalizerState::default());
        assert_eq!(outcome, IncrementalOutcome::Seeded);
        assert_eq!(state.total, 3.0);
        assert_eq!(state.last_counted_timestamp, Some(ts("2026-01-17T02:00:00")));
        assert_eq!(state.seed_timestamp, state.last_counted_timestamp);
    }

    #[test]
    fn cold_start_with_missing_latest_value_still_marks() {
        let w = window(&[
            ("2026-01-17T00:00:00", Some(1.0)),
            ("2026-01-17T01:00:00", None),
        ]);
        let state = IncrementalTotalizer::apply(&w, &TotalizerState::default());
        assert_eq!(state.total, 0.0);
        assert_eq!(state.last_counted_timestamp, Some(ts("2026-01-17T01:00:00")));
    }

    #[test]
    fn steady_state_adds_only_newer_points() {
        let state = TotalizerState {
            total: 10.0,
            last_counted_timestamp: Some(ts("2026-01-17T01:00:00")),
            seed_timestamp: Some(ts("2026-01-16T00:00:00")),
        };
        let w = window(&[
            ("2026-01-17T00:00:00", Some(100.0)),
            ("2026-01-17T01:00:00", Some(100.0)),
            ("2026-01-17T02:00:00", Some(0.5)),
            ("2026-01-17T03:00:00", None),
            ("2026-01-17T04:00:00", Some(0.25)),
        ]);
        let (next, outcome) = IncrementalTotalizer::evaluate(&w, &state);
        assert_eq!(outcome, IncrementalOutcome::Counted(3));
        assert_eq!(next.total, 10.75);
        assert_eq!(next.last_counted_timestamp, Some(ts("2026-01-17T04:00:00")));
        assert_eq!(next.seed_timestamp, state.seed_timestamp);
    }

    #[test]
    fn reapplying_same_window_is_idempotent() {
        let w = window(&[
            ("2026-01-17T00:00:00", Some(1.0)),
            ("2026-01-17T01:00:00", Some(2.0)),
        ]);
        let once = IncrementalTotalizer::apply(&w, &TotalizerState::default());
        let twice = IncrementalTotalizer::apply(&w, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn restored_zero_total_is_seed_corrected_once() {
        let restored = TotalizerState {
            total: 0.0,
            last_counted_timestamp: Some(ts("2026-01-17T02:00:00")),
            seed_timestamp: None,
        };
        let w = window(&[
            ("2026-01-17T01:00:00", Some(1.0)),
            ("2026-01-17T02:00:00", Some(0.75)),
        ]);
        let (next, outcome) = IncrementalTotalizer::evaluate(&w, &restored);
        assert_eq!(outcome, IncrementalOutcome::SeedCorrected);
        assert_eq!(next.total, 0.75);
        assert_eq!(next.seed_timestamp, Some(ts("2026-01-17T02:00:00")));

        let (again, outcome) = IncrementalTotalizer::evaluate(&w, &next);
        assert_eq!(outcome, IncrementalOutcome::Unchanged);
        assert_eq!(again, next);
    }

    #[test]
    fn negative_readings_do_not_decrease_total() {
        let state = TotalizerState {
            total: 5.0,
            last_counted_timestamp: Some(ts("2026-01-17T00:00:00")),
            seed_timestamp: Some(ts("2026-01-17T00:00:00")),
        };
        let w = window(&[("2026-01-17T01:00:00", Some(-2.0))]);
        let next = IncrementalTotalizer::apply(&w, &state);
        assert_eq!(next.total, 5.0);
        assert_eq!(next.last_counted_timestamp, Some(ts("2026-01-17T01:00:00")));
    }

    #[test]
    fn empty_window_changes_nothing() {
        let state = TotalizerState {
            total: 3.0,
            last_counted_timestamp: Some(ts("2026-01-17T00:00:00")),
            seed_timestamp: None,
        };
        let (next, outcome) = IncrementalTotalizer::evaluate(&PointWindow::default(), &state);
        assert_eq!(outcome, IncrementalOutcome::Unchanged);
        assert_eq!(next, state);
    }

    #[test]
    fn state_serializes_markers_as_offset_strings() {
        let state = TotalizerState {
            total: 1.5,
            last_counted_timestamp: Some(ts("2026-01-17T02:00:00")),
            seed_timestamp: None,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_counted_timestamp"], "2026-01-17T02:00:00+02:00");
        let back: TotalizerState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
