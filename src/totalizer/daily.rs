use super::countable;
use crate::consumption::PointWindow;
use crate::error::{HelmiError, Result};
use crate::timestamp::TimeNormalizer;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Durable state of the daily total
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyTotalizerState {
    pub total: f64,

    /// Most recent calendar day already added
    pub last_committed_day: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DailyOutcome {
    /// Local time is before the cutoff hour
    BeforeCutoff,
    /// Yesterday (or a later day) is already in the total
    AlreadyCommitted(NaiveDate),
    /// The window holds no measured interval for yesterday yet
    NoData(NaiveDate),
    Committed { day: NaiveDate, sum: f64 },
}

/// Adds each completed calendar day once, after a daily cutoff hour.
///
/// Yesterday's data is usually finalized upstream only in the morning, so
/// nothing is committed before `cutoff_hour` local time. A day without any
/// measured interval is not committed; a later poll may still see it.
#[derive(Debug, Clone, Copy)]
pub struct DailyTotalizer {
    cutoff: NaiveTime,
    normalizer: TimeNormalizer,
}

impl DailyTotalizer {
    pub fn new(cutoff_hour: u32, normalizer: TimeNormalizer) -> Result<Self> {
        let cutoff = NaiveTime::from_hms_opt(cutoff_hour, 0, 0).ok_or_else(|| {
            HelmiError::validation("cutoff_hour", format!("{cutoff_hour} is not within 0..=23"))
        })?;
        Ok(Self { cutoff, normalizer })
    }

    /// Next state for `window` and `state` at wall-clock `now`
    pub fn apply<Z: TimeZone>(
        &self,
        window: &PointWindow,
        state: &DailyTotalizerState,
        now: &DateTime<Z>,
    ) -> DailyTotalizerState {
        self.evaluate(window, state, now).0
    }

    pub fn evaluate<Z: TimeZone>(
        &self,
        window: &PointWindow,
        state: &DailyTotalizerState,
        now: &DateTime<Z>,
    ) -> (DailyTotalizerState, DailyOutcome) {
        let mut next = state.clone();

        let local = self.normalizer.localize(now);
        if local.time() < self.cutoff {
            return (next, DailyOutcome::BeforeCutoff);
        }

        let Some(target_day) = local.date_naive().pred_opt() else {
            return (next, DailyOutcome::BeforeCutoff);
        };
        if state.last_committed_day.is_some_and(|day| day >= target_day) {
            return (next, DailyOutcome::AlreadyCommitted(target_day));
        }

        let values: Vec<f64> = window
            .iter()
            .filter(|p| self.normalizer.localize(&p.timestamp).date_naive() == target_day)
            .filter_map(|p| countable(p.value))
            .collect();
        if values.is_empty() {
            return (next, DailyOutcome::NoData(target_day));
        }

        let sum: f64 = values.iter().sum();
        next.total += sum;
        next.last_committed_day = Some(target_day);
        (next, DailyOutcome::Committed { day: target_day, sum })
    }
}
