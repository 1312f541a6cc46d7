//! Consumption data model and payload normalization
//!
//! Turns the metering API's raw JSON into an ordered, timestamp-unique
//! [`PointWindow`].

use crate::timestamp::{TimeNormalizer, floor_to_hour};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Aggregation interval requested from the API
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[default]
    Hour,
    Day,
    Month,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
        }
    }

    /// Start of the interval containing `instant`, on the wall clock of
    /// its zone
    pub fn interval_start(&self, instant: DateTime<Tz>) -> DateTime<Tz> {
        let date = instant.date_naive();
        let first = match self {
            Self::Hour => return floor_to_hour(instant),
            Self::Day => date,
            Self::Month => date.with_day(1).unwrap_or(date),
        };
        instant
            .timezone()
            .from_local_datetime(&first.and_time(NaiveTime::MIN))
            .earliest()
            .unwrap_or_else(|| floor_to_hour(instant))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = crate::error::HelmiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            other => Err(crate::error::HelmiError::validation(
                "resolution",
                format!("expected hour, day or month, got {other:?}"),
            )),
        }
    }
}

/// One measured interval's reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionPoint {
    /// Interval start in the reference zone
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Tz>,

    pub value: Option<f64>,

    pub status: Option<i64>,
}

impl ConsumptionPoint {
    pub const fn new(timestamp: DateTime<Tz>, value: Option<f64>, status: Option<i64>) -> Self {
        Self {
            timestamp,
            value,
            status,
        }
    }
}

/// Points ascending by timestamp, unique by timestamp
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PointWindow(Vec<ConsumptionPoint>);

impl PointWindow {
    /// Sort and collapse duplicate timestamps, the last one seen winning
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = ConsumptionPoint>,
    {
        let mut by_instant: BTreeMap<DateTime<chrono::Utc>, ConsumptionPoint> = BTreeMap::new();
        for point in points {
            by_instant.insert(point.timestamp.with_timezone(&chrono::Utc), point);
        }
        Self(by_instant.into_values().collect())
    }

    pub fn points(&self) -> &[ConsumptionPoint] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConsumptionPoint> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The most recent point
    pub fn latest(&self) -> Option<&ConsumptionPoint> {
        self.0.last()
    }

    /// Drop every point at or after `end`
    pub fn truncate_at(mut self, end: &DateTime<Tz>) -> Self {
        self.0.retain(|p| p.timestamp < *end);
        self
    }
}

impl<'a> IntoIterator for &'a PointWindow {
    type Item = &'a ConsumptionPoint;
    type IntoIter = std::slice::Iter<'a, ConsumptionPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A normalized consumption response
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedConsumption {
    pub granularity: Resolution,

    /// Unit label of the first point reporting one; empty when none did
    pub unit: String,

    #[serde(rename = "series")]
    pub points: PointWindow,

    /// Elements dropped because their `startTime` was unparsable
    #[serde(skip_serializing_if = "is_zero")]
    pub skipped: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Normalize a raw consumption payload.
///
/// Only the first entry of `data.productSeries` is read; parallel series are
/// ignored. An absent or empty series is a valid "no data yet" answer and
/// yields an empty window with an empty unit. Elements without a
/// `startTime` are holes; elements whose `startTime` does not parse are
/// skipped with a warning and counted.
pub fn normalize_consumption_response(
    payload: &Value,
    granularity: Resolution,
    normalizer: &TimeNormalizer,
) -> NormalizedConsumption {
    let elements = payload
        .get("data")
        .and_then(|d| d.get("productSeries"))
        .and_then(Value::as_array)
        .and_then(|series| series.first())
        .and_then(|first| first.get("data"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut unit = String::new();
    let mut skipped = 0;
    let mut points = Vec::with_capacity(elements.len());

    for element in elements {
        if unit.is_empty()
            && let Some(label) = element.get("type").and_then(Value::as_str)
        {
            unit = label.to_string();
        }

        let Some(start) = element.get("startTime").and_then(Value::as_str) else {
            continue;
        };
        let timestamp = match normalizer.parse(start) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(error = %e, "Skipping consumption point");
                skipped += 1;
                continue;
            }
        };

        points.push(ConsumptionPoint::new(
            timestamp,
            element.get("value").and_then(number_value),
            element.get("status").and_then(Value::as_i64),
        ));
    }

    NormalizedConsumption {
        granularity,
        unit,
        points: PointWindow::from_points(points),
        skipped,
    }
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
