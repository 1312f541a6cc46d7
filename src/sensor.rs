//! Presentation of poll results
//!
//! The poller pushes a [`PollSnapshot`] to every registered
//! [`PresentationSink`] after each successful poll. The three sensors here
//! expose the latest hourly reading, the running total and the daily total
//! with stable unique ids.

use crate::consumption::PointWindow;
use crate::totalizer::{DailyTotalizerState, TotalizerState};
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Value, json};

const UNIQUE_ID_PREFIX: &str = "jse_helmi_consumption";
const FALLBACK_UNIT: &str = "kWh";

/// Result of one successful poll as seen by presentation layers
#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub customer_id: String,
    pub metering_point_id: String,
    /// Unit reported by the API; empty when no point carried one
    pub unit: String,
    pub window: PointWindow,
    pub hourly_total: TotalizerState,
    pub daily_total: DailyTotalizerState,
    pub taken_at: DateTime<Tz>,
}

impl PollSnapshot {
    fn unit(&self) -> &str {
        if self.unit.is_empty() {
            FALLBACK_UNIT
        } else {
            &self.unit
        }
    }
}

/// Exported sensor state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    pub unique_id: String,
    pub name: String,
    pub unit: String,
    pub value: Option<f64>,
    pub available: bool,
    pub attributes: Value,
}

/// Receiver of poll snapshots
pub trait PresentationSink: Send {
    fn update(&mut self, snapshot: &PollSnapshot);

    /// Current state, `None` until the first snapshot arrived
    fn state(&self) -> Option<SensorState>;
}

fn unique_id(kind: &str, metering_point_id: &str) -> String {
    format!("{UNIQUE_ID_PREFIX}_{kind}_{metering_point_id}")
}

fn text_or_null<T: ToString>(ts: Option<T>) -> Value {
    ts.map_or(Value::Null, |t| Value::String(t.to_string()))
}

/// Latest hourly reading; unavailable once it is older than `stale_hours`
#[derive(Debug, Clone)]
pub struct HourlySensor {
    stale_after: Duration,
    state: Option<SensorState>,
}

impl HourlySensor {
    pub fn new(stale_hours: u32) -> Self {
        Self {
            stale_after: Duration::hours(i64::from(stale_hours)),
            state: None,
        }
    }
}

impl PresentationSink for HourlySensor {
    fn update(&mut self, snapshot: &PollSnapshot) {
        let latest = snapshot.window.latest();
        let age = latest.map(|p| snapshot.taken_at - p.timestamp);
        let available = age.is_some_and(|age| age <= self.stale_after);

        self.state = Some(SensorState {
            unique_id: unique_id("hourly", &snapshot.metering_point_id),
            name: "JSE Helmi Hourly Consumption".to_string(),
            unit: snapshot.unit().to_string(),
            value: latest.and_then(|p| p.value),
            available,
            attributes: json!({
                "customer_id": snapshot.customer_id,
                "metering_point_id": snapshot.metering_point_id,
                "last_timestamp": text_or_null(latest.map(|p| p.timestamp.to_rfc3339())),
                "stale_minutes": age.map(|age| age.num_minutes()),
                "series": snapshot.window,
            }),
        });
    }

    fn state(&self) -> Option<SensorState> {
        self.state.clone()
    }
}

/// Running total since the first successful poll
#[derive(Debug, Clone, Default)]
pub struct HourlyTotalSensor {
    state: Option<SensorState>,
}

impl HourlyTotalSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresentationSink for HourlyTotalSensor {
    fn update(&mut self, snapshot: &PollSnapshot) {
        let total = &snapshot.hourly_total;
        self.state = Some(SensorState {
            unique_id: unique_id("hourly_total", &snapshot.metering_point_id),
            name: "JSE Helmi Hourly Total".to_string(),
            unit: snapshot.unit().to_string(),
            value: Some(total.total),
            available: true,
            attributes: json!({
                "last_timestamp": text_or_null(total.last_counted_timestamp.map(|t| t.to_rfc3339())),
                "seeded_ts": text_or_null(total.seed_timestamp.map(|t| t.to_rfc3339())),
            }),
        });
    }

    fn state(&self) -> Option<SensorState> {
        self.state.clone()
    }
}

/// Sum of completed days; no value until the first day is committed
#[derive(Debug, Clone, Default)]
pub struct DailyTotalSensor {
    state: Option<SensorState>,
}

impl DailyTotalSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresentationSink for DailyTotalSensor {
    fn update(&mut self, snapshot: &PollSnapshot) {
        let daily = &snapshot.daily_total;
        self.state = Some(SensorState {
            unique_id: unique_id("daily", &snapshot.metering_point_id),
            name: "JSE Helmi Daily Total".to_string(),
            unit: snapshot.unit().to_string(),
            value: daily.last_committed_day.map(|_| daily.total),
            available: true,
            attributes: json!({
                "last_day": text_or_null(daily.last_committed_day),
            }),
        });
    }

    fn state(&self) -> Option<SensorState> {
        self.state.clone()
    }
}

/// The hourly, running-total and daily sensors
pub fn default_sinks(stale_hours: u32) -> Vec<Box<dyn PresentationSink>> {
    vec![
        Box::new(HourlySensor::new(stale_hours)),
        Box::new(HourlyTotalSensor::new()),
        Box::new(DailyTotalSensor::new()),
    ]
}
