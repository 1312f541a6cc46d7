//! Per-metering-point poll cycle and schedule
//!
//! One [`MeterPoller`] owns the client, the restored totalizer state and
//! the presentation sinks of a single metering point. Polls are serialized
//! by a mutex around that state.

use crate::client::RetryingHttpClient;
use crate::config::Config;
use crate::consumption::Resolution;
use crate::error::Result;
use crate::fetcher::ConsumptionFetcher;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::persistence::{MeterState, StateStore};
use crate::sensor::{PollSnapshot, PresentationSink, SensorState};
use crate::timestamp::{TimeNormalizer, floor_to_hour};
use crate::totalizer::{DailyOutcome, DailyTotalizer, IncrementalOutcome, IncrementalTotalizer};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

/// Poll settings for one metering point
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub window_hours: u32,
    pub resolution: Resolution,
    pub cutoff_hour: u32,
    pub update_minute: u32,
    pub normalizer: TimeNormalizer,
}

impl PollerSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            window_hours: config.polling.window_hours,
            resolution: config.polling.resolution,
            cutoff_hour: config.polling.cutoff_hour,
            update_minute: config.polling.update_minute,
            normalizer: TimeNormalizer::new(config.reference_zone()?),
        })
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        let polling = crate::config::PollingConfig::default();
        Self {
            window_hours: polling.window_hours,
            resolution: polling.resolution,
            cutoff_hour: polling.cutoff_hour,
            update_minute: polling.update_minute,
            normalizer: TimeNormalizer::default(),
        }
    }
}

/// What a successful poll did
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub points: usize,
    pub skipped: usize,
    pub hourly: IncrementalOutcome,
    pub daily: DailyOutcome,
    pub persisted: bool,
}

struct PollerInner {
    client: RetryingHttpClient,
    state: MeterState,
    /// The in-memory state is newer than the store
    unsaved: bool,
    sinks: Vec<Box<dyn PresentationSink>>,
}

pub struct MeterPoller {
    customer_id: String,
    metering_point_id: String,
    settings: PollerSettings,
    fetcher: ConsumptionFetcher,
    daily: DailyTotalizer,
    store: Arc<dyn StateStore>,
    inner: Mutex<PollerInner>,
    logger: StructuredLogger,
}

impl MeterPoller {
    /// Create a poller, restoring state from `store`
    pub fn new(
        client: RetryingHttpClient,
        store: Arc<dyn StateStore>,
        customer_id: impl Into<String>,
        metering_point_id: impl Into<String>,
        settings: PollerSettings,
    ) -> Result<Self> {
        let customer_id = customer_id.into();
        let metering_point_id = metering_point_id.into();
        let daily = DailyTotalizer::new(settings.cutoff_hour, settings.normalizer)?;
        let state = store.load(&metering_point_id)?;
        let logger = get_logger_with_context(
            LogContext::new("poller")
                .with_metering_point(&metering_point_id)
                .with_field("customer", customer_id.clone()),
        );

        Ok(Self {
            customer_id,
            metering_point_id,
            settings,
            fetcher: ConsumptionFetcher::new(settings.normalizer),
            daily,
            store,
            inner: Mutex::new(PollerInner {
                client,
                state,
                unsaved: false,
                sinks: Vec::new(),
            }),
            logger,
        })
    }

    pub fn with_sinks(mut self, sinks: Vec<Box<dyn PresentationSink>>) -> Self {
        self.inner.get_mut().sinks.extend(sinks);
        self
    }

    pub fn metering_point_id(&self) -> &str {
        &self.metering_point_id
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Current in-memory state
    pub async fn state(&self) -> MeterState {
        self.inner.lock().await.state.clone()
    }

    /// States of all sinks that have received a snapshot
    pub async fn sensor_states(&self) -> Vec<SensorState> {
        let inner = self.inner.lock().await;
        inner.sinks.iter().filter_map(|sink| sink.state()).collect()
    }

    /// Run one poll at wall-clock `now`.
    ///
    /// A failed fetch leaves the state untouched. A failed save is returned
    /// as an error after the in-memory state and the sinks were updated, and
    /// is retried by the next successful fetch even if nothing changed.
    pub async fn poll_once(&self, now: DateTime<Tz>) -> Result<PollReport> {
        let mut inner = self.inner.lock().await;

        let consumption = self
            .fetcher
            .fetch_recent(
                &mut inner.client,
                &self.customer_id,
                &self.metering_point_id,
                &now,
                self.settings.window_hours,
                self.settings.resolution,
            )
            .await
            .inspect_err(|e| self.logger.warn(&format!("Fetch failed: {e}")))?;

        let window = consumption.points;
        let (hourly, hourly_outcome) = IncrementalTotalizer::evaluate(&window, &inner.state.hourly);
        let (daily, daily_outcome) = self.daily.evaluate(&window, &inner.state.daily, &now);
        let next = MeterState { hourly, daily };

        let persist = inner.unsaved || next != inner.state;
        let saved = if persist {
            Some(self.store.save(&self.metering_point_id, &next))
        } else {
            None
        };
        inner.unsaved = matches!(saved, Some(Err(_)));
        inner.state = next;

        let snapshot = PollSnapshot {
            customer_id: self.customer_id.clone(),
            metering_point_id: self.metering_point_id.clone(),
            unit: consumption.unit,
            window,
            hourly_total: inner.state.hourly.clone(),
            daily_total: inner.state.daily.clone(),
            taken_at: now,
        };
        for sink in inner.sinks.iter_mut() {
            sink.update(&snapshot);
        }

        if let Some(Err(e)) = saved {
            self.logger.error(&format!("Could not persist state: {e}"));
            return Err(e);
        }

        if let DailyOutcome::Committed { day, sum } = daily_outcome {
            self.logger
                .info(&format!("Committed {day} to daily total ({sum:.3})"));
        }
        let report = PollReport {
            points: snapshot.window.len(),
            skipped: consumption.skipped,
            hourly: hourly_outcome,
            daily: daily_outcome,
            persisted: persist,
        };
        self.logger.debug(&format!(
            "Poll done: {} points, hourly {:?}, total {:.3}",
            report.points, report.hourly, inner.state.hourly.total
        ));
        Ok(report)
    }

    /// Poll now and then every hour at `update_minute` until `shutdown`
    /// turns true or its sender is dropped.
    ///
    /// Shutdown also cancels a poll in progress, including its backoff.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.logger.info("Poller started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = self.settings.normalizer.localize(&Utc::now());
            tokio::select! {
                result = self.poll_once(now) => {
                    if let Err(e) = result {
                        self.logger.error(&format!("Poll failed: {e}"));
                    }
                }
                _ = shutdown.changed() => {
                    self.logger.info("Shutdown requested during poll");
                    break;
                }
            }

            let now = self.settings.normalizer.localize(&Utc::now());
            let next = next_poll_at(&now, self.settings.update_minute);
            let wait = (next - now).to_std().unwrap_or_default();
            self.logger
                .debug(&format!("Next poll at {}", next.to_rfc3339()));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.logger.info("Poller stopped");
    }
}

/// First instant strictly after `now` at `update_minute` past an hour
pub fn next_poll_at(now: &DateTime<Tz>, update_minute: u32) -> DateTime<Tz> {
    let candidate = floor_to_hour(*now) + Duration::minutes(i64::from(update_minute.min(59)));
    if candidate > *now {
        candidate
    } else {
        candidate + Duration::hours(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> DateTime<Tz> {
        TimeNormalizer::default().parse(text).unwrap()
    }

    #[test]
    fn next_poll_later_this_hour() {
        assert_eq!(
            next_poll_at(&at("2026-01-17T10:05:00"), 15),
            at("2026-01-17T10:15:00")
        );
    }

    #[test]
    fn next_poll_is_strictly_after_now() {
        assert_eq!(
            next_poll_at(&at("2026-01-17T10:15:00"), 15),
            at("2026-01-17T11:15:00")
        );
        assert_eq!(
            next_poll_at(&at("2026-01-17T23:40:10"), 15),
            at("2026-01-18T00:15:00")
        );
    }

    #[test]
    fn next_poll_across_dst_change() {
        // 02:59 EET is followed by 04:00 EEST
        let next = next_poll_at(&at("2026-03-29T02:30:00"), 15);
        assert_eq!(next.to_rfc3339(), "2026-03-29T04:15:00+03:00");
    }
}
