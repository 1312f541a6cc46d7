//! Consumption fetching
//!
//! Normalizes the requested range, issues one retried GET and normalizes the
//! payload. [`ConsumptionFetcher::fetch_recent`] adds the rolling poll window
//! used by the daemon.

use crate::api::ConsumptionQuery;
use crate::client::RetryingHttpClient;
use crate::consumption::{NormalizedConsumption, Resolution, normalize_consumption_response};
use crate::error::Result;
use crate::timestamp::TimeNormalizer;
use chrono::{DateTime, Duration, TimeZone};
use chrono_tz::Tz;

/// One consumption request; `start`/`end` accept any timestamp shape the
/// normalizer does
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionRequest {
    pub customer_id: String,
    pub metering_point_id: String,
    pub start: String,
    pub end: String,
    pub resolution: Resolution,
}

/// Half-open `[start, end)` range of a rolling poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl PollWindow {
    /// At least `window_hours` ending at the start of the current interval.
    ///
    /// The interval in progress is excluded: its reading is partial. Both
    /// ends fall on interval boundaries of `resolution`.
    pub fn ending_at<Z: TimeZone>(
        now: &DateTime<Z>,
        window_hours: u32,
        resolution: Resolution,
        normalizer: &TimeNormalizer,
    ) -> Self {
        let end = resolution.interval_start(normalizer.localize(now));
        let start = resolution.interval_start(end - Duration::hours(i64::from(window_hours)));
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumptionFetcher {
    normalizer: TimeNormalizer,
}

impl ConsumptionFetcher {
    pub const fn new(normalizer: TimeNormalizer) -> Self {
        Self { normalizer }
    }

    pub const fn normalizer(&self) -> &TimeNormalizer {
        &self.normalizer
    }

    /// Fetch and normalize one range.
    ///
    /// An unparsable `start`/`end` fails with `InvalidTimestamp` before any
    /// request is sent.
    pub async fn fetch(
        &self,
        client: &mut RetryingHttpClient,
        request: &ConsumptionRequest,
    ) -> Result<NormalizedConsumption> {
        let start = self.normalizer.normalize(&request.start)?;
        let end = self.normalizer.normalize(&request.end)?;

        let payload = client
            .consumption(&ConsumptionQuery {
                customer_id: &request.customer_id,
                metering_point_id: &request.metering_point_id,
                start: &start,
                end: &end,
                resolution: request.resolution,
            })
            .await?;

        Ok(normalize_consumption_response(
            &payload,
            request.resolution,
            &self.normalizer,
        ))
    }

    /// Fetch the rolling window ending at the current interval, dropping
    /// anything the API returns at or after the window end
    pub async fn fetch_recent<Z: TimeZone>(
        &self,
        client: &mut RetryingHttpClient,
        customer_id: &str,
        metering_point_id: &str,
        now: &DateTime<Z>,
        window_hours: u32,
        resolution: Resolution,
    ) -> Result<NormalizedConsumption> {
        let window = PollWindow::ending_at(now, window_hours, resolution, &self.normalizer);
        let request = ConsumptionRequest {
            customer_id: customer_id.to_string(),
            metering_point_id: metering_point_id.to_string(),
            start: window.start.to_rfc3339(),
            end: window.end.to_rfc3339(),
            resolution,
        };

        let mut consumption = self.fetch(client, &request).await?;
        consumption.points = consumption.points.truncate_at(&window.end);
        Ok(consumption)
    }
}
