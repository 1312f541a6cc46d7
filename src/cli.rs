//! Command-line surface
//!
//! Every command returns its result as JSON so the binary only has to print
//! it. The handlers take the client explicitly and are usable without a
//! process around them.

use crate::client::RetryingHttpClient;
use crate::config::Config;
use crate::consumption::Resolution;
use crate::error::{HelmiError, Result};
use crate::fetcher::{ConsumptionFetcher, ConsumptionRequest};
use crate::http::HttpTransport;
use crate::persistence::StateStore;
use crate::poller::{MeterPoller, PollerSettings};
use crate::sensor::default_sinks;
use crate::timestamp::TimeNormalizer;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version = env!("APP_VERSION"), about, propagate_version = true)]
#[must_use]
pub struct Args {
    /// Configuration file; searched in the default locations when omitted.
    #[clap(long, env = "HELMI_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and print the account subject.
    #[clap(name = "login-test")]
    LoginTest,

    /// List customers and their metering points.
    #[clap(name = "customers")]
    Customers,

    /// Fetch and normalize consumption for a range.
    #[clap(name = "consumption")]
    Consumption(ConsumptionArgs),

    /// Poll the configured metering point and keep the totals.
    #[clap(name = "run")]
    Run(RunArgs),
}

#[derive(Parser)]
pub struct ConsumptionArgs {
    /// Range start: date, or date-time with or without offset.
    #[clap(long)]
    pub start: String,

    /// Range end, same shapes as `--start`.
    #[clap(long)]
    pub end: String,

    #[clap(long, value_enum, default_value_t = Resolution::Hour)]
    pub granularity: Resolution,

    /// Defaults to the account's first customer.
    #[clap(long)]
    pub customer_id: Option<String>,

    /// Defaults to the customer's first metering point.
    #[clap(long)]
    pub metering_point_id: Option<String>,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Poll once, print the sensor states and exit.
    #[clap(long)]
    pub once: bool,
}

/// `login-test`
pub async fn login_test(client: &mut RetryingHttpClient) -> Result<Value> {
    let expires_in = client.session_mut().login().await?.expires_in;
    let sub = client.user_sub().await?;
    Ok(json!({ "ok": true, "sub": sub, "expires_in": expires_in }))
}

/// `customers`
pub async fn customers(client: &mut RetryingHttpClient) -> Result<Value> {
    let sub = client.user_sub().await?;
    let mut customers = Vec::new();
    for customer_id in client.customer_ids(&sub).await? {
        let metering_point_ids = client.metering_point_ids(&customer_id).await?;
        customers.push(json!({
            "customer_id": customer_id,
            "metering_point_ids": metering_point_ids,
        }));
    }
    Ok(json!({ "sub": sub, "customers": customers }))
}

/// `consumption`
pub async fn consumption(
    client: &mut RetryingHttpClient,
    args: &ConsumptionArgs,
    normalizer: TimeNormalizer,
) -> Result<Value> {
    // Reject bad input before logging in
    normalizer.parse(&args.start)?;
    normalizer.parse(&args.end)?;

    let (customer_id, metering_point_id) = resolve_meter(
        client,
        args.customer_id.as_deref(),
        args.metering_point_id.as_deref(),
    )
    .await?;

    let request = ConsumptionRequest {
        customer_id: customer_id.clone(),
        metering_point_id: metering_point_id.clone(),
        start: args.start.clone(),
        end: args.end.clone(),
        resolution: args.granularity,
    };
    let normalized = ConsumptionFetcher::new(normalizer)
        .fetch(client, &request)
        .await?;

    Ok(json!({
        "customer_id": customer_id,
        "metering_point_id": metering_point_id,
        "granularity": normalized.granularity,
        "unit": normalized.unit,
        "series": normalized.points,
    }))
}

/// Fill in a missing customer or metering point id from the account
pub async fn resolve_meter(
    client: &mut RetryingHttpClient,
    customer_id: Option<&str>,
    metering_point_id: Option<&str>,
) -> Result<(String, String)> {
    let customer_id = match customer_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id.to_string(),
        None => {
            let sub = client.user_sub().await?;
            client
                .customer_ids(&sub)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| HelmiError::request("No customer ids linked to the account"))?
        }
    };

    let metering_point_id = match metering_point_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id.to_string(),
        None => client
            .metering_point_ids(&customer_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                HelmiError::request(format!("No metering points for customer {customer_id}"))
            })?,
    };

    Ok((customer_id, metering_point_id))
}

/// Poller for the configured (or first available) metering point with the
/// standard sensors attached
pub async fn build_poller(
    config: &Config,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn StateStore>,
) -> Result<MeterPoller> {
    let settings = PollerSettings::from_config(config)?;
    let mut client = RetryingHttpClient::from_config(transport, config);
    let (customer_id, metering_point_id) = resolve_meter(
        &mut client,
        Some(config.meter.customer_id.as_str()),
        Some(config.meter.metering_point_id.as_str()),
    )
    .await?;

    Ok(
        MeterPoller::new(client, store, customer_id, metering_point_id, settings)?
            .with_sinks(default_sinks(config.polling.stale_hours)),
    )
}

/// `run --once`: a single poll followed by the sensor states
pub async fn poll_once(poller: &MeterPoller) -> Result<Value> {
    let now = poller.settings().normalizer.localize(&chrono::Utc::now());
    let report = poller.poll_once(now).await?;
    Ok(json!({
        "metering_point_id": poller.metering_point_id(),
        "points": report.points,
        "skipped": report.skipped,
        "persisted": report.persisted,
        "sensors": poller.sensor_states().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_consumption_arguments() {
        let args = Args::try_parse_from([
            "helmi",
            "consumption",
            "--start",
            "2026-01-17",
            "--end",
            "2026-01-18",
            "--granularity",
            "day",
        ])
        .unwrap();
        match args.command {
            Command::Consumption(c) => {
                assert_eq!(c.granularity, Resolution::Day);
                assert_eq!(c.start, "2026-01-17");
                assert!(c.customer_id.is_none());
            }
            _ => panic!("expected consumption"),
        }
    }

    #[test]
    fn parses_global_config_and_run_once() {
        let args =
            Args::try_parse_from(["helmi", "run", "--once", "--config", "/tmp/h.yaml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/h.yaml")));
        assert!(matches!(args.command, Command::Run(RunArgs { once: true })));
    }

    #[test]
    fn rejects_unknown_granularity() {
        assert!(
            Args::try_parse_from([
                "helmi",
                "consumption",
                "--start",
                "a",
                "--end",
                "b",
                "--granularity",
                "week"
            ])
            .is_err()
        );
    }
}
