mod common;

use chrono::DateTime;
use chrono_tz::Tz;
use common::{ScriptedTransport, client, consumption_body};
use helmi::persistence::{MemoryStore, MeterState, StateStore};
use helmi::poller::{MeterPoller, PollerSettings};
use helmi::sensor::default_sinks;
use helmi::totalizer::{DailyOutcome, IncrementalOutcome};
use helmi::{HelmiError, Resolution, Result, TimeNormalizer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

const MP: &str = "FI_JSE000_1";

fn at(text: &str) -> DateTime<Tz> {
    TimeNormalizer::default().parse(text).unwrap()
}

fn poller(transport: &Arc<ScriptedTransport>, store: Arc<dyn StateStore>) -> MeterPoller {
    MeterPoller::new(client(transport), store, "jes_1", MP, PollerSettings::default())
        .unwrap()
        .with_sinks(default_sinks(6))
}

/// Hourly 0.5 kWh points for the whole of 2026-01-16 and the morning after
fn two_day_body() -> String {
    let mut points = Vec::new();
    for day in ["2026-01-16", "2026-01-17"] {
        for hour in 0..24 {
            points.push(format!("{day}T{hour:02}:00:00+02:00"));
        }
    }
    let refs: Vec<(&str, Option<f64>)> = points.iter().map(|p| (p.as_str(), Some(0.5))).collect();
    consumption_body(&refs)
}

struct FailingStore;

impl StateStore for FailingStore {
    fn load(&self, _metering_point_id: &str) -> Result<MeterState> {
        Ok(MeterState::default())
    }

    fn save(&self, _metering_point_id: &str, _state: &MeterState) -> Result<()> {
        Err(HelmiError::persistence("disk full"))
    }
}

/// Fails the first `failures` saves, then behaves like a memory store
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
}

impl StateStore for FlakyStore {
    fn load(&self, metering_point_id: &str) -> Result<MeterState> {
        self.inner.load(metering_point_id)
    }

    fn save(&self, metering_point_id: &str, state: &MeterState) -> Result<()> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(HelmiError::persistence("disk full"));
        }
        self.inner.save(metering_point_id, state)
    }
}

#[tokio::test(start_paused = true)]
async fn first_poll_seeds_and_commits_yesterday() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(200, two_day_body());

    let store = Arc::new(MemoryStore::new());
    let poller = poller(&transport, store.clone());
    let report = poller.poll_once(at("2026-01-17T10:20:00")).await.unwrap();

    // 10:00 and later are beyond the window end
    assert_eq!(report.points, 34);
    assert_eq!(report.hourly, IncrementalOutcome::Seeded);
    assert!(matches!(report.daily, DailyOutcome::Committed { sum, .. } if sum == 12.0));
    assert!(report.persisted);

    let state = poller.state().await;
    assert_eq!(state.hourly.total, 0.5);
    assert_eq!(state.daily.total, 12.0);
    assert_eq!(store.load(MP).unwrap(), state);

    let sensors = poller.sensor_states().await;
    assert_eq!(sensors.len(), 3);
    assert_eq!(sensors[0].unique_id, "jse_helmi_consumption_hourly_FI_JSE000_1");
    assert!(sensors[0].available);
    assert_eq!(sensors[1].value, Some(0.5));
    assert_eq!(sensors[2].value, Some(12.0));
}

#[tokio::test(start_paused = true)]
async fn next_poll_counts_only_new_hours() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(200, two_day_body());
    transport.push_api(200, two_day_body());

    let poller = poller(&transport, Arc::new(MemoryStore::new()));
    poller.poll_once(at("2026-01-17T10:20:00")).await.unwrap();
    let report = poller.poll_once(at("2026-01-17T13:15:00")).await.unwrap();

    // 10:00, 11:00 and 12:00 became complete
    assert_eq!(report.hourly, IncrementalOutcome::Counted(3));
    assert!(matches!(report.daily, DailyOutcome::AlreadyCommitted(_)));
    let state = poller.state().await;
    assert_eq!(state.hourly.total, 2.0);
    assert_eq!(state.daily.total, 12.0);
}

#[tokio::test(start_paused = true)]
async fn unchanged_state_is_not_rewritten() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(200, two_day_body());
    transport.push_api(200, two_day_body());

    let poller = poller(&transport, Arc::new(MemoryStore::new()));
    poller.poll_once(at("2026-01-17T10:20:00")).await.unwrap();
    let report = poller.poll_once(at("2026-01-17T10:40:00")).await.unwrap();
    assert_eq!(report.hourly, IncrementalOutcome::Unchanged);
    assert!(!report.persisted);
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_from_stored_state() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());

    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(200, two_day_body());
    poller(&transport, Arc::clone(&store))
        .poll_once(at("2026-01-17T10:20:00"))
        .await
        .unwrap();

    // New process, same store, same window re-delivered
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(200, two_day_body());
    let restarted = poller(&transport, Arc::clone(&store));
    let report = restarted.poll_once(at("2026-01-17T10:50:00")).await.unwrap();
    assert_eq!(report.hourly, IncrementalOutcome::Unchanged);
    assert_eq!(restarted.state().await.hourly.total, 0.5);
    assert_eq!(restarted.state().await.daily.total, 12.0);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_leaves_state_untouched() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(200, two_day_body());
    transport.push_api(404, "");

    let poller = poller(&transport, Arc::new(MemoryStore::new()));
    poller.poll_once(at("2026-01-17T10:20:00")).await.unwrap();
    let before = poller.state().await;

    let err = poller.poll_once(at("2026-01-17T12:20:00")).await.unwrap_err();
    assert!(matches!(err, HelmiError::RequestFailed { status: Some(404), .. }));
    assert_eq!(poller.state().await, before);
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_is_reported_but_state_kept() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(200, two_day_body());

    let poller = poller(&transport, Arc::new(FailingStore));
    let err = poller.poll_once(at("2026-01-17T10:20:00")).await.unwrap_err();
    assert!(matches!(err, HelmiError::PersistenceFailed { .. }));

    let state = poller.state().await;
    assert_eq!(state.hourly.total, 0.5);
    assert_eq!(poller.sensor_states().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_save_is_retried_on_next_poll() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    for _ in 0..3 {
        transport.push_api(200, two_day_body());
    }

    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        failures: AtomicUsize::new(1),
    });
    let poller = poller(&transport, store.clone());
    assert!(poller.poll_once(at("2026-01-17T10:20:00")).await.is_err());
    assert_eq!(store.load(MP).unwrap(), MeterState::default());

    // Same window, nothing new to count, but the store is behind
    let report = poller.poll_once(at("2026-01-17T10:40:00")).await.unwrap();
    assert_eq!(report.hourly, IncrementalOutcome::Unchanged);
    assert!(report.persisted);
    assert_eq!(store.load(MP).unwrap(), poller.state().await);

    let report = poller.poll_once(at("2026-01-17T10:50:00")).await.unwrap();
    assert!(!report.persisted);
}

#[tokio::test(start_paused = true)]
async fn day_resolution_skips_the_day_in_progress() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(
        200,
        consumption_body(&[
            ("2026-01-15T00:00:00+02:00", Some(10.0)),
            ("2026-01-16T00:00:00+02:00", Some(12.0)),
            ("2026-01-17T00:00:00+02:00", Some(3.0)),
        ]),
    );
    transport.push_api(
        200,
        consumption_body(&[
            ("2026-01-16T00:00:00+02:00", Some(12.0)),
            ("2026-01-17T00:00:00+02:00", Some(9.0)),
            ("2026-01-18T00:00:00+02:00", Some(1.0)),
        ]),
    );

    let settings = PollerSettings {
        resolution: Resolution::Day,
        ..PollerSettings::default()
    };
    let poller = MeterPoller::new(
        client(&transport),
        Arc::new(MemoryStore::new()),
        "jes_1",
        MP,
        settings,
    )
    .unwrap();

    let report = poller.poll_once(at("2026-01-17T10:20:00")).await.unwrap();
    assert_eq!(report.points, 2);
    assert_eq!(report.hourly, IncrementalOutcome::Seeded);
    let state = poller.state().await;
    assert_eq!(state.hourly.total, 12.0);
    assert_eq!(
        state.hourly.last_counted_timestamp,
        Some(at("2026-01-16T00:00:00").fixed_offset())
    );

    // The 17th is complete now and counted with its final value
    let report = poller.poll_once(at("2026-01-18T10:20:00")).await.unwrap();
    assert_eq!(report.hourly, IncrementalOutcome::Counted(1));
    let state = poller.state().await;
    assert_eq!(state.hourly.total, 21.0);
    assert_eq!(state.daily.total, 21.0);

    let request = &transport.api_requests()[0];
    assert_eq!(request.param("resolution"), Some("day"));
    assert_eq!(request.param("start"), Some("2026-01-15T00:00:00+02:00"));
    assert_eq!(request.param("end"), Some("2026-01-17T00:00:00+02:00"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_polls_are_serialized() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(200, two_day_body());
    transport.push_api(200, two_day_body());

    let poller = poller(&transport, Arc::new(MemoryStore::new()));
    let now = at("2026-01-17T10:20:00");
    let (a, b) = tokio::join!(poller.poll_once(now), poller.poll_once(now));
    a.unwrap();
    b.unwrap();

    let state = poller.state().await;
    assert_eq!(state.hourly.total, 0.5);
    assert_eq!(state.daily.total, 12.0);
}

#[tokio::test(start_paused = true)]
async fn run_exits_immediately_when_already_shut_down() {
    let transport = ScriptedTransport::new();
    let poller = poller(&transport, Arc::new(MemoryStore::new()));

    let (_tx, rx) = watch::channel(true);
    poller.run(rx).await;
    assert!(transport.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_poll_in_backoff() {
    let transport = ScriptedTransport::new();
    transport.push_login("token");
    transport.push_api(503, "");

    let poller = Arc::new(poller(&transport, Arc::new(MemoryStore::new())));
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn({
        let poller = Arc::clone(&poller);
        async move { poller.run(rx).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();
    task.await.unwrap();

    assert_eq!(transport.api_requests().len(), 1);
    assert_eq!(poller.state().await, MeterState::default());
}
