//! # Helmi - metered energy poller for JSE Helmi
//!
//! Polls a utility's metered-energy API for a metering point, normalizes
//! the readings into the reference zone and keeps two cumulative totals
//! that survive restarts.
//!
//! ## Architecture
//!
//! - `timestamp`: timestamp parsing into the reference zone
//! - `consumption`: payload normalization into ordered point windows
//! - `http`: transport seam and the `reqwest` implementation
//! - `auth`: identity-provider login session
//! - `client`: authenticated GET with re-login and backoff
//! - `api`: metering API endpoints
//! - `fetcher`: range and rolling-window consumption fetches
//! - `totalizer`: incremental and daily totals
//! - `persistence`: durable totalizer state
//! - `sensor`: presentation sinks
//! - `poller`: per-metering-point poll cycle and schedule
//! - `cli`: command-line handlers
//! - `config`, `logging`, `error`: configuration, tracing setup and errors

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod consumption;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod logging;
pub mod persistence;
pub mod poller;
pub mod sensor;
pub mod timestamp;
pub mod totalizer;

// Re-export commonly used types
pub use auth::{AuthSession, AuthTokens};
pub use client::{RetryPolicy, RetryingHttpClient};
pub use config::Config;
pub use consumption::{
    ConsumptionPoint, NormalizedConsumption, PointWindow, Resolution,
    normalize_consumption_response,
};
pub use error::{HelmiError, Result};
pub use fetcher::{ConsumptionFetcher, ConsumptionRequest};
pub use persistence::{JsonFileStore, MemoryStore, MeterState, StateStore};
pub use poller::MeterPoller;
pub use sensor::{PollSnapshot, PresentationSink};
pub use timestamp::TimeNormalizer;
pub use totalizer::{DailyTotalizer, IncrementalTotalizer};
