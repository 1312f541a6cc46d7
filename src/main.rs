use anyhow::{Context, Result};
use clap::Parser;
use helmi::cli::{self, Args, Command};
use helmi::http::{HttpTransport, ReqwestTransport};
use helmi::logging::init_logging;
use helmi::persistence::JsonFileStore;
use helmi::{Config, RetryingHttpClient, TimeNormalizer};
use serde_json::Value;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(Some(output)) => {
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<Option<Value>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load()?,
    };
    config.apply_env_overrides();
    config.validate()?;
    init_logging(&config.logging)?;
    config.require_credentials()?;

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
        Duration::from_secs(config.api.timeout_seconds),
    )?);
    let normalizer = TimeNormalizer::new(config.reference_zone()?);

    let output = match args.command {
        Command::LoginTest => {
            let mut client = RetryingHttpClient::from_config(transport, &config);
            Some(cli::login_test(&mut client).await?)
        }
        Command::Customers => {
            let mut client = RetryingHttpClient::from_config(transport, &config);
            Some(cli::customers(&mut client).await?)
        }
        Command::Consumption(consumption) => {
            let mut client = RetryingHttpClient::from_config(transport, &config);
            Some(cli::consumption(&mut client, &consumption, normalizer).await?)
        }
        Command::Run(run_args) => {
            let store = Arc::new(JsonFileStore::new(&config.persistence.state_file));
            let poller = cli::build_poller(&config, transport, store).await?;
            if run_args.once {
                Some(cli::poll_once(&poller).await?)
            } else {
                run_daemon(poller).await?;
                None
            }
        }
    };
    Ok(output)
}

async fn run_daemon(poller: helmi::MeterPoller) -> Result<()> {
    info!(
        "Helmi {} polling {}",
        env!("APP_VERSION"),
        poller.metering_point_id()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = Arc::new(poller);
    let task = tokio::spawn({
        let poller = Arc::clone(&poller);
        async move { poller.run(shutdown_rx).await }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    shutdown_tx.send(true).ok();
    task.await.context("poller task panicked")?;
    Ok(())
}
