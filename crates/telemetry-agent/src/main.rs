#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use telemetry_core::{run_harvest_loop, Agent, AgentConfig, HarvestService};

#[tokio::main]
pub async fn main() {
    let config = match AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error creating config on telemetry agent startup: {e}");
            return;
        }
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level)
                .expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let harvest_interval = Duration::from_secs(config.harvest_interval_secs);

    let agent = match Agent::new(config) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!("Error creating agent on telemetry agent startup: {e}");
            return;
        }
    };

    let (service, handle) = HarvestService::new(Arc::clone(&agent));
    tokio::spawn(service.run());

    let cancel_token = CancellationToken::new();
    let (payload_tx, mut payload_rx) = mpsc::channel(16);

    let harvest_loop = tokio::spawn(run_harvest_loop(
        handle,
        harvest_interval,
        cancel_token.clone(),
        payload_tx,
    ));

    info!(
        "telemetry agent started, harvesting every {}s",
        harvest_interval.as_secs()
    );

    let writer = tokio::spawn(async move {
        while let Some(payload) = payload_rx.recv().await {
            match serde_json::to_string(&payload) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("failed to serialize harvest payload: {e}"),
            }
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received, running final harvest"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    cancel_token.cancel();
    if let Err(e) = harvest_loop.await {
        error!("harvest loop task failed: {e}");
    }
    if let Err(e) = writer.await {
        error!("payload writer task failed: {e}");
    }
    info!("telemetry agent stopped");
}
