//! Harvest service: drains the shared aggregates on a fixed interval
//! and assembles the outbound payload.
//!
//! The service owns the drain; callers interact through a cloneable
//! [`HarvestHandle`] over an unbounded command channel. A final
//! harvest runs on shutdown so telemetry recorded after the last tick
//! is not lost.

use crate::agent::Agent;
use crate::logs::LogEvent;
use crate::metrics::MetricSummary;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const SUPPORTABILITY_LOGS_DROPPED: &str = "Supportability/Logging/Forwarding/Dropped";
const SUPPORTABILITY_METRICS_DROPPED: &str = "Supportability/MetricData/Dropped";

/// Everything drained in one harvest cycle, ready for serialization.
#[derive(Debug, Default, Serialize)]
pub struct HarvestPayload {
    pub metrics: Vec<MetricSummary>,
    pub log_events: Vec<LogEvent>,
    pub dropped_log_events: u64,
}

impl HarvestPayload {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.log_events.is_empty() && self.dropped_log_events == 0
    }
}

#[derive(Debug)]
enum HarvestCommand {
    Harvest(oneshot::Sender<HarvestPayload>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct HarvestHandle {
    tx: mpsc::UnboundedSender<HarvestCommand>,
}

impl HarvestHandle {
    /// Run one harvest cycle and return its payload.
    pub async fn harvest(&self) -> Result<HarvestPayload, String> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(HarvestCommand::Harvest(tx))
            .map_err(|e| format!("harvest service unavailable: {e}"))?;
        rx.await
            .map_err(|e| format!("harvest reply dropped: {e}"))
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(HarvestCommand::Shutdown);
    }
}

pub struct HarvestService {
    agent: Arc<Agent>,
    rx: mpsc::UnboundedReceiver<HarvestCommand>,
}

impl HarvestService {
    pub fn new(agent: Arc<Agent>) -> (Self, HarvestHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { agent, rx }, HarvestHandle { tx })
    }

    /// Serve harvest commands until shutdown or all handles are gone.
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                HarvestCommand::Harvest(reply) => {
                    let payload = harvest_once(&self.agent);
                    if reply.send(payload).is_err() {
                        debug!("harvest requester went away before the reply");
                    }
                }
                HarvestCommand::Shutdown => break,
            }
        }
        debug!("harvest service stopped");
    }
}

/// Drain the shared aggregates into one payload. Drop counts surface
/// as supportability counters, not errors.
fn harvest_once(agent: &Agent) -> HarvestPayload {
    let metric_snapshot = agent.flush_metrics();
    let log_snapshot = agent.flush_logs();

    let mut metrics: Vec<MetricSummary> = metric_snapshot
        .entries
        .into_iter()
        .map(|(id, data)| MetricSummary::new(id, &data))
        .collect();
    if metric_snapshot.dropped > 0 {
        metrics.push(MetricSummary::counter(
            SUPPORTABILITY_METRICS_DROPPED,
            metric_snapshot.dropped,
        ));
    }
    if log_snapshot.dropped > 0 {
        metrics.push(MetricSummary::counter(
            SUPPORTABILITY_LOGS_DROPPED,
            log_snapshot.dropped,
        ));
    }

    debug!(
        metrics = metrics.len(),
        log_events = log_snapshot.events.len(),
        dropped_log_events = log_snapshot.dropped,
        "harvest cycle complete"
    );

    HarvestPayload {
        metrics,
        log_events: log_snapshot.events,
        dropped_log_events: log_snapshot.dropped,
    }
}

/// Drive the periodic harvest until cancellation, emitting each
/// non-empty payload on `sink`. Runs one last cycle on the way out.
pub async fn run_harvest_loop(
    handle: HarvestHandle,
    interval: Duration,
    cancel_token: CancellationToken,
    sink: mpsc::Sender<HarvestPayload>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so the first real
    // harvest happens a full interval after startup.
    ticker.tick().await;

    loop {
        select! {
            _ = ticker.tick() => {
                emit(&handle, &sink).await;
            }
            _ = cancel_token.cancelled() => {
                debug!("harvest loop cancelled, running final harvest");
                emit(&handle, &sink).await;
                handle.shutdown();
                return;
            }
        }
    }
}

async fn emit(handle: &HarvestHandle, sink: &mpsc::Sender<HarvestPayload>) {
    match handle.harvest().await {
        Ok(payload) => {
            if payload.is_empty() {
                return;
            }
            if sink.send(payload).await.is_err() {
                debug!("harvest payload receiver closed");
            }
        }
        Err(e) => error!("harvest cycle failed: {e}"),
    }
}
