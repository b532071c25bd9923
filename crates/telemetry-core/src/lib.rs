//! Public entry points for the telemetry core crate.
//!
//! The module re-exports the building blocks a host framework adapter
//! needs to embed the agent: the [`Agent`] facade, transaction and
//! span handles, the harvest service, and the configuration surface,
//! without digging into the internal module layout.

pub mod agent;
pub mod config;
pub mod constants;
pub mod context;
pub mod errors;
pub mod harvest;
pub mod linking;
pub mod logs;
pub mod metrics;
pub mod span;
pub mod transaction;

pub use agent::Agent;
pub use config::{AgentConfig, ApplicationLogging, EventHarvestConfig, HarvestLimits, Toggle};
pub use context::{ContextRegistry, ContextToken, UnitId};
pub use harvest::{run_harvest_loop, HarvestHandle, HarvestPayload, HarvestService};
pub use linking::{LinkingMetadata, LinkingMetadataProvider};
pub use logs::{LogEvent, LogEventBuffer, LogLevel, LogSnapshot};
pub use metrics::{
    DoubleBufferedAggregator, MetricData, MetricId, MetricSnapshot, MetricStore, MetricSummary,
};
pub use span::{Outcome, SpanCategory, SpanHandle, SpanNode};
pub use transaction::{
    FinishedTransaction, TransactionHandle, TransactionKind, TransactionState,
};
