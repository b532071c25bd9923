/// Maximum length of a forwarded log message in bytes.
///
/// Longer messages are truncated on a UTF-8 character boundary so a
/// multi-byte character is never split.
pub const MAX_LOG_MESSAGE_LENGTH: usize = 32_768;

/// Default number of distinct (name, scope) metric entries kept per
/// harvest cycle. Entries past this limit are dropped and counted.
pub const DEFAULT_METRIC_DATA_LIMIT: usize = 2_000;

/// Default number of log events kept per harvest cycle across the
/// whole application.
pub const DEFAULT_LOG_EVENT_DATA_LIMIT: usize = 10_000;

/// A single transaction may buffer at most `log_event_data / 12`
/// events, so one noisy unit of work cannot consume the whole
/// application budget in a cycle.
pub const TRANSACTION_LOG_CAP_DIVISOR: usize = 12;

/// Default harvest timer interval in seconds.
pub const DEFAULT_HARVEST_INTERVAL_SECS: u64 = 60;
