//! Error types for trackwatch.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Cycle error: {0}")]
    Cycle(#[from] CycleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors from the libSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors from fetching a source's collection.
///
/// A transient error (network, rate limit, 5xx) clears on its own and the
/// source is simply retried next cycle. A fatal error (auth, bad request,
/// malformed body) needs operator attention; the source is skipped for the
/// cycle and logged at a higher severity.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Transient failure fetching {source_name}: {reason}")]
    Transient { source_name: String, reason: String },

    #[error("Fatal failure fetching {source_name}: {reason}")]
    Fatal { source_name: String, reason: String },

    #[error("Could not resolve {name}: {reason}")]
    Resolve { name: String, reason: String },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient { .. })
    }
}

/// A send to a channel failed after retries.
///
/// Channel removal ("channel gone") is NOT an error — the messenger reports
/// it as a `SendOutcome` so the dispatcher can prune the subscription index.
#[derive(Debug, thiserror::Error)]
#[error("Failed to deliver to channel {channel_id}: {reason}")]
pub struct DeliveryError {
    pub channel_id: u64,
    pub reason: String,
}

/// Cycle-level failures reported by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// Every configured source of one kind failed in a single cycle.
    /// Likely a credential or connectivity problem rather than per-source noise.
    #[error("All {kind} sources failed this cycle")]
    AllSourcesFailed { kind: &'static str },
}
