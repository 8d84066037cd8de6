//! Error types for shiftbot.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Geocoding error: {0}")]
    Geocode(#[from] GeocodeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session/capacity store errors.
///
/// Business outcomes (job full, already applied, ...) are not errors; they
/// live in [`crate::capacity::ApplyOutcome`]. These variants cover the store
/// being unreachable or inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("Pool error: {0}")]
    Pool(String),

    #[cfg(feature = "postgres")]
    #[error("Pool runtime error: {0}")]
    PoolRuntime(#[from] deadpool_postgres::PoolError),
}

impl StoreError {
    /// Shorthand used by backends when a posting id misses.
    pub fn job_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "job".to_string(),
            id: id.to_string(),
        }
    }

    /// Shorthand used by backends when an application id misses.
    pub fn application_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "application".to_string(),
            id: id.to_string(),
        }
    }
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send reply on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} call timed out after {timeout:?}")]
    Timeout {
        name: String,
        timeout: std::time::Duration,
    },

    #[error("Invalid event payload: {0}")]
    InvalidEvent(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Geocoding gateway errors.
///
/// An address that simply does not resolve is *not* an error (the gateway
/// returns `Ok(None)`); these cover transport and protocol failures, which
/// callers treat the same way as unresolvable.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("Geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoding API returned status {status}")]
    ApiStatus { status: String },

    #[error("Geocoding request timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
