//! Environment-driven configuration.
//!
//! Everything is resolved once at startup from the process environment
//! (`.env` files are loaded via dotenvy before this runs). Secrets are held
//! as [`SecretString`] so they never land in debug output.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    optional_env(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Which store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// PostgreSQL via deadpool-postgres (default).
    #[default]
    Postgres,
    /// In-process memory store, for development and tests.
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(format!(
                "invalid store backend '{}', expected 'postgres' or 'memory'",
                s
            )),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: SecretString,
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let backend: StoreBackend = parse_env("DATABASE_BACKEND", StoreBackend::default())?;

        // DATABASE_URL is required only for the postgres backend.
        let url = match backend {
            StoreBackend::Postgres => require_env("DATABASE_URL")?,
            StoreBackend::Memory => optional_env("DATABASE_URL").unwrap_or_default(),
        };

        Ok(Self {
            backend,
            url: SecretString::from(url),
            pool_size: parse_env("DATABASE_POOL_SIZE", 8usize)?,
        })
    }
}

/// Geocoding gateway configuration.
#[derive(Debug, Clone)]
pub struct GeocodingConfig {
    /// Google Maps API key. When absent every address is unresolvable and
    /// listings fall back to id ordering; registration cannot complete.
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl GeocodingConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: optional_env("GOOGLE_MAPS_API_KEY").map(SecretString::from),
            timeout: Duration::from_secs(parse_env("SHIFTBOT_GEOCODE_TIMEOUT_SECS", 10u64)?),
        })
    }
}

/// LINE channel configuration.
#[derive(Debug, Clone)]
pub struct LineConfig {
    pub access_token: SecretString,
    /// Bound on any single Messaging API call.
    pub timeout: Duration,
}

impl LineConfig {
    /// `None` when LINE is not configured; the engine then runs with the
    /// console channel only.
    pub(crate) fn resolve() -> Result<Option<Self>, ConfigError> {
        let Some(token) = optional_env("LINE_CHANNEL_ACCESS_TOKEN") else {
            return Ok(None);
        };
        Ok(Some(Self {
            access_token: SecretString::from(token),
            timeout: Duration::from_secs(parse_env("LINE_TIMEOUT_SECS", 10u64)?),
        }))
    }
}

/// Dialog engine tuning.
#[derive(Debug, Clone)]
pub struct DialogConfig {
    /// Sessions idle longer than this are treated as fresh on the next event.
    pub session_timeout: Duration,
    /// Open postings per listing page.
    pub page_size: usize,
    /// Bound on any single store call made during a turn.
    pub store_timeout: Duration,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(24 * 60 * 60),
            page_size: 5,
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl DialogConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            session_timeout: Duration::from_secs(parse_env(
                "SHIFTBOT_SESSION_TIMEOUT_SECS",
                defaults.session_timeout.as_secs(),
            )?),
            page_size: parse_env("SHIFTBOT_PAGE_SIZE", defaults.page_size)?,
            store_timeout: Duration::from_secs(parse_env(
                "SHIFTBOT_STORE_TIMEOUT_SECS",
                defaults.store_timeout.as_secs(),
            )?),
        })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub geocoding: GeocodingConfig,
    pub line: Option<LineConfig>,
    pub dialog: DialogConfig,
}

impl Config {
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::resolve()?,
            geocoding: GeocodingConfig::resolve()?,
            line: LineConfig::resolve()?,
            dialog: DialogConfig::resolve()?,
        })
    }
}
