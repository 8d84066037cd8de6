//! Wiring: config to running engine.

use std::sync::Arc;

use crate::capacity::ApplicationService;
use crate::channels::{Channel, ChannelManager};
use crate::channels::console::ConsoleChannel;
use crate::channels::line::LineChannel;
use crate::config::{Config, StoreBackend};
use crate::dialog::DialogMachine;
use crate::engine::Engine;
use crate::error::Error;
use crate::geocode::{Geocoder, GoogleGeocoder};
use crate::store::memory::MemoryBackend;
use crate::store::Database;

/// Open the configured store backend.
pub async fn open_store(config: &Config) -> Result<Arc<dyn Database>, Error> {
    match config.database.backend {
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            let backend = crate::store::postgres::PgBackend::new(&config.database).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres => Err(Error::Config(crate::error::ConfigError::InvalidValue {
            key: "DATABASE_BACKEND".to_string(),
            message: "built without the postgres feature".to_string(),
        })),
        StoreBackend::Memory => {
            tracing::warn!("memory store selected; nothing persists across restarts");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

/// Build the full engine: store, geocoder, application service, dialog
/// machine and every configured channel.
pub async fn build_engine(config: &Config) -> Result<Arc<Engine>, Error> {
    let store = open_store(config).await?;
    store.run_migrations().await?;

    let geocoder: Arc<dyn Geocoder> = Arc::new(GoogleGeocoder::new(&config.geocoding));

    let applications = Arc::new(ApplicationService::new(
        Arc::clone(&store),
        Arc::clone(&geocoder),
        config.dialog.store_timeout,
    ));

    let machine = Arc::new(DialogMachine::new(
        Arc::clone(&store),
        Arc::clone(&applications),
        Arc::clone(&geocoder),
        config.dialog.clone(),
    ));

    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
    if let Some(line) = &config.line {
        channels.push(Arc::new(LineChannel::new(line)));
        tracing::info!("LINE channel enabled");
    }
    channels.push(Arc::new(ConsoleChannel::new()));
    let manager = Arc::new(ChannelManager::new(channels));

    Ok(Arc::new(Engine::new(
        store,
        machine,
        manager,
        config.dialog.clone(),
    )))
}
