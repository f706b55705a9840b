use std::sync::Arc;

use semver::Version;
use tallyho_chat::platform::PlatformHandles;
use tallyho_chat::{ChatServices, ChatSettings};
use tallyho_core::config::{AppConfig, ConfigError, ConfigHandle};
use tallyho_core::i18n::{I18nError, Translations};
use tallyho_core::time::SystemClock;
use tallyho_db::{
    connect_with_config, migrations, DbPool, SqliteKvStore, Store, StoreError, UpgradeError,
    UpgradeOutcome,
};
use thiserror::Error;
use tracing::info;

use crate::platform_client::PlatformClient;

pub struct Application {
    pub config: ConfigHandle,
    pub db_pool: DbPool,
    pub services: ChatServices,
    pub translations: Arc<Translations>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("schema upgrade failed: {0}")]
    Upgrade(#[from] UpgradeError),
    #[error("translations could not be loaded: {0}")]
    Translations(#[from] I18nError),
    #[error("crate version `{0}` is not semver")]
    Version(String),
    #[error("poll timers could not be restored: {0}")]
    Scheduler(#[from] StoreError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let platform = PlatformHandles::from_client(Arc::new(PlatformClient::new(&config.platform)));
    bootstrap_with_platform(config, platform).await
}

/// Connects storage, applies upgrades and wires the chat services against `platform`.
pub async fn bootstrap_with_platform(
    config: AppConfig,
    platform: PlatformHandles,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    config.validate()?;

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.database_ready",
        correlation_id = "bootstrap",
        "database connected and migrations applied"
    );

    let version = Version::parse(env!("CARGO_PKG_VERSION"))
        .map_err(|_| BootstrapError::Version(env!("CARGO_PKG_VERSION").to_owned()))?;
    let kv = Arc::new(SqliteKvStore::new(db_pool.clone()));
    let (store, outcome) = Store::open(kv, &version).await?;
    let version = match &outcome {
        UpgradeOutcome::FreshInstall { stamped } => stamped,
        UpgradeOutcome::Upgraded { to, .. } => to,
        UpgradeOutcome::UpToDate { version } => version,
    };
    info!(
        event_name = "system.bootstrap.store_ready",
        correlation_id = "bootstrap",
        version = %version,
        "poll store ready"
    );

    let translations = Arc::new(match &config.poll.i18n_dir {
        Some(dir) => Translations::load_dir(dir, &config.poll.default_locale)?,
        None => Translations::english_only(),
    });

    let services = ChatServices::new(
        store,
        platform,
        Arc::clone(&translations),
        Arc::new(SystemClock),
        ChatSettings::from_config(&config),
    );
    let armed = services.activate().await?;
    info!(
        event_name = "system.bootstrap.complete",
        correlation_id = "bootstrap",
        armed_timers = armed,
        "application bootstrap complete"
    );

    Ok(Application { config: ConfigHandle::new(config), db_pool, services, translations })
}
