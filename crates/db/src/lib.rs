//! Persistence for Tallyho: a key/value contract with SQLite and in-memory backends, typed poll
//! and system stores on top of it, and schema upgrades.

pub mod connection;
pub mod kv;
pub mod memory;
pub mod migrations;
pub mod polls;
pub mod sqlite;
pub mod system;
pub mod upgrade;

use std::sync::Arc;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use kv::{KvError, KvStore};
pub use memory::InMemoryKvStore;
pub use polls::{poll_key, PollStore, StoreError};
pub use sqlite::SqliteKvStore;
pub use system::{SystemError, SystemStore};
pub use upgrade::{run_upgrades, upgrades, Migration, Upgrade, UpgradeError, UpgradeOutcome};

/// The store handed to services: one KV backend with its typed views.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn KvStore>,
    polls: PollStore,
    system: SystemStore,
}

impl Store {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            polls: PollStore::new(Arc::clone(&kv)),
            system: SystemStore::new(Arc::clone(&kv)),
            kv,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryKvStore::new()))
    }

    /// Builds the store and applies pending schema upgrades for `version`.
    pub async fn open(
        kv: Arc<dyn KvStore>,
        version: &semver::Version,
    ) -> Result<(Self, UpgradeOutcome), UpgradeError> {
        let outcome = run_upgrades(Arc::clone(&kv), version, &upgrades()).await?;
        Ok((Self::new(kv), outcome))
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn polls(&self) -> &PollStore {
        &self.polls
    }

    pub fn system(&self) -> &SystemStore {
        &self.system
    }
}
