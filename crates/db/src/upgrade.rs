use std::sync::Arc;

use semver::Version;
use thiserror::Error;
use tracing::{info, warn};

use crate::kv::KvStore;
use crate::polls::{PollStore, StoreError};
use crate::system::{SystemError, SystemStore};

/// Data rewrite attached to a schema step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Migration {
    /// Loads every poll and saves it back in canonical form.
    ReencodePolls,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upgrade {
    pub to_version: Version,
    pub migration: Option<Migration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeOutcome {
    FreshInstall { stamped: Version },
    Upgraded { from: Version, to: Version },
    UpToDate { version: Version },
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error(transparent)]
    System(#[from] SystemError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ordered schema steps, oldest first.
pub fn upgrades() -> Vec<Upgrade> {
    vec![
        Upgrade { to_version: Version::new(1, 0, 0), migration: None },
        Upgrade { to_version: Version::new(1, 1, 0), migration: Some(Migration::ReencodePolls) },
    ]
}

/// Brings the stored schema version up to date.
///
/// An unset version is a fresh install and is stamped with `current` (patch dropped) without
/// running any step. Otherwise every step above the stored version runs in order and the version
/// is saved after each one.
pub async fn run_upgrades(
    kv: Arc<dyn KvStore>,
    current: &Version,
    steps: &[Upgrade],
) -> Result<UpgradeOutcome, UpgradeError> {
    let system = SystemStore::new(Arc::clone(&kv));
    let polls = PollStore::new(kv);

    let Some(stored) = system.version().await? else {
        let stamped = Version::new(current.major, current.minor, 0);
        warn!(
            event_name = "system.schema.fresh_install",
            version = %stamped,
            "no schema version found; stamping fresh install"
        );
        system.save_version(&stamped).await?;
        return Ok(UpgradeOutcome::FreshInstall { stamped });
    };

    let mut version = stored.clone();
    for step in steps {
        if version >= step.to_version {
            continue;
        }
        warn!(
            event_name = "system.schema.upgrade_started",
            from = %version,
            to = %step.to_version,
            "schema version is out of date; upgrading"
        );
        if let Some(migration) = step.migration {
            apply(migration, &polls).await?;
        }
        system.save_version(&step.to_version).await?;
        info!(event_name = "system.schema.upgrade_completed", version = %step.to_version);
        version = step.to_version.clone();
    }

    if version == stored {
        Ok(UpgradeOutcome::UpToDate { version })
    } else {
        Ok(UpgradeOutcome::Upgraded { from: stored, to: version })
    }
}

async fn apply(migration: Migration, polls: &PollStore) -> Result<(), StoreError> {
    match migration {
        Migration::ReencodePolls => {
            for id in polls.list_ids().await? {
                let poll = match polls.get(&id).await {
                    Ok(poll) => poll,
                    Err(error) => {
                        warn!(
                            event_name = "system.schema.migration_skipped",
                            poll_id = %id,
                            error = %error,
                            "failed to load poll for migration"
                        );
                        continue;
                    }
                };
                if let Err(error) = polls.save(&poll).await {
                    warn!(
                        event_name = "system.schema.migration_skipped",
                        poll_id = %id,
                        error = %error,
                        "failed to save poll after migration"
                    );
                }
            }
            Ok(())
        }
    }
}
