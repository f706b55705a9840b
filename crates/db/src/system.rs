use std::sync::Arc;

use semver::Version;
use thiserror::Error;

use crate::kv::{KvError, KvStore};

pub const VERSION_KEY: &str = "version";

#[derive(Debug, Error)]
pub enum SystemError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("stored schema version `{value}` is invalid: {source}")]
    InvalidVersion { value: String, source: semver::Error },
}

/// Bookkeeping entries that are not polls.
#[derive(Clone)]
pub struct SystemStore {
    kv: Arc<dyn KvStore>,
}

impl SystemStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// The stored schema version; `None` on a fresh install.
    pub async fn version(&self) -> Result<Option<Version>, SystemError> {
        let Some(bytes) = self.kv.get(VERSION_KEY).await? else {
            return Ok(None);
        };
        let value = String::from_utf8_lossy(&bytes).trim().to_owned();
        if value.is_empty() {
            return Ok(None);
        }
        Version::parse(&value)
            .map(Some)
            .map_err(|source| SystemError::InvalidVersion { value, source })
    }

    pub async fn save_version(&self, version: &Version) -> Result<(), SystemError> {
        self.kv.put(VERSION_KEY, version.to_string().as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use semver::Version;

    use super::{SystemError, SystemStore, VERSION_KEY};
    use crate::kv::KvStore;
    use crate::memory::InMemoryKvStore;

    #[tokio::test]
    async fn version_round_trips() {
        let kv = Arc::new(InMemoryKvStore::new());
        let system = SystemStore::new(kv.clone());

        assert_eq!(system.version().await.expect("empty"), None);
        system.save_version(&Version::new(1, 1, 0)).await.expect("save");

        assert_eq!(system.version().await.expect("load"), Some(Version::new(1, 1, 0)));
        assert_eq!(kv.get(VERSION_KEY).await.expect("raw"), Some(b"1.1.0".to_vec()));
    }

    #[tokio::test]
    async fn empty_value_counts_as_unset_and_garbage_is_an_error() {
        let kv = Arc::new(InMemoryKvStore::new());
        let system = SystemStore::new(kv.clone());

        kv.put(VERSION_KEY, b"").await.expect("put");
        assert_eq!(system.version().await.expect("empty"), None);

        kv.put(VERSION_KEY, b"one.two").await.expect("put");
        assert!(matches!(system.version().await, Err(SystemError::InvalidVersion { .. })));
    }
}
