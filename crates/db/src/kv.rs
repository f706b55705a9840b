use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

/// Byte-valued key/value storage with an atomic compare-and-set.
///
/// All poll mutations go through [`KvStore::compare_and_set`]; implementations must compare the
/// full stored value and apply the write in one step.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Writes `value` only if `key` is absent. Returns whether the write happened.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, KvError>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Replaces the value under `key` only if it currently equals `expected`.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, KvError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Keys starting with `prefix`, in ascending order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}
