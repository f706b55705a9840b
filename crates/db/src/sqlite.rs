use async_trait::async_trait;

use crate::kv::{KvError, KvStore};
use crate::DbPool;

/// [`KvStore`] over the `kv_entry` table.
pub struct SqliteKvStore {
    pool: DbPool,
}

impl SqliteKvStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let value = sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv_entry WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, KvError> {
        let result = sqlx::query(
            "INSERT INTO kv_entry (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        sqlx::query(
            "INSERT INTO kv_entry (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, KvError> {
        let result = sqlx::query(
            "UPDATE kv_entry
             SET value = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE key = ? AND value = ?",
        )
        .bind(value)
        .bind(key)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv_entry WHERE key = ?").bind(key).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM kv_entry WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteKvStore;
    use crate::kv::KvStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqliteKvStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqliteKvStore::new(pool)
    }

    #[tokio::test]
    async fn round_trips_binary_values() {
        let store = store().await;
        let value = [0u8, 159, 146, 150, 255];

        store.put("poll:a", &value).await.expect("put");

        assert_eq!(store.get("poll:a").await.expect("get"), Some(value.to_vec()));
        assert_eq!(store.get("poll:missing").await.expect("get missing"), None);
    }

    #[tokio::test]
    async fn put_if_absent_and_put_overwrite_semantics() {
        let store = store().await;

        assert!(store.put_if_absent("version", b"1.0.0").await.expect("insert"));
        assert!(!store.put_if_absent("version", b"2.0.0").await.expect("insert again"));
        store.put("version", b"1.1.0").await.expect("overwrite");

        assert_eq!(store.get("version").await.expect("get"), Some(b"1.1.0".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_set_is_conditional_on_the_stored_bytes() {
        let store = store().await;
        store.put("poll:a", b"{\"v\":1}").await.expect("put");

        let stale =
            store.compare_and_set("poll:a", b"{\"v\":0}", b"{\"v\":2}").await.expect("cas");
        let current =
            store.compare_and_set("poll:a", b"{\"v\":1}", b"{\"v\":2}").await.expect("cas");
        let replayed =
            store.compare_and_set("poll:a", b"{\"v\":1}", b"{\"v\":3}").await.expect("cas");

        assert!(!stale);
        assert!(current);
        assert!(!replayed);
        assert_eq!(store.get("poll:a").await.expect("get"), Some(b"{\"v\":2}".to_vec()));
    }

    #[tokio::test]
    async fn list_keys_treats_prefix_literally() {
        let store = store().await;
        for key in ["poll:b", "poll:a", "poll_x", "version", "poll%"] {
            store.put(key, b"x").await.expect("put");
        }

        let keys = store.list_keys("poll:").await.expect("list");

        assert_eq!(keys, vec!["poll:a".to_owned(), "poll:b".to_owned()]);
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let store = store().await;
        store.put("poll:a", b"x").await.expect("put");

        store.delete("poll:a").await.expect("delete");
        store.delete("poll:a").await.expect("delete missing");

        assert_eq!(store.get("poll:a").await.expect("get"), None);
    }
}
