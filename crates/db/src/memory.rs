use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::kv::{KvError, KvStore};

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, KvError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), value.to_vec());
        Ok(true)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, KvError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(current) if current.as_slice() == expected => {
                *current = value.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::InMemoryKvStore;
    use crate::kv::KvStore;

    #[tokio::test]
    async fn put_if_absent_refuses_existing_keys() {
        let store = InMemoryKvStore::new();

        assert!(store.put_if_absent("poll:a", b"one").await.expect("first insert"));
        assert!(!store.put_if_absent("poll:a", b"two").await.expect("second insert"));
        assert_eq!(store.get("poll:a").await.expect("get"), Some(b"one".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_set_requires_the_current_value() {
        let store = InMemoryKvStore::new();
        store.put("poll:a", b"v1").await.expect("put");

        assert!(!store.compare_and_set("poll:a", b"stale", b"v2").await.expect("cas stale"));
        assert!(store.compare_and_set("poll:a", b"v1", b"v2").await.expect("cas current"));
        assert!(!store.compare_and_set("poll:missing", b"v1", b"v2").await.expect("cas missing"));
        assert_eq!(store.get("poll:a").await.expect("get"), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn list_keys_filters_by_prefix_in_order() {
        let store = InMemoryKvStore::new();
        for key in ["poll:b", "version", "poll:a", "pollster"] {
            store.put(key, b"x").await.expect("put");
        }

        let keys = store.list_keys("poll:").await.expect("list");

        assert_eq!(keys, vec!["poll:a".to_owned(), "poll:b".to_owned()]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryKvStore::new();
        store.put("poll:a", b"x").await.expect("put");

        store.delete("poll:a").await.expect("delete");
        store.delete("poll:a").await.expect("delete again");

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_compare_and_set_has_one_winner() {
        let store = Arc::new(InMemoryKvStore::new());
        store.put("poll:a", b"base").await.expect("put");

        let mut handles = Vec::new();
        for writer in 0..8u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.compare_and_set("poll:a", b"base", &[writer]).await.expect("cas")
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
