use std::sync::Arc;

use tallyho_core::errors::ApplicationError;
use tallyho_core::poll::{Poll, PollCodecError, PollId};
use thiserror::Error;

use crate::kv::{KvError, KvStore};

pub const POLL_KEY_PREFIX: &str = "poll:";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("poll `{0}` not found")]
    NotFound(PollId),
    #[error("stored poll `{id}` is unreadable: {source}")]
    Decode { id: PollId, source: PollCodecError },
    #[error(transparent)]
    Encode(PollCodecError),
    #[error("poll `{0}` was changed concurrently")]
    Conflict(PollId),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NotFound(id.to_string()),
            StoreError::Conflict(id) => Self::Conflict(id.to_string()),
            other => Self::Persistence(other.to_string()),
        }
    }
}

pub fn poll_key(id: &PollId) -> String {
    format!("{POLL_KEY_PREFIX}{id}")
}

/// Typed access to polls under `poll:<id>`.
#[derive(Clone)]
pub struct PollStore {
    kv: Arc<dyn KvStore>,
}

impl PollStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, id: &PollId) -> Result<Poll, StoreError> {
        let bytes =
            self.kv.get(&poll_key(id)).await?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Poll::decode(&bytes).map_err(|source| StoreError::Decode { id: id.clone(), source })
    }

    /// Stores a freshly created poll; an existing poll with the same id is a conflict.
    pub async fn insert(&self, poll: &Poll) -> Result<(), StoreError> {
        let bytes = poll.encode().map_err(StoreError::Encode)?;
        if self.kv.put_if_absent(&poll_key(&poll.id), &bytes).await? {
            Ok(())
        } else {
            Err(StoreError::Conflict(poll.id.clone()))
        }
    }

    pub async fn save(&self, poll: &Poll) -> Result<(), StoreError> {
        let bytes = poll.encode().map_err(StoreError::Encode)?;
        self.kv.put(&poll_key(&poll.id), &bytes).await?;
        Ok(())
    }

    /// Writes `next` only if the stored poll still encodes exactly as `previous`.
    pub async fn update(&self, previous: &Poll, next: &Poll) -> Result<(), StoreError> {
        let expected = previous.encode().map_err(StoreError::Encode)?;
        let bytes = next.encode().map_err(StoreError::Encode)?;
        if self.kv.compare_and_set(&poll_key(&next.id), &expected, &bytes).await? {
            Ok(())
        } else {
            Err(StoreError::Conflict(next.id.clone()))
        }
    }

    pub async fn delete(&self, id: &PollId) -> Result<(), StoreError> {
        self.kv.delete(&poll_key(id)).await?;
        Ok(())
    }

    pub async fn list_ids(&self) -> Result<Vec<PollId>, StoreError> {
        let keys = self.kv.list_keys(POLL_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(POLL_KEY_PREFIX).map(|id| PollId(id.to_owned())))
            .collect())
    }
}
