#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tallyho_chat::attachments::{OpenDialogRequest, Post};
use tallyho_chat::platform::{
    DialogOpener, EphemeralSink, PlatformError, PlatformHandles, PostSink, Team, UserDirectory,
    UserProfile,
};
use tallyho_chat::{ChatServices, ChatSettings};
use tallyho_core::config::DisplayNamePolicy;
use tallyho_core::i18n::Translations;
use tallyho_core::poll::{Poll, PollId};
use tallyho_core::time::FixedClock;
use tallyho_db::{InMemoryKvStore, KvError, KvStore, Store};
use tokio::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ephemeral {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
}

/// Platform double that keeps posts in memory and records every call.
#[derive(Default)]
pub struct RecordingPlatform {
    pub users: HashMap<String, UserProfile>,
    pub posts: Mutex<HashMap<String, Post>>,
    pub created: Mutex<Vec<Post>>,
    pub ephemerals: Mutex<Vec<Ephemeral>>,
    pub dialogs: Mutex<Vec<OpenDialogRequest>>,
    pub fail_updates: bool,
}

impl RecordingPlatform {
    pub fn with_users(ids: &[&str]) -> Self {
        let users = ids
            .iter()
            .map(|id| {
                let profile = UserProfile {
                    id: id.to_string(),
                    username: id.to_string(),
                    first_name: id.to_uppercase(),
                    roles: "system_user".to_owned(),
                    ..UserProfile::default()
                };
                (id.to_string(), profile)
            })
            .collect();
        Self { users, ..Self::default() }
    }

    pub fn admin(mut self, id: &str) -> Self {
        if let Some(user) = self.users.get_mut(id) {
            user.roles = "system_user system_admin".to_owned();
        }
        self
    }

    pub async fn post(&self, id: &str) -> Post {
        self.posts.lock().await.get(id).cloned().expect("post exists")
    }
}

#[async_trait]
impl UserDirectory for RecordingPlatform {
    async fn get_user(&self, user_id: &str) -> Result<UserProfile, PlatformError> {
        self.users.get(user_id).cloned().ok_or_else(|| PlatformError::Status {
            status: 404,
            message: format!("user {user_id} not found"),
        })
    }
}

#[async_trait]
impl PostSink for RecordingPlatform {
    async fn create_post(&self, mut post: Post) -> Result<Post, PlatformError> {
        let mut posts = self.posts.lock().await;
        post.id = format!("post{}", posts.len() + 1);
        posts.insert(post.id.clone(), post.clone());
        self.created.lock().await.push(post.clone());
        Ok(post)
    }

    async fn update_post(&self, post: Post) -> Result<Post, PlatformError> {
        if self.fail_updates {
            return Err(PlatformError::Status { status: 500, message: "update failed".to_owned() });
        }
        self.posts.lock().await.insert(post.id.clone(), post.clone());
        Ok(post)
    }

    async fn delete_post(&self, post_id: &str) -> Result<(), PlatformError> {
        self.posts.lock().await.remove(post_id);
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, PlatformError> {
        self.posts.lock().await.get(post_id).cloned().ok_or_else(|| PlatformError::Status {
            status: 404,
            message: format!("post {post_id} not found"),
        })
    }

    async fn get_team(&self, team_id: &str) -> Result<Team, PlatformError> {
        Ok(Team { id: team_id.to_owned(), name: "team".to_owned(), ..Team::default() })
    }
}

#[async_trait]
impl EphemeralSink for RecordingPlatform {
    async fn send_ephemeral(
        &self,
        channel_id: &str,
        user_id: &str,
        _root_id: Option<&str>,
        text: &str,
    ) -> Result<(), PlatformError> {
        self.ephemerals.lock().await.push(Ephemeral {
            channel_id: channel_id.to_owned(),
            user_id: user_id.to_owned(),
            text: text.to_owned(),
        });
        Ok(())
    }
}

#[async_trait]
impl DialogOpener for RecordingPlatform {
    async fn open_dialog(&self, request: OpenDialogRequest) -> Result<(), PlatformError> {
        self.dialogs.lock().await.push(request);
        Ok(())
    }
}

pub fn clock() -> FixedClock {
    FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 10, 30, 0).single().expect("valid"))
}

pub fn settings() -> ChatSettings {
    ChatSettings {
        site_url: "https://chat.example.com".to_owned(),
        bot_user_id: "bot".to_owned(),
        route_prefix: "/plugins/com.github.tallyho".to_owned(),
        trigger: "poll".to_owned(),
        display_name: DisplayNamePolicy::Username,
    }
}

/// KV double where, once armed, another writer changes the poll right before the next
/// compare-and-set.
#[derive(Default)]
pub struct RacingKvStore {
    inner: InMemoryKvStore,
    armed: AtomicBool,
}

impl RacingKvStore {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvStore for RacingKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.inner.get(key).await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, KvError> {
        self.inner.put_if_absent(key, value).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        self.inner.put(key, value).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, KvError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let mut rival = Poll::decode(expected).expect("stored poll decodes");
            rival.update_vote("rival", 0).expect("rival vote");
            self.inner.put(key, &rival.encode().expect("rival encodes")).await?;
        }
        self.inner.compare_and_set(key, expected, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.inner.delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        self.inner.list_keys(prefix).await
    }
}

pub struct Harness {
    pub platform: Arc<RecordingPlatform>,
    pub services: ChatServices,
    pub store: Store,
}

impl Harness {
    pub fn new(platform: RecordingPlatform) -> Self {
        Self::with_store(platform, Store::in_memory())
    }

    pub fn with_store(platform: RecordingPlatform, store: Store) -> Self {
        let platform = Arc::new(platform);
        let services = ChatServices::new(
            store.clone(),
            PlatformHandles::from_client(Arc::clone(&platform)),
            Arc::new(Translations::english_only()),
            Arc::new(clock()),
            settings(),
        );
        Self { platform, services, store }
    }

    /// The single poll currently stored.
    pub async fn only_poll(&self) -> Poll {
        let ids: Vec<PollId> = self.store.polls().list_ids().await.expect("list polls");
        assert_eq!(ids.len(), 1, "expected exactly one stored poll");
        self.store.polls().get(&ids[0]).await.expect("poll loads")
    }
}
