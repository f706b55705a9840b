//! Contracts toward the chat platform. The server crate implements them over HTTP; tests use
//! recording doubles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tallyho_core::config::DisplayNamePolicy;
use thiserror::Error;

use crate::attachments::{OpenDialogRequest, Post};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Request(String),
    #[error("platform answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("platform response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub locale: String,
    /// Space separated role names, e.g. `system_user system_admin`.
    #[serde(default)]
    pub roles: String,
}

impl UserProfile {
    pub fn is_system_admin(&self) -> bool {
        self.roles.split_whitespace().any(|role| role == "system_admin")
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim()).trim().to_owned()
    }

    pub fn display_name(&self, policy: DisplayNamePolicy) -> String {
        let full_name = self.full_name();
        let preferred = match policy {
            DisplayNamePolicy::Username => String::new(),
            DisplayNamePolicy::FullName => full_name,
            DisplayNamePolicy::NicknameFullName if !self.nickname.trim().is_empty() => {
                self.nickname.trim().to_owned()
            }
            DisplayNamePolicy::NicknameFullName => full_name,
        };
        if preferred.is_empty() {
            self.username.clone()
        } else {
            preferred
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<UserProfile, PlatformError>;
}

#[async_trait]
pub trait PostSink: Send + Sync {
    /// Returns the post as stored, including its assigned id.
    async fn create_post(&self, post: Post) -> Result<Post, PlatformError>;
    async fn update_post(&self, post: Post) -> Result<Post, PlatformError>;
    async fn delete_post(&self, post_id: &str) -> Result<(), PlatformError>;
    async fn get_post(&self, post_id: &str) -> Result<Post, PlatformError>;
    async fn get_team(&self, team_id: &str) -> Result<Team, PlatformError>;
}

#[async_trait]
pub trait EphemeralSink: Send + Sync {
    async fn send_ephemeral(
        &self,
        channel_id: &str,
        user_id: &str,
        root_id: Option<&str>,
        text: &str,
    ) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait DialogOpener: Send + Sync {
    async fn open_dialog(&self, request: OpenDialogRequest) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Result<String, PlatformError>;
}

/// Voters are always named by handle.
pub struct VoterNames {
    directory: Arc<dyn UserDirectory>,
}

impl VoterNames {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl NameResolver for VoterNames {
    async fn display_name(&self, user_id: &str) -> Result<String, PlatformError> {
        let user = self.directory.get_user(user_id).await?;
        Ok(format!("@{}", user.username))
    }
}

/// Creators are named according to the configured display-name policy.
pub struct CreatorNames {
    directory: Arc<dyn UserDirectory>,
    policy: DisplayNamePolicy,
}

impl CreatorNames {
    pub fn new(directory: Arc<dyn UserDirectory>, policy: DisplayNamePolicy) -> Self {
        Self { directory, policy }
    }
}

#[async_trait]
impl NameResolver for CreatorNames {
    async fn display_name(&self, user_id: &str) -> Result<String, PlatformError> {
        let user = self.directory.get_user(user_id).await?;
        Ok(user.display_name(self.policy))
    }
}

/// The platform collaborators a service needs, usually all backed by one client.
#[derive(Clone)]
pub struct PlatformHandles {
    pub users: Arc<dyn UserDirectory>,
    pub posts: Arc<dyn PostSink>,
    pub ephemeral: Arc<dyn EphemeralSink>,
    pub dialogs: Arc<dyn DialogOpener>,
}

impl PlatformHandles {
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: UserDirectory + PostSink + EphemeralSink + DialogOpener + 'static,
    {
        Self {
            users: client.clone(),
            posts: client.clone(),
            ephemeral: client.clone(),
            dialogs: client,
        }
    }
}

#[cfg(test)]
mod tests {
    use tallyho_core::config::DisplayNamePolicy;

    use super::UserProfile;

    fn profile(nickname: &str, first: &str, last: &str) -> UserProfile {
        UserProfile {
            id: "u1".to_owned(),
            username: "jdoe".to_owned(),
            first_name: first.to_owned(),
            last_name: last.to_owned(),
            nickname: nickname.to_owned(),
            ..UserProfile::default()
        }
    }

    #[test]
    fn display_name_follows_policy_with_username_fallback() {
        let full = profile("Johnny", "John", "Doe");
        let bare = profile("", "", "");

        assert_eq!(full.display_name(DisplayNamePolicy::Username), "jdoe");
        assert_eq!(full.display_name(DisplayNamePolicy::FullName), "John Doe");
        assert_eq!(full.display_name(DisplayNamePolicy::NicknameFullName), "Johnny");
        assert_eq!(
            profile("", "John", "").display_name(DisplayNamePolicy::NicknameFullName),
            "John"
        );
        assert_eq!(bare.display_name(DisplayNamePolicy::FullName), "jdoe");
    }

    #[test]
    fn system_admin_role_is_detected() {
        let mut user = profile("", "", "");
        user.roles = "system_user system_admin".to_owned();
        assert!(user.is_system_admin());

        user.roles = "system_user team_admin".to_owned();
        assert!(!user.is_system_admin());
    }
}
