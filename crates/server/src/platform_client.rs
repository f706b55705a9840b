//! REST client for the chat platform's `/api/v4` surface.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tallyho_chat::attachments::{OpenDialogRequest, Post};
use tallyho_chat::platform::{
    DialogOpener, EphemeralSink, PlatformError, PostSink, Team, UserDirectory, UserProfile,
};
use tallyho_core::config::PlatformConfig;
use tracing::debug;

#[derive(Clone)]
pub struct PlatformClient {
    client: Client,
    api_base: String,
    token: SecretString,
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &PlatformConfig) -> Self {
        Self {
            client,
            api_base: format!("{}/api/v4", config.api_base()),
            token: config.bot_token.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.api_base);
        debug!(event_name = "platform.request", method = %method, url = %url);
        self.client.request(method, url).bearer_auth(self.token.expose_secret())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PlatformError> {
        let response =
            request.send().await.map_err(|error| PlatformError::Request(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(PlatformError::Status { status: status.as_u16(), message })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PlatformError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|error| PlatformError::Decode(error.to_string()))
    }

    async fn write_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, PlatformError> {
        self.send_json(self.request(method, path).json(body)).await
    }
}

#[async_trait]
impl UserDirectory for PlatformClient {
    async fn get_user(&self, user_id: &str) -> Result<UserProfile, PlatformError> {
        self.send_json(self.request(Method::GET, &format!("/users/{user_id}"))).await
    }
}

#[async_trait]
impl PostSink for PlatformClient {
    async fn create_post(&self, post: Post) -> Result<Post, PlatformError> {
        self.write_json(Method::POST, "/posts", &post).await
    }

    async fn update_post(&self, post: Post) -> Result<Post, PlatformError> {
        let path = format!("/posts/{}", post.id);
        self.write_json(Method::PUT, &path, &post).await
    }

    async fn delete_post(&self, post_id: &str) -> Result<(), PlatformError> {
        self.send(self.request(Method::DELETE, &format!("/posts/{post_id}"))).await?;
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, PlatformError> {
        self.send_json(self.request(Method::GET, &format!("/posts/{post_id}"))).await
    }

    async fn get_team(&self, team_id: &str) -> Result<Team, PlatformError> {
        self.send_json(self.request(Method::GET, &format!("/teams/{team_id}"))).await
    }
}

#[async_trait]
impl EphemeralSink for PlatformClient {
    async fn send_ephemeral(
        &self,
        channel_id: &str,
        user_id: &str,
        root_id: Option<&str>,
        text: &str,
    ) -> Result<(), PlatformError> {
        let body = json!({
            "user_id": user_id,
            "post": {
                "channel_id": channel_id,
                "root_id": root_id.unwrap_or_default(),
                "message": text,
            },
        });
        self.send(self.request(Method::POST, "/posts/ephemeral").json(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl DialogOpener for PlatformClient {
    async fn open_dialog(&self, request: OpenDialogRequest) -> Result<(), PlatformError> {
        self.send(self.request(Method::POST, "/actions/dialogs/open").json(&request)).await?;
        Ok(())
    }
}
