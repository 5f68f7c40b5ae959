//! HTTP chat transport.
//!
//! Talks to a platform REST surface: webhook URLs are absolute endpoints
//! accepting JSON posts, and channel-level operations (webhook management,
//! notices, typing) go through the configured API base.

use super::{
    AuthorSnapshot, ChannelInfo, ChatTransport, TransportError, WEBHOOK_NAME, WebhookInfo,
    WebhookPayload,
};
use crate::config::TransportConfig;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use std::time::Duration;

/// Production transport over reqwest.
pub struct HttpTransport {
    client: Client,
    api_base: String,
    token: String,
}

impl HttpTransport {
    /// Build a transport from config. The client carries a connect timeout;
    /// per-call deadlines are enforced by callers (fan-out owns its own).
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("interchatd/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Map a non-success response onto the transport taxonomy.
    async fn reject(response: Response) -> TransportError {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => TransportError::Gone,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited,
            s if s.is_server_error() => TransportError::Server(s.as_u16()),
            _ => {
                let body = response.text().await.unwrap_or_default();
                TransportError::Invalid(format!("status {status}: {body}"))
            }
        }
    }

    async fn check(response: Response) -> Result<Response, TransportError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::reject(response).await)
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send_webhook(
        &self,
        url: &str,
        payload: &WebhookPayload,
    ) -> Result<String, TransportError> {
        let response = self
            .client
            .post(url)
            .query(&[("wait", "true")])
            .json(payload)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let body: serde_json::Value = response.json().await?;
        body.get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| TransportError::Invalid("webhook response missing id".into()))
    }

    async fn edit_webhook_message(
        &self,
        url: &str,
        message_id: &str,
        payload: &WebhookPayload,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .patch(format!("{url}/messages/{message_id}"))
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_webhook_message(
        &self,
        url: &str,
        message_id: &str,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .delete(format!("{url}/messages/{message_id}"))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn create_webhook(&self, channel_id: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.api_url(&format!("/channels/{channel_id}/webhooks")))
            .bearer_auth(&self.token)
            .json(&json!({ "name": WEBHOOK_NAME }))
            .send()
            .await?;
        let response = Self::check(response).await?;

        let webhook: WebhookInfo = response.json().await?;
        Ok(webhook.url)
    }

    async fn list_channel_webhooks(
        &self,
        channel_id: &str,
    ) -> Result<Vec<WebhookInfo>, TransportError> {
        let response = self
            .client
            .get(self.api_url(&format!("/channels/{channel_id}/webhooks")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn send_notice(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.api_url(&format!("/channels/{channel_id}/messages")))
            .bearer_auth(&self.token)
            .json(&json!({ "content": text }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn send_prompt(
        &self,
        channel_id: &str,
        text: &str,
        button_label: &str,
        token: &str,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.api_url(&format!("/channels/{channel_id}/messages")))
            .bearer_auth(&self.token)
            .json(&json!({
                "content": text,
                "components": [{ "custom_id": token, "label": button_label }],
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn trigger_typing(&self, channel_id: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.api_url(&format!("/channels/{channel_id}/typing")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<AuthorSnapshot>, TransportError> {
        let response = self
            .client
            .get(self.api_url(&format!("/users/{user_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;

        let body: serde_json::Value = response.json().await?;
        let id = body.get("id").and_then(|v| v.as_str()).unwrap_or(user_id);
        Ok(Some(AuthorSnapshot {
            id: id.to_string(),
            display_name: body
                .get("display_name")
                .or_else(|| body.get("username"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            avatar_url: body
                .get("avatar_url")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            is_bot: body.get("bot").and_then(|v| v.as_bool()).unwrap_or(false),
        }))
    }

    async fn fetch_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelInfo>, TransportError> {
        let response = self
            .client
            .get(self.api_url(&format!("/channels/{channel_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(response.json().await?))
    }
}
