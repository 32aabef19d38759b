use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::traits::{DirectoryClient, DirectoryError, RET_OK};
use super::types::{ApiEnvelope, ContactIds, FriendDetail, GroupDetail};
use crate::config::DirectoryConfig;

const TOKEN_HEADER: &str = "X-GEWE-TOKEN";

/// [`DirectoryClient`] over the platform's JSON-over-POST HTTP API.
pub struct HttpDirectoryClient {
    base_url: String,
    token: Option<String>,
    app_id: String,
    client: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        app_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            app_id: app_id.into(),
            client,
        })
    }

    /// Build a client from config, or `None` when the directory feature is
    /// disabled or incomplete.
    pub fn from_config(config: &DirectoryConfig) -> Result<Option<Self>, DirectoryError> {
        if !config.is_configured() {
            return Ok(None);
        }
        let (Some(base_url), Some(app_id)) = (&config.base_url, &config.app_id) else {
            return Ok(None);
        };
        Self::new(
            base_url.clone(),
            config.token.clone(),
            app_id.clone(),
            Duration::from_secs(config.request_timeout_secs.max(1)),
        )
        .map(Some)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_envelope<T: DeserializeOwned>(
        &self,
        call: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Option<T>, DirectoryError> {
        let mut request = self.client.post(self.api_url(path)).json(&body);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let envelope: ApiEnvelope<T> = request.send().await?.error_for_status()?.json().await?;
        if envelope.ret != RET_OK {
            return Err(DirectoryError::Status {
                call,
                ret: envelope.ret,
                message: envelope.msg.unwrap_or_default(),
            });
        }
        Ok(envelope.data)
    }

    async fn post_data<T: DeserializeOwned>(
        &self,
        call: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, DirectoryError> {
        self.post_envelope(call, path, body)
            .await?
            .ok_or(DirectoryError::MissingData(call))
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn list_contact_ids(&self) -> Result<ContactIds, DirectoryError> {
        self.post_data(
            "fetchContactsList",
            "/contacts/fetchContactsList",
            serde_json::json!({ "appId": self.app_id }),
        )
        .await
    }

    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<FriendDetail>, DirectoryError> {
        let details: Option<Vec<FriendDetail>> = self
            .post_envelope(
                "getDetailInfo",
                "/contacts/getDetailInfo",
                serde_json::json!({ "appId": self.app_id, "wxids": ids }),
            )
            .await?;
        Ok(details.unwrap_or_default())
    }

    async fn fetch_group_detail(&self, group_id: &str) -> Result<GroupDetail, DirectoryError> {
        self.post_data(
            "getChatroomInfo",
            "/group/getChatroomInfo",
            serde_json::json!({ "appId": self.app_id, "chatroomId": group_id }),
        )
        .await
    }

    async fn check_online(&self) -> Result<bool, DirectoryError> {
        let online: Option<bool> = self
            .post_envelope(
                "checkOnline",
                "/login/checkOnline",
                serde_json::json!({ "appId": self.app_id }),
            )
            .await?;
        Ok(online.unwrap_or(false))
    }

    async fn logout(&self) -> Result<(), DirectoryError> {
        self.post_envelope::<serde_json::Value>(
            "logout",
            "/login/logout",
            serde_json::json!({ "appId": self.app_id }),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_returns_none_when_not_configured() {
        let config = DirectoryConfig::default();
        assert!(HttpDirectoryClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn api_url_strips_trailing_slash() {
        let client = HttpDirectoryClient::new(
            "http://127.0.0.1:2531/v2/api/",
            Some(String::new()),
            "app",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.api_url("/login/checkOnline"),
            "http://127.0.0.1:2531/v2/api/login/checkOnline"
        );
        assert!(client.token.is_none());
        assert_eq!(client.app_id, "app");
    }
}
