//! [`ForumClient`] over a JSON forum gateway.
//!
//! The gateway owns the HTML side of the forum; this client only speaks:
//!
//! | Call | Request |
//! |---|---|
//! | login | `POST {base}/login` `{username, password}` -> `{token}` |
//! | fetch | `GET {base}/forums/{forum_id}/posts` -> `[ForumPost]` |
//! | reply | `POST {base}/threads/{thread_id}/replies` `{content, attachments}` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use webhub_types::{ForumPost, ForumReply, LoginRequest};

use super::{ForumClient, ForumError};
use crate::config::ForumConfig;

pub struct HttpForumClient {
    base_url: String,
    username: String,
    password: String,
    client: Client,
    token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl HttpForumClient {
    pub fn new(cfg: &ForumConfig, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(concat!("webhub/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            client,
            token: RwLock::new(None),
        }
    }

    async fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn transport(e: reqwest::Error) -> ForumError {
    ForumError::Transient(e.to_string())
}

fn classify_status(status: StatusCode) -> Option<ForumError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(ForumError::Auth(format!("gateway answered {status}")))
    } else if status.is_server_error() {
        Some(ForumError::Transient(format!("gateway answered {status}")))
    } else {
        None
    }
}

#[async_trait]
impl ForumClient for HttpForumClient {
    async fn login(&self) -> Result<(), ForumError> {
        let resp = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&LoginRequest {
                username: self.username.clone(),
                password: self.password.clone(),
            })
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if let Some(e) = classify_status(status) {
            return Err(e);
        }
        if !status.is_success() {
            return Err(ForumError::Auth(format!("login rejected with {status}")));
        }
        let body: LoginResponse = resp.json().await.map_err(transport)?;
        *self.token.write().await = Some(body.token);
        Ok(())
    }

    async fn fetch_new_posts(&self, forum_id: &str) -> Result<Vec<ForumPost>, ForumError> {
        let req = self
            .client
            .get(format!("{}/forums/{}/posts", self.base_url, forum_id));
        let resp = self.authorized(req).await.send().await.map_err(transport)?;
        let status = resp.status();
        if let Some(e) = classify_status(status) {
            return Err(e);
        }
        if !status.is_success() {
            return Err(ForumError::Transient(format!("fetch answered {status}")));
        }
        let posts: Vec<ForumPost> = resp.json().await.map_err(transport)?;
        debug!(forum_id, count = posts.len(), "fetched posts");
        Ok(posts)
    }

    async fn post_reply(
        &self,
        thread_id: &str,
        content: &str,
        attachments: &[String],
    ) -> Result<bool, ForumError> {
        let req = self
            .client
            .post(format!("{}/threads/{}/replies", self.base_url, thread_id))
            .json(&ForumReply {
                content: content.to_owned(),
                attachments: attachments.to_vec(),
            });
        let resp = self.authorized(req).await.send().await.map_err(transport)?;
        let status = resp.status();
        if let Some(e) = classify_status(status) {
            return Err(e);
        }
        Ok(status.is_success())
    }
}
