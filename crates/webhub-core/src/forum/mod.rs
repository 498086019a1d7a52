//! Forum access: the client seam and the shared per-forum session hub.

pub mod http;
pub mod hub;

use async_trait::async_trait;
use thiserror::Error;
use webhub_types::ForumPost;

pub use http::HttpForumClient;
pub use hub::{ClientFactory, ForumHub};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForumError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("forum unreachable: {0}")]
    Transient(String),
}

/// One forum site. Implementations need not serialize their own calls;
/// [`ForumHub`] serializes login and gates fetch/reply on it.
#[async_trait]
pub trait ForumClient: Send + Sync {
    async fn login(&self) -> Result<(), ForumError>;

    async fn fetch_new_posts(&self, forum_id: &str) -> Result<Vec<ForumPost>, ForumError>;

    /// Post `content` into thread `thread_id`. `Ok(false)` means the forum
    /// refused the reply without a transport failure.
    async fn post_reply(
        &self,
        thread_id: &str,
        content: &str,
        attachments: &[String],
    ) -> Result<bool, ForumError>;
}
