use async_trait::async_trait;

use super::types::{ContactIds, FriendDetail, GroupDetail};

/// `ret` value the remote API uses for success.
pub const RET_OK: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Transport-level failure (connect, timeout, non-2xx HTTP status).
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The API answered but with a non-success `ret` code.
    #[error("directory call {call} returned ret={ret}: {message}")]
    Status {
        call: &'static str,
        ret: i64,
        message: String,
    },
    /// `ret` was success but the payload was missing.
    #[error("directory call {0} returned no data")]
    MissingData(&'static str),
}

/// Client for the chat platform's contact directory.
///
/// Implementations own the account (`app_id`) they act for. Every method
/// maps a non-success `ret` to [`DirectoryError::Status`], so callers only
/// have to look at the `Result`.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// IDs of every friend and every group the account can see.
    async fn list_contact_ids(&self) -> Result<ContactIds, DirectoryError>;

    /// Detail records for up to 20 friend IDs.
    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<FriendDetail>, DirectoryError>;

    /// Detail record for a single group. The API has no batch form.
    async fn fetch_group_detail(&self, group_id: &str) -> Result<GroupDetail, DirectoryError>;

    /// Whether the worker's account session is currently logged in.
    async fn check_online(&self) -> Result<bool, DirectoryError>;

    async fn logout(&self) -> Result<(), DirectoryError>;
}
