//! Remote chat-platform directory: wire types, the client seam, and the
//! HTTP implementation.

pub mod http;
pub mod traits;
pub mod types;

pub use http::HttpDirectoryClient;
pub use traits::{DirectoryClient, DirectoryError};
pub use types::{
    resolve_display_name, ContactIds, ContactRecord, FriendDetail, GroupDetail, GroupMember,
    GroupRecord, MemberDetail,
};
