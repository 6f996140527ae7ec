//! Collaborator interfaces the pipeline depends on.

use crate::error::Result;
use crate::notify::EmbedSummary;
use crate::types::{Did, Profile};

/// Account resolution.
pub trait AccountApi: Send + Sync {
    /// Resolve a handle to a DID; `None` if the handle does not exist.
    fn resolve_handle(&self, handle: &str) -> Result<Option<Did>>;

    /// Fetch the profile of an account (DID or handle).
    fn get_profile(&self, actor: &str) -> Result<Profile>;
}

/// Rendered post content, as returned by the app view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostView {
    pub uri: String,
    pub author: Profile,
    pub text: String,
    pub is_reply: bool,
    pub embed: Option<EmbedSummary>,
    pub has_labels: bool,
}

/// Post lookup for rendering reposts.
pub trait PostApi: Send + Sync {
    /// Fetch posts by AT URI. Missing or deleted posts are omitted.
    fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>>;
}

/// Delivers one notification. Not idempotent; replays may duplicate sends.
pub trait Dispatcher: Send + Sync {
    fn send(&self, receiver: &str, text: &str) -> Result<()>;
}
