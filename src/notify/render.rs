//! Notification text.
//!
//! Messages are written with markdown links; the dispatcher turns them into
//! link facets before sending.

use super::annotate::{append_annotations, Annotation};
use crate::types::AtUri;

const BRIDGY_SUFFIX: &str = ".ap.brid.gy";
const BSKY_SOCIAL_SUFFIX: &str = ".bsky.social";

/// Display form of a handle.
///
/// Bridgy Fed handles (`user.example.social.ap.brid.gy`) become
/// `@user@example.social (Bridgy)`; the default `.bsky.social` suffix is dropped.
pub fn display_handle(handle: &str) -> String {
    if let Some(bridged) = handle.strip_suffix(BRIDGY_SUFFIX) {
        return match bridged.split_once('.') {
            Some((user, domain)) if !user.is_empty() && !domain.is_empty() => {
                format!("@{}@{} (Bridgy)", user, domain)
            }
            _ => format!("@{}", handle),
        };
    }
    handle
        .strip_suffix(BSKY_SOCIAL_SUFFIX)
        .unwrap_or(handle)
        .to_string()
}

fn profile_link(did: &str) -> String {
    format!("https://bsky.app/profile/{}", did)
}

fn single_line(text: &str) -> String {
    text.replace('\n', " ")
}

/// Message for a new post by a watched account.
pub fn post_message(
    handle: &str,
    author_did: &str,
    uri: &AtUri,
    text: &str,
    annotations: &[Annotation],
) -> String {
    let mut message = format!(
        "[{}]({}) said - [click to view]({}): \"{}\"",
        display_handle(handle),
        profile_link(author_did),
        uri.post_url(),
        single_line(text)
    );
    append_annotations(&mut message, annotations);
    message
}

/// The reposted post, as needed for rendering.
pub struct RepostedPost<'a> {
    pub uri: &'a AtUri,
    pub author_handle: &'a str,
    pub author_did: &'a str,
    pub text: &'a str,
}

/// Message for a repost by a watched account.
pub fn repost_message(
    reposter_handle: &str,
    reposter_did: &str,
    original: &RepostedPost<'_>,
    annotations: &[Annotation],
) -> String {
    let mut message = format!(
        "[{}]({}) reposted [{}]({}) saying - [click to view]({}): {}",
        display_handle(reposter_handle),
        profile_link(reposter_did),
        display_handle(original.author_handle),
        profile_link(original.author_did),
        original.uri.post_url(),
        single_line(original.text)
    );
    append_annotations(&mut message, annotations);
    message
}
