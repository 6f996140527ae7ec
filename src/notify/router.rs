//! Matches decoded commits against watches and dispatches notifications.

use super::annotate::Annotator;
use super::render::{post_message, repost_message, RepostedPost};
use crate::api::{AccountApi, Dispatcher, PostApi, PostView};
use crate::decode::{CreatedRecord, OpsByType, Post, Repost};
use crate::error::{AlertError, Result};
use crate::retry::RetryPolicy;
use crate::types::{AtUri, Watch};
use crate::watches::{WatchSnapshot, WatchSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Notification counters, shared by all workers.
#[derive(Debug, Default)]
pub struct NotifyStats {
    sent: AtomicU64,
    suppressed: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`NotifyStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotifyCounts {
    pub sent: u64,
    /// Replies withheld by the receiver's reply preference.
    pub suppressed: u64,
    /// Notifications dropped after a collaborator failure.
    pub abandoned: u64,
}

impl NotifyStats {
    pub fn counts(&self) -> NotifyCounts {
        NotifyCounts {
            sent: self.sent.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Collaborators the notifier talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub watches: Arc<dyn WatchSource>,
    pub accounts: Arc<dyn AccountApi>,
    pub posts: Arc<dyn PostApi>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

/// Applies the matching rules to one commit's created posts and reposts.
pub struct Notifier {
    collaborators: Collaborators,
    annotator: Annotator,
    retry: RetryPolicy,
    stats: Arc<NotifyStats>,
}

impl Notifier {
    pub fn new(collaborators: Collaborators, annotator: Annotator, retry: RetryPolicy) -> Self {
        Self {
            collaborators,
            annotator,
            retry,
            stats: Arc::new(NotifyStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<NotifyStats> {
        Arc::clone(&self.stats)
    }

    /// Dispatch every notification the commit's records call for.
    ///
    /// Collaborator failures abandon the affected notification only; the
    /// returned error is always fatal.
    pub fn notify(&self, ops: &OpsByType) -> Result<usize> {
        if ops.posts.created.is_empty() && ops.reposts.created.is_empty() {
            return Ok(0);
        }

        let snapshot = match self.collaborators.watches.load() {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "cannot load watches, skipping commit");
                return Ok(0);
            }
        };

        let mut sent = 0;
        for created in &ops.posts.created {
            sent += self.notify_post(&snapshot, created)?;
        }
        for created in &ops.reposts.created {
            sent += self.notify_repost(&snapshot, created)?;
        }
        Ok(sent)
    }

    fn notify_post(&self, snapshot: &WatchSnapshot, created: &CreatedRecord<Post>) -> Result<usize> {
        let author = created.author.as_str();
        let post = &created.record;

        let receivers: Vec<&Watch> = snapshot
            .watches_for(author)
            .filter(|watch| {
                if post.is_reply() && !snapshot.replies_allowed(&watch.receiver_did) {
                    tracing::debug!(receiver = %watch.receiver_did, "reply suppressed");
                    self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                    false
                } else {
                    true
                }
            })
            .collect();
        if receivers.is_empty() {
            return Ok(0);
        }

        let profile = match self.lookup("getProfile", || {
            self.collaborators.accounts.get_profile(author)
        }) {
            Ok(profile) => profile,
            Err(e) => return self.abandon_all(&receivers, e),
        };

        let annotations = self.annotator.for_post(post);
        let message = post_message(
            &profile.handle,
            &profile.did,
            &created.uri,
            &post.text,
            &annotations,
        );

        let mut sent = 0;
        for watch in receivers {
            sent += self.dispatch(watch, &message)?;
        }
        Ok(sent)
    }

    fn notify_repost(
        &self,
        snapshot: &WatchSnapshot,
        created: &CreatedRecord<Repost>,
    ) -> Result<usize> {
        let author = created.author.as_str();
        let receivers: Vec<&Watch> = snapshot
            .watches_for(author)
            .filter(|watch| watch.reposts_allowed)
            .collect();
        if receivers.is_empty() {
            return Ok(0);
        }

        let subject_uri = &created.record.subject.uri;
        let (uri, view) = match self.reposted_post(subject_uri) {
            Ok(found) => found,
            Err(e) => return self.abandon_all(&receivers, e),
        };

        let annotations = self
            .annotator
            .for_repost(view.has_labels, view.embed.as_ref());
        let original = RepostedPost {
            uri: &uri,
            author_handle: &view.author.handle,
            author_did: &view.author.did,
            text: &view.text,
        };

        let mut sent = 0;
        for watch in receivers {
            let reposter = if watch.subject_handle.is_empty() {
                author
            } else {
                watch.subject_handle.as_str()
            };
            let message = repost_message(reposter, author, &original, &annotations);
            sent += self.dispatch(watch, &message)?;
        }
        Ok(sent)
    }

    fn reposted_post(&self, subject_uri: &str) -> Result<(AtUri, PostView)> {
        let uri = AtUri::parse(subject_uri)?;
        let uris = [subject_uri.to_string()];
        let views = self.lookup("getPosts", || self.collaborators.posts.get_posts(&uris))?;
        let view = views
            .into_iter()
            .find(|v| v.uri == subject_uri)
            .ok_or_else(|| AlertError::Api {
                method: "app.bsky.feed.getPosts".into(),
                status: 404,
                message: format!("reposted post {} not found", subject_uri),
            })?;
        Ok((uri, view))
    }

    fn lookup<T>(&self, what: &str, op: impl FnMut() -> Result<T>) -> Result<T> {
        self.retry.run(what, op)
    }

    fn dispatch(&self, watch: &Watch, message: &str) -> Result<usize> {
        let receiver = watch.receiver_did.as_str();
        match self
            .retry
            .run("sendMessage", || self.collaborators.dispatcher.send(receiver, message))
        {
            Ok(()) => {
                tracing::debug!(receiver, subject = %watch.subject_did, "notification sent");
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                Ok(1)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(receiver, error = %e, "notification abandoned");
                self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                Ok(0)
            }
        }
    }

    fn abandon_all(&self, receivers: &[&Watch], error: AlertError) -> Result<usize> {
        if error.is_fatal() {
            return Err(error);
        }
        tracing::warn!(
            receivers = receivers.len(),
            error = %error,
            "lookup failed, notifications abandoned"
        );
        self.stats
            .abandoned
            .fetch_add(receivers.len() as u64, Ordering::Relaxed);
        Ok(0)
    }
}
