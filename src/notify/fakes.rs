//! Collaborator fakes for notification tests.

use super::{Annotator, Collaborators, EmbedSummary, Notifier};
use crate::api::{AccountApi, Dispatcher, PostApi, PostView};
use crate::error::{AlertError, Result};
use crate::retry::RetryPolicy;
use crate::types::{Did, Profile, ReplySetting, Watch};
use crate::watches::StaticWatches;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Accounts;

impl AccountApi for Accounts {
    fn resolve_handle(&self, _handle: &str) -> Result<Option<Did>> {
        Ok(None)
    }

    fn get_profile(&self, actor: &str) -> Result<Profile> {
        Ok(Profile {
            did: actor.to_string(),
            handle: "alice.bsky.social".into(),
            display_name: None,
        })
    }
}

pub(crate) struct Posts {
    pub fail: bool,
}

impl PostApi for Posts {
    fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>> {
        if self.fail {
            return Err(AlertError::Network("connection refused".into()));
        }
        Ok(uris
            .iter()
            .map(|uri| PostView {
                uri: uri.clone(),
                author: Profile {
                    did: "did:plc:orig".into(),
                    handle: "carol.example.com".into(),
                    display_name: None,
                },
                text: "original words".into(),
                is_reply: false,
                embed: Some(EmbedSummary::Images),
                has_labels: false,
            })
            .collect())
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Failure {
    Transient,
    Fatal,
}

#[derive(Default)]
pub(crate) struct Recorder {
    pub sent: Mutex<Vec<(String, String)>>,
    pub failure: Mutex<Option<Failure>>,
}

impl Dispatcher for Recorder {
    fn send(&self, receiver: &str, text: &str) -> Result<()> {
        match *self.failure.lock() {
            Some(Failure::Transient) => return Err(AlertError::RateLimited("chat".into())),
            Some(Failure::Fatal) => return Err(AlertError::Auth("revoked".into())),
            None => {}
        }
        self.sent.lock().push((receiver.to_string(), text.to_string()));
        Ok(())
    }
}

pub(crate) fn watch(receiver: &str, reposts_allowed: bool) -> Watch {
    Watch {
        subject_did: "did:plc:abc".into(),
        subject_handle: "alice.bsky.social".into(),
        receiver_did: receiver.into(),
        receiver_handle: String::new(),
        reposts_allowed,
    }
}

pub(crate) fn notifier(
    watches: Vec<Watch>,
    replies: Vec<ReplySetting>,
    posts_fail: bool,
) -> (Notifier, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    };
    let notifier = Notifier::new(
        Collaborators {
            watches: Arc::new(StaticWatches::new(watches, replies)),
            accounts: Arc::new(Accounts),
            posts: Arc::new(Posts { fail: posts_fail }),
            dispatcher: recorder.clone(),
        },
        Annotator::default(),
        retry,
    );
    (notifier, recorder)
}
