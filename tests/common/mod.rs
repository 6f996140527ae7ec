//! Shared fixtures: firehose frame builders and collaborator fakes.

#![allow(dead_code)]

use ipld_core::cid::Cid;
use parking_lot::Mutex;
use serde::Serialize;
use skyalert::blocks::block_cid;
use skyalert::firehose::ManagerConfig;
use skyalert::notify::EmbedSummary;
use skyalert::{
    AccountApi, AlertError, Collaborators, Commit, Did, Dispatcher, FirehoseConfig, OpAction,
    PostApi, PostView, Profile, ReplySetting, RepoOp, Result, RetryPolicy, StaticWatches, Watch,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ALICE: &str = "did:plc:alice";
pub const WATCHER: &str = "did:plc:xyz";

// --- Frames ---

#[derive(Serialize)]
struct Header<'a> {
    op: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    t: Option<&'a str>,
}

#[derive(Serialize)]
struct CarHeader<'a> {
    version: u64,
    roots: &'a [Cid],
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct StrongRefBlock<'a> {
    uri: &'a str,
    cid: &'a str,
}

#[derive(Serialize)]
struct ReplyBlock<'a> {
    root: StrongRefBlock<'a>,
    parent: StrongRefBlock<'a>,
}

#[derive(Serialize)]
struct PostBlock<'a> {
    #[serde(rename = "$type")]
    kind: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplyBlock<'a>>,
    #[serde(rename = "createdAt")]
    created_at: &'a str,
}

#[derive(Serialize)]
struct RepostBlock<'a> {
    #[serde(rename = "$type")]
    kind: &'a str,
    subject: StrongRefBlock<'a>,
    #[serde(rename = "createdAt")]
    created_at: &'a str,
}

fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// CAR v1 payload holding `blocks`.
pub fn car(blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
    let roots: Vec<Cid> = blocks.iter().take(1).map(|(cid, _)| *cid).collect();
    let header = serde_ipld_dagcbor::to_vec(&CarHeader {
        version: 1,
        roots: &roots,
    })
    .unwrap();

    let mut out = Vec::new();
    push_varint(&mut out, header.len() as u64);
    out.extend_from_slice(&header);
    for (cid, data) in blocks {
        let cid_bytes = cid.to_bytes();
        push_varint(&mut out, (cid_bytes.len() + data.len()) as u64);
        out.extend_from_slice(&cid_bytes);
        out.extend_from_slice(data);
    }
    out
}

/// A record created inside a commit.
pub enum Created<'a> {
    Post { rkey: &'a str, text: &'a str },
    Reply { rkey: &'a str, text: &'a str },
    Repost { rkey: &'a str, subject: &'a str },
    /// An op whose block is left out of the payload.
    MissingBlock { rkey: &'a str },
}

const PARENT: &str = "at://did:plc:bob/app.bsky.feed.post/3parent";
const CREATED_AT: &str = "2024-11-20T12:00:00Z";

fn post_block(text: &str, reply: bool) -> Vec<u8> {
    let strong = || StrongRefBlock {
        uri: PARENT,
        cid: "bafyparent",
    };
    serde_ipld_dagcbor::to_vec(&PostBlock {
        kind: "app.bsky.feed.post",
        text,
        reply: reply.then(|| ReplyBlock {
            root: strong(),
            parent: strong(),
        }),
        created_at: CREATED_AT,
    })
    .unwrap()
}

fn record_block(created: &Created<'_>) -> (String, Vec<u8>) {
    match created {
        Created::Post { rkey, text } => {
            (format!("app.bsky.feed.post/{}", rkey), post_block(text, false))
        }
        Created::Reply { rkey, text } => {
            (format!("app.bsky.feed.post/{}", rkey), post_block(text, true))
        }
        Created::Repost { rkey, subject } => (
            format!("app.bsky.feed.repost/{}", rkey),
            serde_ipld_dagcbor::to_vec(&RepostBlock {
                kind: "app.bsky.feed.repost",
                subject: StrongRefBlock {
                    uri: subject,
                    cid: "bafysubject",
                },
                created_at: CREATED_AT,
            })
            .unwrap(),
        ),
        Created::MissingBlock { rkey } => (
            format!("app.bsky.feed.post/{}", rkey),
            post_block("never shipped", false),
        ),
    }
}

/// `#commit` frame from `repo` creating `records`.
pub fn commit_frame(seq: u64, repo: &str, records: &[Created<'_>]) -> Vec<u8> {
    let mut ops = Vec::new();
    let mut blocks = Vec::new();
    for created in records {
        let (path, block) = record_block(created);
        let cid = block_cid(&block);
        ops.push(RepoOp {
            action: OpAction::Create,
            path,
            cid: Some(cid),
        });
        if !matches!(created, Created::MissingBlock { .. }) {
            blocks.push((cid, block));
        }
    }

    let commit = Commit {
        seq,
        repo: repo.to_string(),
        ops,
        blocks: car(&blocks),
        too_big: false,
        rev: None,
        time: None,
    };
    commit_header_with(&serde_ipld_dagcbor::to_vec(&commit).unwrap())
}

/// `#commit` header followed by an arbitrary body.
pub fn commit_header_with(body: &[u8]) -> Vec<u8> {
    let mut out = serde_ipld_dagcbor::to_vec(&Header {
        op: 1,
        t: Some("#commit"),
    })
    .unwrap();
    out.extend_from_slice(body);
    out
}

/// Single new post by [`ALICE`].
pub fn post_frame(seq: u64, text: &str) -> Vec<u8> {
    commit_frame(seq, ALICE, &[Created::Post { rkey: "3kpost", text }])
}

/// Relay error frame (`op = -1`).
pub fn error_frame(error: &str, message: &str) -> Vec<u8> {
    let mut out = serde_ipld_dagcbor::to_vec(&Header { op: -1, t: None }).unwrap();
    out.extend(serde_ipld_dagcbor::to_vec(&ErrorBody { error, message }).unwrap());
    out
}

// --- Collaborators ---

pub struct Accounts;

impl AccountApi for Accounts {
    fn resolve_handle(&self, handle: &str) -> Result<Option<Did>> {
        match handle {
            "alice.bsky.social" => Ok(Some(Did::new(ALICE)?)),
            _ => Ok(None),
        }
    }

    fn get_profile(&self, actor: &str) -> Result<Profile> {
        Ok(Profile {
            did: actor.to_string(),
            handle: "alice.bsky.social".into(),
            display_name: Some("Alice".into()),
        })
    }
}

/// Every requested post exists and was written by carol.
pub struct Posts;

impl PostApi for Posts {
    fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>> {
        Ok(uris
            .iter()
            .map(|uri| PostView {
                uri: uri.clone(),
                author: Profile {
                    did: "did:plc:carol".into(),
                    handle: "carol.example.com".into(),
                    display_name: None,
                },
                text: "the reposted words".into(),
                is_reply: false,
                embed: Some(EmbedSummary::Images),
                has_labels: false,
            })
            .collect())
    }
}

/// Records every DM; optionally slow, failing, or raising a signal flag.
#[derive(Default)]
pub struct Outbox {
    pub sent: Mutex<Vec<(String, String)>>,
    pub delay: Option<Duration>,
    pub fatal: bool,
    /// Succeed this many times, then fail fatally.
    pub fatal_after: Option<usize>,
    pub attempts: AtomicUsize,
    /// Set after the first successful send.
    pub signal_on_send: Option<Arc<AtomicBool>>,
}

impl Outbox {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Dispatcher for Outbox {
    fn send(&self, receiver: &str, text: &str) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fatal || self.fatal_after.is_some_and(|limit| attempt >= limit) {
            return Err(AlertError::Auth("chat access revoked".into()));
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.sent
            .lock()
            .push((receiver.to_string(), text.to_string()));
        if let Some(flag) = &self.signal_on_send {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub fn watch(receiver: &str, reposts_allowed: bool) -> Watch {
    Watch {
        subject_did: ALICE.into(),
        subject_handle: "alice.bsky.social".into(),
        receiver_did: receiver.into(),
        receiver_handle: "watcher.bsky.social".into(),
        reposts_allowed,
    }
}

pub fn collaborators(
    watches: Vec<Watch>,
    replies: Vec<ReplySetting>,
    outbox: Arc<Outbox>,
) -> Collaborators {
    Collaborators {
        watches: Arc::new(StaticWatches::new(watches, replies)),
        accounts: Arc::new(Accounts),
        posts: Arc::new(Posts),
        dispatcher: outbox,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

/// Small, fast-retrying pipeline configuration.
pub fn test_config() -> FirehoseConfig {
    FirehoseConfig {
        queue_capacity: 64,
        workers: 2,
        intake: ManagerConfig {
            reconnect: fast_retry(),
            refresh_interval: Duration::from_millis(20),
        },
        read_timeout: Duration::from_millis(20),
        api_retry: fast_retry(),
        drain_timeout: None,
        ..Default::default()
    }
}
