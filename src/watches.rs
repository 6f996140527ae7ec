//! Watch configuration.
//!
//! Watches live in a YAML document shared with the command bot, which
//! rewrites it whole. Each load returns an immutable [`WatchSnapshot`];
//! a matching pass uses one snapshot from start to finish.

use crate::error::{AlertError, Result};
use crate::types::{ReplySetting, Watch};
use parking_lot::RwLock;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Raw watch document. Unknown top-level keys are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct WatchDocument {
    #[serde(default)]
    pub user_watches: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub follow_watches: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub reply_settings: Vec<serde_yaml::Value>,
}

impl WatchDocument {
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Decode list entries one by one, skipping (and logging) malformed ones.
fn decode_entries<T: for<'de> Deserialize<'de>>(entries: &[serde_yaml::Value], what: &str) -> Vec<T> {
    entries
        .iter()
        .filter_map(|entry| match serde_yaml::from_value::<T>(entry.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(kind = what, error = %e, "skipping malformed entry");
                None
            }
        })
        .collect()
}

/// Consistent, read-only view of all watches.
#[derive(Debug, Default)]
pub struct WatchSnapshot {
    watches: Vec<Watch>,
    by_subject: HashMap<String, Vec<usize>>,
    replies: HashMap<String, bool>,
    follow_watches: usize,
}

impl WatchSnapshot {
    pub fn new(watches: Vec<Watch>, reply_settings: Vec<ReplySetting>) -> Self {
        let mut by_subject: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, watch) in watches.iter().enumerate() {
            by_subject.entry(watch.subject_did.clone()).or_default().push(i);
        }
        let mut replies = HashMap::new();
        for setting in reply_settings {
            // First entry per receiver wins.
            replies.entry(setting.did).or_insert(setting.replies_allowed);
        }
        Self {
            watches,
            by_subject,
            replies,
            follow_watches: 0,
        }
    }

    pub fn from_document(doc: &WatchDocument) -> Self {
        let mut snapshot = Self::new(
            decode_entries(&doc.user_watches, "user watch"),
            decode_entries(&doc.reply_settings, "reply setting"),
        );
        snapshot.follow_watches = doc.follow_watches.len();
        snapshot
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Watches whose subject is `subject_did`, in document order.
    pub fn watches_for<'a>(&'a self, subject_did: &str) -> impl Iterator<Item = &'a Watch> + 'a {
        self.by_subject
            .get(subject_did)
            .into_iter()
            .flatten()
            .map(move |&i| &self.watches[i])
    }

    /// Reply preference of a receiver. Absent means replies are not wanted.
    pub fn replies_allowed(&self, receiver_did: &str) -> bool {
        self.replies.get(receiver_did).copied().unwrap_or(false)
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Summary of the watch set.
    pub fn audit(&self) -> WatchAudit {
        let mut subjects = HashSet::new();
        let mut per_receiver: Vec<(String, usize)> = Vec::new();
        for watch in &self.watches {
            subjects.insert(watch.subject_handle.as_str());
            match per_receiver
                .iter_mut()
                .find(|(handle, _)| *handle == watch.receiver_handle)
            {
                Some((_, count)) => *count += 1,
                None => per_receiver.push((watch.receiver_handle.clone(), 1)),
            }
        }

        // Earliest receiver wins ties.
        let mut top: Option<(String, usize)> = None;
        for (handle, count) in &per_receiver {
            if top.as_ref().map_or(true, |(_, best)| count > best) {
                top = Some((handle.clone(), *count));
            }
        }

        WatchAudit {
            follow_watches: self.follow_watches,
            user_watches: self.watches.len(),
            unique_watchers: per_receiver.len(),
            unique_subjects: subjects.len(),
            top_watcher: top,
        }
    }
}

/// Counts reported by the `audit` command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchAudit {
    pub follow_watches: usize,
    pub user_watches: usize,
    pub unique_watchers: usize,
    pub unique_subjects: usize,
    /// Receiver handle with the most watches, and how many.
    pub top_watcher: Option<(String, usize)>,
}

/// Source of watch snapshots.
pub trait WatchSource: Send + Sync {
    fn load(&self) -> Result<Arc<WatchSnapshot>>;
}

/// Fixed snapshot; used by tests and one-off runs.
pub struct StaticWatches {
    snapshot: Arc<WatchSnapshot>,
}

impl StaticWatches {
    pub fn new(watches: Vec<Watch>, reply_settings: Vec<ReplySetting>) -> Self {
        Self {
            snapshot: Arc::new(WatchSnapshot::new(watches, reply_settings)),
        }
    }
}

impl WatchSource for StaticWatches {
    fn load(&self) -> Result<Arc<WatchSnapshot>> {
        Ok(Arc::clone(&self.snapshot))
    }
}

/// Files modified this close to the moment they were read may be rewritten
/// again without a visible mtime change, so their contents are re-checked.
const RACY_WINDOW: Duration = Duration::from_secs(2);

struct Cached {
    modified: SystemTime,
    len: u64,
    read_at: SystemTime,
    digest: [u8; 32],
    snapshot: Arc<WatchSnapshot>,
}

impl Cached {
    fn is_fresh(&self, modified: SystemTime, len: u64) -> bool {
        self.modified == modified
            && self.len == len
            && self
                .read_at
                .duration_since(modified)
                .is_ok_and(|age| age >= RACY_WINDOW)
    }
}

/// Watch document on disk.
///
/// Metadata answers most loads. A document modified shortly before it was
/// read is re-read and compared by sha2 digest, so a same-size rewrite within
/// the mtime granularity is still picked up.
pub struct YamlWatchStore {
    path: PathBuf,
    cache: RwLock<Option<Cached>>,
}

impl YamlWatchStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_snapshot(contents: &[u8]) -> Result<WatchSnapshot> {
        let contents = std::str::from_utf8(contents)
            .map_err(|e| AlertError::Config(format!("watch document is not UTF-8: {}", e)))?;
        let doc = WatchDocument::parse(contents)?;
        Ok(WatchSnapshot::from_document(&doc))
    }
}

impl WatchSource for YamlWatchStore {
    fn load(&self) -> Result<Arc<WatchSnapshot>> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Arc::new(WatchSnapshot::empty()));
            }
            Err(e) => return Err(e.into()),
        };
        let modified = meta.modified()?;
        let len = meta.len();

        if let Some(cached) = self.cache.read().as_ref() {
            if cached.is_fresh(modified, len) {
                return Ok(Arc::clone(&cached.snapshot));
            }
        }

        let read_at = SystemTime::now();
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Arc::new(WatchSnapshot::empty()));
            }
            Err(e) => return Err(e.into()),
        };
        let digest: [u8; 32] = Sha256::digest(&contents).into();

        let mut cache = self.cache.write();
        if let Some(cached) = cache.as_mut() {
            if cached.digest == digest {
                cached.modified = modified;
                cached.len = len;
                cached.read_at = read_at;
                return Ok(Arc::clone(&cached.snapshot));
            }
        }

        match Self::parse_snapshot(&contents) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                tracing::debug!(watches = snapshot.len(), path = %self.path.display(), "watches reloaded");
                *cache = Some(Cached {
                    modified,
                    len,
                    read_at,
                    digest,
                    snapshot: Arc::clone(&snapshot),
                });
                Ok(snapshot)
            }
            // A half-written document keeps the previous snapshot in service.
            Err(e) => match cache.as_ref() {
                Some(cached) => {
                    tracing::warn!(error = %e, "watch document unreadable, using previous snapshot");
                    Ok(Arc::clone(&cached.snapshot))
                }
                None => Err(AlertError::Config(format!(
                    "cannot read watches from {}: {}",
                    self.path.display(),
                    e
                ))),
            },
        }
    }
}
