//! Core types for the alert pipeline.

use crate::error::{AlertError, Result};
use ipld_core::cid::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable account identifier (`did:plc:...`, `did:web:...`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Parse a DID, rejecting anything without the `did:<method>:` prefix.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let mut parts = value.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
                Ok(Did(value))
            }
            _ => Err(AlertError::InvalidIdentifier(value)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Did {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Position in the firehose stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Seq(pub u64);

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `at://<authority>/<collection>/<rkey>` reference to a record.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    authority: String,
    collection: String,
    rkey: String,
}

impl AtUri {
    /// Build the URI of a record inside a repository.
    ///
    /// `path` is the repo-relative `collection/rkey` path carried by an operation.
    pub fn from_repo_path(repo: &Did, path: &str) -> Result<Self> {
        let (collection, rkey) = path
            .split_once('/')
            .ok_or_else(|| AlertError::InvalidIdentifier(format!("record path {}", path)))?;
        if collection.is_empty() || rkey.is_empty() {
            return Err(AlertError::InvalidIdentifier(format!("record path {}", path)));
        }
        Ok(Self {
            authority: repo.as_str().to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| AlertError::InvalidIdentifier(uri.to_string()))?;
        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(authority), Some(collection), Some(rkey))
                if !authority.is_empty() && !collection.is_empty() && !rkey.is_empty() =>
            {
                Ok(Self {
                    authority: authority.to_string(),
                    collection: collection.to_string(),
                    rkey: rkey.to_string(),
                })
            }
            _ => Err(AlertError::InvalidIdentifier(uri.to_string())),
        }
    }

    /// The repository (account) part; a DID for firehose records.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn rkey(&self) -> &str {
        &self.rkey
    }

    /// Public web URL for a post record.
    pub fn post_url(&self) -> String {
        format!(
            "https://bsky.app/profile/{}/post/{}",
            self.authority, self.rkey
        )
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.authority, self.collection, self.rkey)
    }
}

impl fmt::Debug for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtUri({})", self)
    }
}

/// Kind of mutation carried by a repo operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpAction {
    Create,
    Update,
    Delete,
}

/// One mutation inside a commit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoOp {
    pub action: OpAction,
    /// `collection/rkey` inside the repository.
    pub path: String,
    /// Block reference; set for creates and updates, null for deletes.
    #[serde(default)]
    pub cid: Option<Cid>,
}

/// One unit of the firehose stream (`#commit` body).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    pub seq: u64,
    pub repo: String,
    #[serde(default)]
    pub ops: Vec<RepoOp>,
    /// CAR-encoded blocks; may be empty when the commit was too big.
    #[serde(default, with = "serde_bytes")]
    pub blocks: Vec<u8>,
    #[serde(default, rename = "tooBig")]
    pub too_big: bool,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

impl Commit {
    pub fn seq(&self) -> Seq {
        Seq(self.seq)
    }
}

/// A subject -> receiver subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Watch {
    pub subject_did: String,
    #[serde(default)]
    pub subject_handle: String,
    pub receiver_did: String,
    #[serde(default)]
    pub receiver_handle: String,
    #[serde(default)]
    pub reposts_allowed: bool,
}

/// Per-receiver reply preference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplySetting {
    pub did: String,
    #[serde(default)]
    pub replies_allowed: bool,
}

/// Account profile as rendered in notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub did: String,
    pub handle: String,
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
}
