//! Classification of commit operations by collection.

use super::records::{Collection, Post, Record, Repost};
use crate::blocks::BlockStore;
use crate::error::Result;
use crate::types::{AtUri, Commit, Did, OpAction};
use ipld_core::cid::Cid;
use std::collections::HashMap;

/// A created record, enriched with its location and author.
#[derive(Clone, Debug)]
pub struct CreatedRecord<R> {
    pub uri: AtUri,
    pub cid: Cid,
    pub author: Did,
    pub record: R,
}

/// A deleted record. Deletes carry no block, only the path.
#[derive(Clone, Debug)]
pub struct DeletedRecord {
    pub uri: AtUri,
}

/// Created and deleted entries of one collection.
#[derive(Clone, Debug)]
pub struct CollectionOps<R> {
    pub created: Vec<CreatedRecord<R>>,
    pub deleted: Vec<DeletedRecord>,
}

impl<R> Default for CollectionOps<R> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<R> CollectionOps<R> {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

/// Operations of one commit grouped by collection.
#[derive(Clone, Debug, Default)]
pub struct OpsByType {
    pub posts: CollectionOps<Post>,
    pub reposts: CollectionOps<Repost>,
    /// Deletes in collections that are not decoded.
    pub other_deleted: HashMap<String, Vec<DeletedRecord>>,
}

impl OpsByType {
    /// Total number of classified entries.
    pub fn len(&self) -> usize {
        self.posts.created.len()
            + self.posts.deleted.len()
            + self.reposts.created.len()
            + self.reposts.deleted.len()
            + self.other_deleted.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode and classify every operation in a commit.
    ///
    /// Updates are skipped. Creates whose block is missing, or whose block
    /// does not decode as the collection's record type, are skipped. Only a
    /// malformed block payload or repo identifier is an error.
    pub fn from_commit(commit: &Commit) -> Result<Self> {
        let mut out = OpsByType::default();
        if commit.ops.is_empty() {
            return Ok(out);
        }

        let author = Did::new(commit.repo.as_str())?;
        let blocks = BlockStore::from_car(&commit.blocks)?;

        for op in &commit.ops {
            let uri = match AtUri::from_repo_path(&author, &op.path) {
                Ok(uri) => uri,
                Err(_) => {
                    tracing::debug!(seq = commit.seq, path = %op.path, "skipping op with bad path");
                    continue;
                }
            };
            let collection = Collection::from_nsid(uri.collection());

            match op.action {
                // Not supported.
                OpAction::Update => continue,
                OpAction::Delete => {
                    let entry = DeletedRecord { uri };
                    match collection {
                        Collection::Post => out.posts.deleted.push(entry),
                        Collection::Repost => out.reposts.deleted.push(entry),
                        Collection::Other(nsid) => {
                            out.other_deleted.entry(nsid).or_default().push(entry)
                        }
                    }
                }
                OpAction::Create => {
                    if !collection.is_interesting() {
                        continue;
                    }
                    let Some(cid) = op.cid else {
                        continue;
                    };
                    let Some(block) = blocks.get(&cid) else {
                        tracing::debug!(seq = commit.seq, %cid, "create references missing block");
                        continue;
                    };

                    match Record::from_block(block) {
                        Record::Post(record) if collection == Collection::Post => {
                            out.posts.created.push(CreatedRecord {
                                uri,
                                cid,
                                author: author.clone(),
                                record,
                            })
                        }
                        Record::Repost(record) if collection == Collection::Repost => {
                            out.reposts.created.push(CreatedRecord {
                                uri,
                                cid,
                                author: author.clone(),
                                record,
                            })
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(out)
    }
}
