//! Typed records recovered from commit blocks.

use serde::Deserialize;

/// Lexicon id of post records.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Lexicon id of repost records.
pub const REPOST_COLLECTION: &str = "app.bsky.feed.repost";

/// Collections the pipeline cares about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Post,
    Repost,
    Other(String),
}

impl Collection {
    pub fn from_nsid(nsid: &str) -> Self {
        match nsid {
            POST_COLLECTION => Collection::Post,
            REPOST_COLLECTION => Collection::Repost,
            other => Collection::Other(other.to_string()),
        }
    }

    /// Whether created records of this collection are decoded at all.
    pub fn is_interesting(&self) -> bool {
        !matches!(self, Collection::Other(_))
    }
}

/// A record block, discriminated by its `$type` field.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "$type")]
pub enum Record {
    #[serde(rename = "app.bsky.feed.post")]
    Post(Post),
    #[serde(rename = "app.bsky.feed.repost")]
    Repost(Repost),
    #[serde(other)]
    Unknown,
}

impl Record {
    /// Decode a DAG-CBOR record block.
    ///
    /// Blocks that fail schema validation decode as `Unknown`.
    pub fn from_block(bytes: &[u8]) -> Record {
        match serde_ipld_dagcbor::from_slice::<Record>(bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(error = ?e, "record failed validation");
                Record::Unknown
            }
        }
    }
}

/// `app.bsky.feed.post`.
#[derive(Clone, Debug, Deserialize)]
pub struct Post {
    pub text: String,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub embed: Option<Embed>,
    #[serde(default)]
    pub labels: Option<SelfLabels>,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<String>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub fn has_content_warning(&self) -> bool {
        self.labels.as_ref().is_some_and(|l| !l.values.is_empty())
    }
}

/// `app.bsky.feed.repost`.
#[derive(Clone, Debug, Deserialize)]
pub struct Repost {
    pub subject: StrongRef,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<String>,
}

/// `com.atproto.repo.strongRef`.
#[derive(Clone, Debug, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

/// `com.atproto.label.defs#selfLabels`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SelfLabels {
    #[serde(default)]
    pub values: Vec<SelfLabel>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SelfLabel {
    pub val: String,
}

/// Post embeds. Only the fields needed to classify the embed are decoded.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    #[serde(rename = "app.bsky.embed.images")]
    Images {},
    #[serde(rename = "app.bsky.embed.video")]
    Video {},
    #[serde(rename = "app.bsky.embed.external")]
    External { external: External },
    #[serde(rename = "app.bsky.embed.record")]
    Record { record: StrongRef },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia {},
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize)]
pub struct External {
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    pub(crate) struct PostBlock<'a> {
        #[serde(rename = "$type")]
        pub kind: &'a str,
        pub text: &'a str,
        #[serde(rename = "createdAt")]
        pub created_at: &'a str,
    }

    #[test]
    fn test_collection_mapping() {
        assert_eq!(Collection::from_nsid("app.bsky.feed.post"), Collection::Post);
        assert_eq!(
            Collection::from_nsid("app.bsky.feed.repost"),
            Collection::Repost
        );
        let like = Collection::from_nsid("app.bsky.feed.like");
        assert!(!like.is_interesting());
        assert_eq!(like, Collection::Other("app.bsky.feed.like".into()));
    }

    #[test]
    fn test_decode_post() {
        let bytes = serde_ipld_dagcbor::to_vec(&PostBlock {
            kind: POST_COLLECTION,
            text: "hello world",
            created_at: "2024-11-20T12:00:00Z",
        })
        .unwrap();

        match Record::from_block(&bytes) {
            Record::Post(post) => {
                assert_eq!(post.text, "hello world");
                assert!(!post.is_reply());
                assert!(post.embed.is_none());
                assert!(!post.has_content_warning());
            }
            other => panic!("Expected post, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type() {
        let bytes = serde_ipld_dagcbor::to_vec(&PostBlock {
            kind: "app.bsky.feed.like",
            text: "",
            created_at: "2024-11-20T12:00:00Z",
        })
        .unwrap();
        let record = Record::from_block(&bytes);
        assert!(matches!(record, Record::Unknown));
    }

    #[derive(Serialize)]
    struct MissingText<'a> {
        #[serde(rename = "$type")]
        kind: &'a str,
    }

    #[test]
    fn test_invalid_post_is_unknown() {
        let bytes = serde_ipld_dagcbor::to_vec(&MissingText {
            kind: POST_COLLECTION,
        })
        .unwrap();
        assert!(matches!(Record::from_block(&bytes), Record::Unknown));
        assert!(matches!(Record::from_block(b"not cbor"), Record::Unknown));
    }
}
