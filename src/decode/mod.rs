//! Record decoding for firehose commits.
//!
//! - [`Frame`] splits a raw stream message into header and body
//! - [`OpsByType`] resolves each create against the commit's blocks and
//!   groups the typed records by collection
//!
//! Decode anomalies (missing blocks, invalid records, updates) are skipped,
//! never surfaced as errors.

mod frame;
mod ops;
pub(crate) mod records;

pub use frame::{Frame, FrameHeader};
pub use ops::{CollectionOps, CreatedRecord, DeletedRecord, OpsByType};
pub use records::{
    Collection, Embed, External, Post, Record, ReplyRef, Repost, SelfLabel, SelfLabels,
    StrongRef, POST_COLLECTION, REPOST_COLLECTION,
};
