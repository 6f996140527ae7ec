//! Content-addressed block payloads.
//!
//! Commits carry their new records as a CAR file: a header followed by
//! `(CID, bytes)` sections. Operations reference records by CID.

mod car;

pub use car::{block_cid, BlockStore, DAG_CBOR, SHA2_256};

#[cfg(test)]
pub(crate) use car::tests::build_car;
