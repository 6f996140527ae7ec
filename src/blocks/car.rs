//! CAR v1 reader for commit block payloads.

use crate::error::{AlertError, Result};
use ipld_core::cid::multihash::Multihash;
use ipld_core::cid::Cid;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;

/// Multihash code for sha2-256.
pub const SHA2_256: u64 = 0x12;

/// Multicodec for DAG-CBOR blocks.
pub const DAG_CBOR: u64 = 0x71;

/// Upper bound on a single section length; firehose commits are far smaller.
const MAX_SECTION_LEN: u64 = 16 * 1024 * 1024;

#[derive(Deserialize)]
struct CarHeader {
    version: u64,
}

/// Content-addressed blocks recovered from one commit.
#[derive(Default)]
pub struct BlockStore {
    blocks: HashMap<Cid, Vec<u8>>,
    /// Blocks whose digest did not match their CID.
    rejected: usize,
}

impl BlockStore {
    /// Parse a CAR v1 byte string.
    ///
    /// Blocks with a sha2-256 CID are verified; mismatches are dropped rather
    /// than failing the whole payload, so lookups for them return `None`.
    pub fn from_car(bytes: &[u8]) -> Result<Self> {
        let mut store = BlockStore::default();
        if bytes.is_empty() {
            return Ok(store);
        }

        let mut pos = 0usize;
        let header_len = read_section_len(bytes, &mut pos)?;
        let header_bytes = take(bytes, &mut pos, header_len)?;
        let header: CarHeader = serde_ipld_dagcbor::from_slice(header_bytes)?;
        if header.version != 1 {
            return Err(AlertError::Car(format!(
                "unsupported CAR version {}",
                header.version
            )));
        }

        while pos < bytes.len() {
            let section_len = read_section_len(bytes, &mut pos)?;
            let section = take(bytes, &mut pos, section_len)?;

            let mut cursor = Cursor::new(section);
            let cid = Cid::read_bytes(&mut cursor)
                .map_err(|e| AlertError::Car(format!("bad block CID: {}", e)))?;
            let data = &section[cursor.position() as usize..];

            if !digest_matches(&cid, data) {
                tracing::debug!(%cid, "dropping block with mismatched digest");
                store.rejected += 1;
                continue;
            }
            store.blocks.insert(cid, data.to_vec());
        }

        Ok(store)
    }

    /// Look up a block by CID.
    pub fn get(&self, cid: &Cid) -> Option<&[u8]> {
        self.blocks.get(cid).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

/// Compute the DAG-CBOR CIDv1 of a block.
pub fn block_cid(data: &[u8]) -> Cid {
    let digest = Sha256::digest(data);
    // A 32-byte digest always fits the 64-byte multihash buffer.
    let hash = Multihash::<64>::wrap(SHA2_256, &digest).unwrap_or_default();
    Cid::new_v1(DAG_CBOR, hash)
}

fn digest_matches(cid: &Cid, data: &[u8]) -> bool {
    let hash = cid.hash();
    if hash.code() != SHA2_256 {
        // Unknown hash function; accept without verification.
        return true;
    }
    hash.digest() == Sha256::digest(data).as_slice()
}

/// Read an unsigned LEB128 varint section length.
fn read_section_len(bytes: &[u8], pos: &mut usize) -> Result<usize> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| AlertError::Car("truncated varint".into()))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 63 {
            return Err(AlertError::Car("varint overflow".into()));
        }
    }
    if value > MAX_SECTION_LEN {
        return Err(AlertError::Car(format!("section of {} bytes", value)));
    }
    Ok(value as usize)
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| AlertError::Car("truncated section".into()))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}
