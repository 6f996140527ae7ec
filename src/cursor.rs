//! Shared stream cursor.
//!
//! Workers advance the cursor as commits complete; the subscription manager
//! reads it when (re)connecting. The value only moves forward.

use crate::error::{AlertError, Result};
use crate::types::Seq;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Magic bytes for the cursor file.
const CURSOR_MAGIC: &[u8; 4] = b"CUR\0";

/// Current cursor file format version.
const CURSOR_VERSION: u8 = 1;

/// Default advance cadence: every 20th sequence number.
pub const DEFAULT_CADENCE: u64 = 20;

/// Last acknowledged stream position. Zero means "no position yet".
pub struct Cursor {
    value: AtomicU64,
    cadence: u64,
}

impl Cursor {
    pub fn new(initial: Option<Seq>) -> Self {
        Self::with_cadence(initial, DEFAULT_CADENCE)
    }

    pub fn with_cadence(initial: Option<Seq>, cadence: u64) -> Self {
        Self {
            value: AtomicU64::new(initial.map(|s| s.0).unwrap_or(0)),
            cadence: cadence.max(1),
        }
    }

    /// Current position, if any commit has been acknowledged.
    pub fn current(&self) -> Option<Seq> {
        match self.value.load(Ordering::Acquire) {
            0 => None,
            v => Some(Seq(v)),
        }
    }

    /// Move the cursor to `seq` unless it is already further along.
    ///
    /// Returns true if the stored value changed.
    pub fn advance(&self, seq: Seq) -> bool {
        let prev = self.value.fetch_max(seq.0, Ordering::AcqRel);
        prev < seq.0
    }

    /// Advance only on the configured cadence, to bound write contention.
    pub fn observe(&self, seq: Seq) -> bool {
        if seq.0 % self.cadence == 0 {
            self.advance(seq)
        } else {
            false
        }
    }

    pub fn cadence(&self) -> u64 {
        self.cadence
    }
}

/// On-disk copy of the cursor, so a restart resumes near the last position.
#[derive(Clone, Debug)]
pub struct CursorFile {
    path: PathBuf,
}

impl CursorFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted cursor. A missing file is not an error.
    pub fn load(&self) -> Result<Option<Seq>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)?;
        let mut buf = Vec::with_capacity(17);
        file.read_to_end(&mut buf)?;
        if buf.len() != 17 {
            return Err(AlertError::InvalidCursorFile(format!(
                "expected 17 bytes, found {}",
                buf.len()
            )));
        }

        if &buf[0..4] != CURSOR_MAGIC {
            return Err(AlertError::InvalidCursorFile("invalid magic".into()));
        }
        if buf[4] != CURSOR_VERSION {
            return Err(AlertError::InvalidCursorFile(format!(
                "unsupported version: {}",
                buf[4]
            )));
        }

        let mut value_bytes = [0u8; 8];
        value_bytes.copy_from_slice(&buf[5..13]);
        let mut checksum_bytes = [0u8; 4];
        checksum_bytes.copy_from_slice(&buf[13..17]);

        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&value_bytes);
        if stored != computed {
            return Err(AlertError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        match u64::from_le_bytes(value_bytes) {
            0 => Ok(None),
            v => Ok(Some(Seq(v))),
        }
    }

    /// Persist the cursor atomically (write to a temp file, then rename).
    pub fn save(&self, seq: Seq) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            let value_bytes = seq.0.to_le_bytes();
            file.write_all(CURSOR_MAGIC)?;
            file.write_all(&[CURSOR_VERSION])?;
            file.write_all(&value_bytes)?;
            file.write_all(&crc32fast::hash(&value_bytes).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Save the cursor's current value, if it has one.
    pub fn save_from(&self, cursor: &Cursor) -> Result<Option<Seq>> {
        match cursor.current() {
            Some(seq) => {
                self.save(seq)?;
                Ok(Some(seq))
            }
            None => Ok(None),
        }
    }
}
