//! Event-stream frame envelope.
//!
//! Each binary WebSocket message is two concatenated DAG-CBOR values: a
//! header `{op, t}` followed by the body. `op = 1` is a regular message whose
//! body type is named by `t`; `op = -1` is an error frame.

use crate::error::{AlertError, Result};
use crate::types::Commit;
use serde::Deserialize;
use serde_ipld_dagcbor::de::Deserializer;

/// Frame header.
#[derive(Clone, Debug, Deserialize)]
pub struct FrameHeader {
    pub op: i64,
    #[serde(default)]
    pub t: Option<String>,
}

impl FrameHeader {
    pub fn is_error(&self) -> bool {
        self.op == -1
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct InfoBody {
    name: String,
    #[serde(default)]
    message: Option<String>,
}

/// A decoded stream frame.
#[derive(Debug)]
pub enum Frame {
    Commit(Commit),
    /// Informational message from the relay (e.g. `OutdatedCursor`).
    Info { name: String, message: Option<String> },
    /// Error frame; the relay closes the connection after sending it.
    Error { error: String, message: Option<String> },
    /// Identity, account, sync and future message types.
    Other(String),
}

impl Frame {
    /// Decode a full frame.
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        let mut de = Deserializer::from_slice(bytes);
        let header = FrameHeader::deserialize(&mut de)?;

        if header.is_error() {
            let body = ErrorBody::deserialize(&mut de)?;
            return Ok(Frame::Error {
                error: body.error,
                message: body.message,
            });
        }
        if header.op != 1 {
            return Err(AlertError::Frame(format!("unknown op {}", header.op)));
        }

        match header.t.as_deref() {
            Some("#commit") => Ok(Frame::Commit(Commit::deserialize(&mut de)?)),
            Some("#info") => {
                let body = InfoBody::deserialize(&mut de)?;
                Ok(Frame::Info {
                    name: body.name,
                    message: body.message,
                })
            }
            Some(other) => Ok(Frame::Other(other.to_string())),
            None => Err(AlertError::Frame("missing message type".into())),
        }
    }

    /// Decode only the header; used by the intake loop to spot error frames
    /// without paying for the body.
    pub fn peek_header(bytes: &[u8]) -> Result<FrameHeader> {
        let mut de = Deserializer::from_slice(bytes);
        Ok(FrameHeader::deserialize(&mut de)?)
    }

    /// Convert an error frame into the matching stream error.
    pub fn into_stream_error(self) -> Option<AlertError> {
        match self {
            Frame::Error { error, message } => Some(AlertError::StreamError {
                error,
                message: message.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}
