//! Per-frame work done by each pool worker.

use super::router::Notifier;
use crate::cursor::Cursor;
use crate::decode::{Frame, OpsByType};
use crate::error::Result;
use crate::pool::FrameHandler;
use crate::types::Commit;
use std::sync::Arc;

/// Decodes a frame, notifies, then acknowledges its sequence number.
pub struct FrameProcessor {
    notifier: Notifier,
    cursor: Arc<Cursor>,
}

impl FrameProcessor {
    pub fn new(notifier: Notifier, cursor: Arc<Cursor>) -> Self {
        Self { notifier, cursor }
    }

    fn process_commit(&self, commit: &Commit) -> Result<()> {
        if commit.blocks.is_empty() {
            tracing::debug!(seq = commit.seq, repo = %commit.repo, "commit without blocks");
            return Ok(());
        }

        let ops = match OpsByType::from_commit(commit) {
            Ok(ops) => ops,
            Err(e) => {
                tracing::debug!(seq = commit.seq, repo = %commit.repo, error = %e, "undecodable commit skipped");
                return Ok(());
            }
        };

        let sent = self.notifier.notify(&ops)?;
        if sent > 0 {
            tracing::debug!(seq = commit.seq, repo = %commit.repo, sent, "commit notified");
        }
        Ok(())
    }
}

impl FrameHandler for FrameProcessor {
    fn handle(&self, frame: Vec<u8>) -> Result<()> {
        let commit = match Frame::decode(&frame) {
            Ok(Frame::Commit(commit)) => commit,
            Ok(Frame::Info { name, message }) => {
                tracing::info!(name = %name, message = ?message, "relay info");
                return Ok(());
            }
            // Error frames are handled by intake; nothing to do here.
            Ok(Frame::Error { .. }) | Ok(Frame::Other(_)) => return Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, bytes = frame.len(), "undecodable frame skipped");
                return Ok(());
            }
        };

        self.process_commit(&commit)?;
        self.cursor.observe(commit.seq());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{block_cid, build_car};
    use crate::decode::records::tests::PostBlock;
    use crate::notify::fakes::{notifier, watch};
    use crate::types::{OpAction, RepoOp, Seq};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Header {
        op: i64,
        t: &'static str,
    }

    fn commit_frame(seq: u64, text: &str, with_blocks: bool) -> Vec<u8> {
        let block = serde_ipld_dagcbor::to_vec(&PostBlock {
            kind: "app.bsky.feed.post",
            text,
            created_at: "2024-11-20T12:00:00Z",
        })
        .unwrap();
        let cid = block_cid(&block);
        let commit = Commit {
            seq,
            repo: "did:plc:abc".into(),
            ops: vec![RepoOp {
                action: OpAction::Create,
                path: "app.bsky.feed.post/3kabc".into(),
                cid: Some(cid),
            }],
            blocks: if with_blocks {
                build_car(&[(cid, block)])
            } else {
                Vec::new()
            },
            too_big: !with_blocks,
            rev: None,
            time: None,
        };

        let mut out = serde_ipld_dagcbor::to_vec(&Header {
            op: 1,
            t: "#commit",
        })
        .unwrap();
        out.extend(serde_ipld_dagcbor::to_vec(&commit).unwrap());
        out
    }

    #[test]
    fn test_commit_is_notified_and_acknowledged() {
        let (notifier, recorder) = notifier(vec![watch("did:plc:xyz", false)], vec![], false);
        let cursor = Arc::new(Cursor::new(None));
        let processor = FrameProcessor::new(notifier, cursor.clone());

        processor.handle(commit_frame(100, "from the firehose", true)).unwrap();

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "did:plc:xyz");
        assert!(sent[0].1.contains("from the firehose"));
        assert_eq!(cursor.current(), Some(Seq(100)));
    }

    #[test]
    fn test_off_cadence_seq_does_not_move_cursor() {
        let (notifier, _) = notifier(vec![], vec![], false);
        let cursor = Arc::new(Cursor::new(None));
        let processor = FrameProcessor::new(notifier, cursor.clone());

        processor.handle(commit_frame(101, "x", true)).unwrap();
        assert_eq!(cursor.current(), None);
    }

    #[test]
    fn test_blockless_commit_is_acknowledged_only() {
        let (notifier, recorder) = notifier(vec![watch("did:plc:xyz", false)], vec![], false);
        let cursor = Arc::new(Cursor::new(None));
        let processor = FrameProcessor::new(notifier, cursor.clone());

        processor.handle(commit_frame(40, "too big", false)).unwrap();
        assert!(recorder.sent.lock().is_empty());
        assert_eq!(cursor.current(), Some(Seq(40)));
    }

    #[test]
    fn test_garbage_frame_is_skipped() {
        let (notifier, _) = notifier(vec![], vec![], false);
        let cursor = Arc::new(Cursor::new(None));
        let processor = FrameProcessor::new(notifier, cursor.clone());

        processor.handle(vec![0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(cursor.current(), None);
    }
}
