//! End-to-end pipeline tests over replayed firehose sessions.

mod common;

use common::*;
use skyalert::{
    CursorFile, Pipeline, ReplayEvent, ReplaySource, ReplySetting, Seq, ShutdownCause,
    ShutdownReport, Watch,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn run_pipeline(
    source: Arc<ReplaySource>,
    watches: Vec<Watch>,
    outbox: Arc<Outbox>,
) -> ShutdownReport {
    run_with(source, watches, vec![], outbox, None)
}

fn run_with(
    source: Arc<ReplaySource>,
    watches: Vec<Watch>,
    replies: Vec<ReplySetting>,
    outbox: Arc<Outbox>,
    initial: Option<Seq>,
) -> ShutdownReport {
    let signal = outbox
        .signal_on_send
        .clone()
        .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
    Pipeline::new(test_config(), source, collaborators(watches, replies, outbox))
        .run(initial, signal)
        .unwrap()
}

// --- Matching ---

#[test]
fn test_watched_post_is_delivered() {
    let source = Arc::new(ReplaySource::frames(vec![post_frame(100, "hello firehose")]));
    let outbox = Arc::new(Outbox::default());

    let report = run_pipeline(source, vec![watch(WATCHER, false)], outbox.clone());

    let messages = outbox.messages();
    assert_eq!(messages.len(), 1);
    let (receiver, text) = &messages[0];
    assert_eq!(receiver, WATCHER);
    assert!(text.contains("\"hello firehose\""));
    assert!(text.contains("https://bsky.app/profile/did:plc:alice/post/3kpost"));
    assert!(!text.contains("reposted"));

    assert_eq!(report.cause, Some(ShutdownCause::StreamEnded));
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.notifications.sent, 1);
    assert_eq!(report.cursor, Some(Seq(100)));
}

#[test]
fn test_unwatched_author_is_ignored() {
    let frame = commit_frame(
        100,
        "did:plc:stranger",
        &[Created::Post {
            rkey: "3k1",
            text: "nobody is watching",
        }],
    );
    let outbox = Arc::new(Outbox::default());

    let report = run_pipeline(
        Arc::new(ReplaySource::frames(vec![frame])),
        vec![watch(WATCHER, true)],
        outbox.clone(),
    );

    assert_eq!(outbox.count(), 0);
    assert_eq!(report.pool.processed, 1);
}

#[test]
fn test_repost_names_both_accounts() {
    let frame = commit_frame(
        40,
        ALICE,
        &[Created::Repost {
            rkey: "3krepost",
            subject: "at://did:plc:carol/app.bsky.feed.post/3korig",
        }],
    );
    let outbox = Arc::new(Outbox::default());

    run_pipeline(
        Arc::new(ReplaySource::frames(vec![frame])),
        vec![watch(WATCHER, true)],
        outbox.clone(),
    );

    let messages = outbox.messages();
    assert_eq!(messages.len(), 1);
    let text = &messages[0].1;
    assert!(text.contains("[alice](https://bsky.app/profile/did:plc:alice) reposted"));
    assert!(text.contains("[carol.example.com](https://bsky.app/profile/did:plc:carol)"));
    assert!(text.contains("https://bsky.app/profile/did:plc:carol/post/3korig"));
    assert!(text.contains("the reposted words"));
    assert!(text.contains("[has images]"));
}

#[test]
fn test_repost_without_permission_is_ignored() {
    let frame = commit_frame(
        40,
        ALICE,
        &[Created::Repost {
            rkey: "3krepost",
            subject: "at://did:plc:carol/app.bsky.feed.post/3korig",
        }],
    );
    let outbox = Arc::new(Outbox::default());

    run_pipeline(
        Arc::new(ReplaySource::frames(vec![frame])),
        vec![watch(WATCHER, false)],
        outbox.clone(),
    );

    assert_eq!(outbox.count(), 0);
}

#[test]
fn test_reply_follows_receiver_preference() {
    let frame = commit_frame(
        60,
        ALICE,
        &[Created::Reply {
            rkey: "3kreply",
            text: "replying to bob",
        }],
    );
    let outbox = Arc::new(Outbox::default());

    // No preference recorded for WATCHER; replies stay off.
    let report = run_with(
        Arc::new(ReplaySource::frames(vec![frame])),
        vec![watch(WATCHER, false), watch("did:plc:fan", false)],
        vec![ReplySetting {
            did: "did:plc:fan".into(),
            replies_allowed: true,
        }],
        outbox.clone(),
        None,
    );

    let messages = outbox.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "did:plc:fan");
    assert!(messages[0].1.contains("[is a reply]"));
    assert_eq!(report.notifications.suppressed, 1);
}

#[test]
fn test_missing_block_skips_only_that_record() {
    let frame = commit_frame(
        80,
        ALICE,
        &[
            Created::MissingBlock { rkey: "3kgone" },
            Created::Post {
                rkey: "3khere",
                text: "still delivered",
            },
        ],
    );
    let outbox = Arc::new(Outbox::default());

    let report = run_pipeline(
        Arc::new(ReplaySource::frames(vec![frame])),
        vec![watch(WATCHER, false)],
        outbox.clone(),
    );

    let messages = outbox.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.contains("still delivered"));
    assert_eq!(report.exit_code, 0);
}

// --- Flow control and ordering ---

#[test]
fn test_backpressure_loses_nothing() {
    let frames: Vec<Vec<u8>> = (1..=30).map(|i| post_frame(i, &format!("post {}", i))).collect();
    let outbox = Arc::new(Outbox {
        delay: Some(Duration::from_millis(2)),
        ..Default::default()
    });
    let mut config = test_config();
    config.queue_capacity = 1;
    config.workers = 1;

    let report = Pipeline::new(
        config,
        Arc::new(ReplaySource::frames(frames)),
        collaborators(vec![watch(WATCHER, false)], vec![], outbox.clone()),
    )
    .run(None, Arc::new(AtomicBool::new(false)))
    .unwrap();

    assert_eq!(report.intake.frames, 30);
    assert_eq!(report.pool.processed, 30);
    assert_eq!(report.undrained, 0);

    // One worker preserves arrival order.
    let texts: Vec<String> = outbox.messages().into_iter().map(|(_, text)| text).collect();
    assert_eq!(texts.len(), 30);
    for (i, text) in texts.iter().enumerate() {
        assert!(text.contains(&format!("\"post {}\"", i + 1)), "{}", text);
    }
}

#[test]
fn test_signal_drains_queued_frames() {
    let signal = Arc::new(AtomicBool::new(false));
    let frames: Vec<Vec<u8>> = (1..=5).map(|i| post_frame(i * 20, "queued")).collect();
    let outbox = Arc::new(Outbox {
        delay: Some(Duration::from_millis(20)),
        signal_on_send: Some(signal),
        ..Default::default()
    });

    let report = run_pipeline(
        Arc::new(ReplaySource::frames(frames).idle_after()),
        vec![watch(WATCHER, false)],
        outbox.clone(),
    );

    assert_eq!(report.cause, Some(ShutdownCause::Signal));
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.undrained, 0);
    assert_eq!(outbox.count() as u64, report.intake.frames);
    assert_eq!(report.pool.processed, report.intake.frames);
}

#[test]
fn test_slow_drain_without_limit_delivers_everything() {
    let signal = Arc::new(AtomicBool::new(false));
    let frames: Vec<Vec<u8>> = (1..=8).map(|i| post_frame(i * 20, "slow")).collect();
    let outbox = Arc::new(Outbox {
        delay: Some(Duration::from_millis(60)),
        signal_on_send: Some(signal.clone()),
        ..Default::default()
    });
    let mut config = test_config();
    config.workers = 1;
    assert_eq!(config.drain_timeout, None);

    let report = Pipeline::new(
        config,
        Arc::new(ReplaySource::frames(frames).idle_after()),
        collaborators(vec![watch(WATCHER, false)], vec![], outbox.clone()),
    )
    .run(None, signal)
    .unwrap();

    assert_eq!(report.cause, Some(ShutdownCause::Signal));
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.undrained, 0);
    assert_eq!(report.intake.frames, 8);
    assert_eq!(outbox.count(), 8);
}

#[test]
fn test_drain_limit_dropping_frames_exits_nonzero() {
    let signal = Arc::new(AtomicBool::new(false));
    let frames: Vec<Vec<u8>> = (1..=10).map(|i| post_frame(i * 20, "dropped")).collect();
    let outbox = Arc::new(Outbox {
        delay: Some(Duration::from_millis(100)),
        signal_on_send: Some(signal.clone()),
        ..Default::default()
    });
    let mut config = test_config();
    config.workers = 1;
    config.drain_timeout = Some(Duration::from_millis(1));

    let report = Pipeline::new(
        config,
        Arc::new(ReplaySource::frames(frames).idle_after()),
        collaborators(vec![watch(WATCHER, false)], vec![], outbox.clone()),
    )
    .run(None, signal)
    .unwrap();

    assert_eq!(report.cause, Some(ShutdownCause::Signal));
    assert!(report.undrained > 0);
    assert_eq!(report.exit_code, 1);
    assert_eq!(
        report.pool.processed + report.pool.failed + report.undrained as u64,
        report.intake.frames
    );
}

// --- Reconnects and cursor ---

#[test]
fn test_replayed_seq_after_reconnect_is_delivered_again() {
    let source = Arc::new(ReplaySource::new(vec![
        vec![
            ReplayEvent::Frame(post_frame(20, "said twice")),
            ReplayEvent::Disconnect,
        ],
        vec![ReplayEvent::Frame(post_frame(20, "said twice"))],
    ]));
    let outbox = Arc::new(Outbox::default());

    let report = run_pipeline(source.clone(), vec![watch(WATCHER, false)], outbox.clone());

    assert_eq!(outbox.count(), 2);
    assert_eq!(report.intake.reconnects, 1);
    assert_eq!(source.connect_cursors().len(), 2);
    assert_eq!(report.cursor, Some(Seq(20)));
}

#[test]
fn test_consumer_too_slow_reconnects() {
    let source = Arc::new(ReplaySource::new(vec![
        vec![ReplayEvent::Frame(error_frame("ConsumerTooSlow", "catch up"))],
        vec![ReplayEvent::Frame(post_frame(100, "after the stall"))],
    ]));
    let outbox = Arc::new(Outbox::default());

    let report = run_pipeline(source.clone(), vec![watch(WATCHER, false)], outbox.clone());

    assert_eq!(report.exit_code, 0);
    assert_eq!(outbox.count(), 1);
    assert_eq!(source.connect_cursors().len(), 2);
}

#[test]
fn test_resume_from_saved_cursor() {
    let dir = TempDir::new().unwrap();
    let file = CursorFile::new(dir.path().join("cursor-firehose.bin"));
    file.save(Seq(40)).unwrap();
    let initial = file.load().unwrap();

    let source = Arc::new(ReplaySource::frames(vec![
        post_frame(59, "not on cadence"),
        post_frame(60, "on cadence"),
    ]));
    let outbox = Arc::new(Outbox::default());

    let report = Pipeline::new(
        test_config(),
        source.clone(),
        collaborators(vec![watch(WATCHER, false)], vec![], outbox.clone()),
    )
    .with_cursor_file(file.clone())
    .run(initial, Arc::new(AtomicBool::new(false)))
    .unwrap();

    assert_eq!(source.connect_cursors(), vec![Some(Seq(40))]);
    assert_eq!(report.cursor, Some(Seq(60)));
    assert_eq!(file.load().unwrap(), Some(Seq(60)));
    assert_eq!(outbox.count(), 2);
}
