//! # SkyAlert
//!
//! Firehose-driven notification bot. Watches accounts ("subjects") on the
//! Bluesky repo event stream and sends their new posts and reposts to
//! subscribed receivers by direct message.
//!
//! ## Core Concepts
//!
//! - **Intake**: one thread holds the `subscribeRepos` subscription and feeds
//!   raw frames into a bounded queue; a full queue throttles the socket
//! - **Workers**: a fixed pool decodes commits, matches them against a watch
//!   snapshot and dispatches notifications
//! - **Cursor**: a monotonic, coarse progress marker used to resume after a
//!   reconnect or restart
//! - **Lifecycle**: `Running -> Stopping -> Draining -> Terminated`; queued
//!   frames are processed before exit
//!
//! ## Example
//!
//! ```ignore
//! use skyalert::{Collaborators, FirehoseConfig, Pipeline, WebSocketSource};
//!
//! let config = FirehoseConfig::default();
//! let source = Arc::new(WebSocketSource::new(&config.relay, config.read_timeout));
//! let pipeline = Pipeline::new(config, source, collaborators);
//!
//! let report = pipeline.run(None, shutdown_flag)?;
//! std::process::exit(report.exit_code);
//! ```

pub mod api;
pub mod blocks;
pub mod config;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod firehose;
pub mod lifecycle;
pub mod notify;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod types;
pub mod watches;

// Re-exports
pub use api::{
    AccountApi, CachedAccounts, Credentials, Dispatcher, PostApi, PostView, Session, XrpcClient,
    XrpcConfig,
};
pub use blocks::BlockStore;
pub use config::{DataPaths, FirehoseConfig, LoginInfo};
pub use cursor::{Cursor, CursorFile};
pub use decode::{Frame, OpsByType, Record};
pub use error::{AlertError, Result};
pub use firehose::{
    FirehoseSource, IntakeOutcome, ManagerConfig, SubscriptionManager, WebSocketSource,
};
#[doc(hidden)]
pub use firehose::{ReplayEvent, ReplaySource};
pub use lifecycle::{Lifecycle, Phase, ShutdownCause};
pub use notify::{Collaborators, FrameProcessor, Notifier};
pub use pipeline::{Pipeline, ShutdownReport};
pub use pool::{FrameHandler, WorkerPool};
pub use queue::WorkQueue;
pub use retry::RetryPolicy;
pub use types::*;
pub use watches::{StaticWatches, WatchSnapshot, WatchSource, YamlWatchStore};
