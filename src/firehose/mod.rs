//! Firehose intake.
//!
//! [`SubscriptionManager`] keeps one `subscribeRepos` subscription alive,
//! reconnecting with the last acknowledged cursor after transient failures,
//! and pushes every inbound frame into the work queue in arrival order. A
//! full queue blocks intake, which in turn stops reading from the socket.

mod manager;
mod source;

pub use manager::{IntakeOutcome, IntakeReport, ManagerConfig, SubscriptionManager};
pub use source::{FirehoseSource, FrameStream, StreamEvent, WebSocketSource, SUBSCRIBE_REPOS};
#[doc(hidden)]
pub use source::{ReplayEvent, ReplaySource};
