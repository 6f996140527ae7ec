//! Network collaborators: account resolution, post lookup, DM delivery.
//!
//! The pipeline only sees the traits in this module. [`XrpcClient`] is the
//! production implementation; it owns the explicit [`Session`] object that
//! replaces any process-global client state.

mod cache;
mod session;
mod traits;
mod xrpc;

pub use cache::{CachedAccounts, DEFAULT_PROFILE_CACHE};
pub use session::{Session, SessionCallback, SessionEvent};
pub use traits::{AccountApi, Dispatcher, PostApi, PostView};
pub use xrpc::{Credentials, XrpcClient, XrpcConfig, CHAT_PROXY, DEFAULT_SERVICE};
