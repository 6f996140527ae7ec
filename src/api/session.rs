//! Authenticated session context shared by every network collaborator.

use crate::error::{AlertError, Result};
use serde::{Deserialize, Serialize};

/// Tokens and identity of a logged-in account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "accessJwt")]
    pub access_jwt: String,
    #[serde(rename = "refreshJwt")]
    pub refresh_jwt: String,
    pub did: String,
    pub handle: String,
}

impl Session {
    /// Serialize for storage in the login file.
    pub fn export(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore from a string produced by [`Session::export`].
    pub fn import(exported: &str) -> Result<Self> {
        serde_json::from_str(exported)
            .map_err(|e| AlertError::Auth(format!("stored session is unreadable: {}", e)))
    }
}

/// Session lifecycle events reported to the session-change callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Create,
    Refresh,
}

/// Callback invoked whenever a session is created or refreshed.
pub type SessionCallback = Box<dyn Fn(SessionEvent, &Session) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_import() {
        let session = Session {
            access_jwt: "a".into(),
            refresh_jwt: "r".into(),
            did: "did:plc:bot".into(),
            handle: "bot.bsky.social".into(),
        };
        let exported = session.export().unwrap();
        assert_eq!(Session::import(&exported).unwrap(), session);
        assert!(matches!(Session::import("garbage"), Err(AlertError::Auth(_))));
    }
}
