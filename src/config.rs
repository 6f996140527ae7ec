//! Runtime configuration and the bot's data directory.

use crate::api::{Credentials, Session};
use crate::error::{AlertError, Result};
use crate::firehose::ManagerConfig;
use crate::notify::DEFAULT_GIF_HOSTS;
use crate::pool::default_worker_count;
use crate::queue::DEFAULT_CAPACITY;
use crate::retry::RetryPolicy;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default relay.
pub const DEFAULT_RELAY: &str = "wss://bsky.network";

/// Pipeline configuration.
#[derive(Clone, Debug)]
pub struct FirehoseConfig {
    /// Relay base URL.
    pub relay: String,

    /// Work queue capacity, in frames.
    pub queue_capacity: usize,

    /// Number of worker threads.
    pub workers: usize,

    /// The cursor advances on sequence numbers divisible by this.
    pub cursor_cadence: u64,

    /// Reconnect policy and cursor refresh interval for intake.
    pub intake: ManagerConfig,

    /// Socket read timeout; bounds how long intake takes to notice a stop.
    pub read_timeout: Duration,

    /// Retry policy for profile, post and DM calls.
    pub api_retry: RetryPolicy,

    /// Per-request timeout for API calls.
    pub api_timeout: Duration,

    /// Upper bound on the shutdown drain. `None` waits until every
    /// accepted frame is processed; frames dropped at the limit make the
    /// exit code non-zero.
    pub drain_timeout: Option<Duration>,

    /// Hosts whose links are annotated as GIFs.
    pub gif_hosts: Vec<String>,

    /// Profile cache size.
    pub profile_cache: usize,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            relay: DEFAULT_RELAY.to_string(),
            queue_capacity: DEFAULT_CAPACITY,
            workers: default_worker_count(),
            cursor_cadence: crate::cursor::DEFAULT_CADENCE,
            intake: ManagerConfig::default(),
            read_timeout: Duration::from_millis(500),
            api_retry: RetryPolicy::default(),
            api_timeout: Duration::from_secs(30),
            drain_timeout: None,
            gif_hosts: DEFAULT_GIF_HOSTS.iter().map(|h| h.to_string()).collect(),
            profile_cache: crate::api::DEFAULT_PROFILE_CACHE,
        }
    }
}

// --- Data directory ---

/// Files the bot keeps in its data directory.
#[derive(Clone, Debug)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watch document shared with the command bot.
    pub fn watches(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn login(&self) -> PathBuf {
        self.root.join("login-info.yaml")
    }

    pub fn cursor(&self) -> PathBuf {
        self.root.join("cursor-firehose.bin")
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join("firehose.lock")
    }

    /// Take the single-instance lock, creating the directory if needed.
    ///
    /// The lock is held until the returned file is dropped.
    pub fn acquire_lock(&self) -> Result<File> {
        fs::create_dir_all(&self.root)?;
        let lock_file = File::create(self.lock())?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| AlertError::Locked)?;
        Ok(lock_file)
    }
}

// --- Login file ---

/// `login-info.yaml`: account credentials plus one stored session per bot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "session-key-firehose", skip_serializing_if = "Option::is_none")]
    pub session_key_firehose: Option<String>,
    #[serde(default, rename = "session-key-cmds", skip_serializing_if = "Option::is_none")]
    pub session_key_cmds: Option<String>,
}

impl LoginInfo {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            AlertError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let info: LoginInfo = serde_yaml::from_str(&contents)?;
        if info.username.is_empty() || info.password.is_empty() {
            return Err(AlertError::Config(format!(
                "{} needs a username and password",
                path.display()
            )));
        }
        Ok(info)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            identifier: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// The firehose bot's stored session, if present and readable.
    pub fn firehose_session(&self) -> Option<Session> {
        let exported = self.session_key_firehose.as_deref()?;
        match Session::import(exported) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring stored firehose session");
                None
            }
        }
    }

    /// Store a new firehose session, keeping whatever else is in the file.
    ///
    /// The file is re-read first so a session saved by the command bot in
    /// the meantime is not lost.
    pub fn save_firehose_session(path: impl AsRef<Path>, session: &Session) -> Result<()> {
        let path = path.as_ref();
        let mut info = match fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str::<LoginInfo>(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LoginInfo::default(),
            Err(e) => return Err(e.into()),
        };
        info.session_key_firehose = Some(session.export()?);

        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, serde_yaml::to_string(&info)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
