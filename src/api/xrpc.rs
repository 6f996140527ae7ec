//! Blocking XRPC client over `ureq`.
//!
//! Implements the account, post and DM collaborators against a PDS, which
//! proxies app-view and chat methods on behalf of the logged-in account.

use super::session::{Session, SessionCallback, SessionEvent};
use super::traits::{AccountApi, Dispatcher, PostApi, PostView};
use crate::error::{AlertError, Result};
use crate::notify::{markdown_to_richtext, EmbedSummary};
use crate::retry::RetryPolicy;
use crate::types::{Did, Profile};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Service DID of the chat service, used in the `atproto-proxy` header.
pub const CHAT_PROXY: &str = "did:web:api.bsky.chat#bsky_chat";

/// Default PDS entryway.
pub const DEFAULT_SERVICE: &str = "https://bsky.social";

/// Login credentials.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
}

/// XRPC client configuration.
#[derive(Clone, Debug)]
pub struct XrpcConfig {
    pub service: String,
    pub timeout: Duration,
    /// Per-call retry. Single attempt by default: the notifier already
    /// retries each lookup and send as a whole.
    pub retry: RetryPolicy,
}

impl Default for XrpcConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::none(),
        }
    }
}

#[derive(Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ResolveHandleOutput {
    did: String,
}

#[derive(Deserialize)]
struct GetPostsOutput {
    posts: Vec<PostViewJson>,
}

#[derive(Deserialize)]
struct PostViewJson {
    uri: String,
    author: Profile,
    #[serde(default)]
    record: serde_json::Value,
    #[serde(default)]
    embed: Option<serde_json::Value>,
    #[serde(default)]
    labels: Vec<serde_json::Value>,
}

impl PostViewJson {
    fn into_view(self) -> PostView {
        let text = self
            .record
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let is_reply = self.record.get("reply").is_some();
        let record_labels = self
            .record
            .get("labels")
            .and_then(|l| l.get("values"))
            .and_then(|v| v.as_array())
            .is_some_and(|v| !v.is_empty());
        let embed = self.embed.as_ref().and_then(embed_view_summary);

        PostView {
            uri: self.uri,
            author: self.author,
            text,
            is_reply,
            embed,
            has_labels: !self.labels.is_empty() || record_labels,
        }
    }
}

/// Classify an embed *view* (`app.bsky.embed.*#view`).
fn embed_view_summary(embed: &serde_json::Value) -> Option<EmbedSummary> {
    let kind = embed.get("$type")?.as_str()?;
    let kind = kind.split('#').next().unwrap_or(kind);
    match kind {
        "app.bsky.embed.images" => Some(EmbedSummary::Images),
        "app.bsky.embed.video" => Some(EmbedSummary::Video),
        "app.bsky.embed.external" => {
            let uri = embed
                .get("external")
                .and_then(|e| e.get("uri"))
                .and_then(|u| u.as_str())
                .unwrap_or_default();
            Some(EmbedSummary::External {
                uri: uri.to_string(),
            })
        }
        "app.bsky.embed.record" | "app.bsky.embed.recordWithMedia" => Some(EmbedSummary::Quote),
        _ => None,
    }
}

#[derive(Deserialize)]
struct ConvoOutput {
    convo: ConvoView,
}

#[derive(Deserialize)]
struct ConvoView {
    id: String,
}

enum Auth {
    None,
    Access,
    Refresh,
}

/// Blocking XRPC client holding the bot's session.
pub struct XrpcClient {
    agent: ureq::Agent,
    config: XrpcConfig,
    credentials: Credentials,
    session: RwLock<Option<Session>>,
    on_session_change: Option<SessionCallback>,
}

impl XrpcClient {
    pub fn new(config: XrpcConfig, credentials: Credentials) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            config,
            credentials,
            session: RwLock::new(None),
            on_session_change: None,
        }
    }

    /// Register the callback invoked on session create/refresh.
    pub fn with_session_callback(mut self, callback: SessionCallback) -> Self {
        self.on_session_change = Some(callback);
        self
    }

    /// Start from a stored session, falling back to password login if it
    /// cannot be refreshed.
    pub fn resume(&self, session: Session) -> Result<()> {
        *self.session.write() = Some(session);
        match self.refresh() {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() || matches!(e, AlertError::SessionExpired) => {
                tracing::info!(error = %e, "stored session rejected, logging in again");
                self.login()
            }
            Err(e) => Err(e),
        }
    }

    /// Create a new session with the configured credentials.
    pub fn login(&self) -> Result<()> {
        let body = json!({
            "identifier": self.credentials.identifier,
            "password": self.credentials.password,
        });
        let session: Session = self
            .call_xrpc("com.atproto.server.createSession", &[], Some(&body), Auth::None, None)
            .map_err(|e| match e {
                AlertError::Api { message, .. } => AlertError::Auth(message),
                other => other,
            })?;
        tracing::info!(did = %session.did, handle = %session.handle, "logged in");
        self.install(session, SessionEvent::Create);
        Ok(())
    }

    /// Exchange the refresh token for a new session.
    pub fn refresh(&self) -> Result<()> {
        let session: Session = self.call_xrpc(
            "com.atproto.server.refreshSession",
            &[],
            Some(&serde_json::Value::Null),
            Auth::Refresh,
            None,
        )?;
        tracing::debug!(did = %session.did, "session refreshed");
        self.install(session, SessionEvent::Refresh);
        Ok(())
    }

    /// DID of the logged-in account.
    pub fn did(&self) -> Result<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.did.clone())
            .ok_or_else(|| AlertError::Auth("not logged in".into()))
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    fn install(&self, session: Session, event: SessionEvent) {
        if let Some(callback) = &self.on_session_change {
            callback(event, &session);
        }
        *self.session.write() = Some(session);
    }

    /// Authenticated query (GET) with retry and one transparent refresh.
    pub fn query<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
        proxy: Option<&str>,
    ) -> Result<T> {
        self.config.retry.run(method, || {
            self.with_refresh(|| self.call_xrpc(method, params, None, Auth::Access, proxy))
        })
    }

    /// Authenticated procedure (POST) with retry and one transparent refresh.
    pub fn procedure<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        proxy: Option<&str>,
    ) -> Result<T> {
        self.config.retry.run(method, || {
            self.with_refresh(|| self.call_xrpc(method, &[], Some(body), Auth::Access, proxy))
        })
    }

    fn with_refresh<T>(&self, call: impl Fn() -> Result<T>) -> Result<T> {
        match call() {
            Err(AlertError::SessionExpired) => {
                self.refresh().or_else(|_| self.login())?;
                call()
            }
            other => other,
        }
    }

    fn call_xrpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
        body: Option<&serde_json::Value>,
        auth: Auth,
        proxy: Option<&str>,
    ) -> Result<T> {
        let url = format!("{}/xrpc/{}", self.config.service.trim_end_matches('/'), method);
        let token = match auth {
            Auth::None => None,
            Auth::Access => Some(self.token(|s| s.access_jwt.clone())?),
            Auth::Refresh => Some(self.token(|s| s.refresh_jwt.clone())?),
        };

        let mut response = match body {
            None => {
                let mut request = self.agent.get(&url);
                for (key, value) in params {
                    request = request.query(*key, *value);
                }
                if let Some(token) = &token {
                    request = request.header("Authorization", &format!("Bearer {}", token));
                }
                if let Some(proxy) = proxy {
                    request = request.header("atproto-proxy", proxy);
                }
                request.call()?
            }
            Some(body) => {
                let bytes = if body.is_null() {
                    Vec::new()
                } else {
                    serde_json::to_vec(body)?
                };
                let mut request = self.agent.post(&url);
                if !bytes.is_empty() {
                    request = request.header("Content-Type", "application/json");
                }
                if let Some(token) = &token {
                    request = request.header("Authorization", &format!("Bearer {}", token));
                }
                if let Some(proxy) = proxy {
                    request = request.header("atproto-proxy", proxy);
                }
                request.send(&bytes[..])?
            }
        };

        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| AlertError::Network(format!("failed to read response: {}", e)))?;

        if (200..300).contains(&status) {
            return Ok(serde_json::from_str(&text)?);
        }

        let parsed: XrpcErrorBody = serde_json::from_str(&text).unwrap_or(XrpcErrorBody {
            error: None,
            message: None,
        });
        let error = parsed.error.unwrap_or_default();
        let message = parsed.message.unwrap_or_else(|| text.chars().take(200).collect());
        Err(classify_status(method, status, &error, message))
    }

    fn token(&self, pick: impl Fn(&Session) -> String) -> Result<String> {
        self.session
            .read()
            .as_ref()
            .map(pick)
            .ok_or_else(|| AlertError::Auth("not logged in".into()))
    }
}

fn classify_status(method: &str, status: u16, error: &str, message: String) -> AlertError {
    match (status, error) {
        (_, "ExpiredToken") => AlertError::SessionExpired,
        (401, _) | (_, "AuthenticationRequired") | (_, "InvalidToken") => AlertError::Auth(message),
        (429, _) => AlertError::RateLimited(method.to_string()),
        _ => AlertError::Api {
            method: method.to_string(),
            status,
            message: if error.is_empty() {
                message
            } else {
                format!("{}: {}", error, message)
            },
        },
    }
}

impl AccountApi for XrpcClient {
    fn resolve_handle(&self, handle: &str) -> Result<Option<Did>> {
        let handle = handle.trim_start_matches('@');
        match self.query::<ResolveHandleOutput>(
            "com.atproto.identity.resolveHandle",
            &[("handle", handle)],
            None,
        ) {
            Ok(out) => Ok(Some(Did::new(out.did)?)),
            Err(AlertError::Api { status: 400, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn get_profile(&self, actor: &str) -> Result<Profile> {
        self.query("app.bsky.actor.getProfile", &[("actor", actor)], None)
    }
}

impl PostApi for XrpcClient {
    fn get_posts(&self, uris: &[String]) -> Result<Vec<PostView>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<(&str, &str)> = uris.iter().map(|u| ("uris", u.as_str())).collect();
        let out: GetPostsOutput = self.query("app.bsky.feed.getPosts", &params, None)?;
        Ok(out.posts.into_iter().map(PostViewJson::into_view).collect())
    }
}

impl Dispatcher for XrpcClient {
    fn send(&self, receiver: &str, text: &str) -> Result<()> {
        let to = if receiver.starts_with("did:") {
            receiver.to_string()
        } else {
            self.resolve_handle(receiver)?
                .ok_or_else(|| AlertError::InvalidIdentifier(receiver.to_string()))?
                .to_string()
        };
        let me = self.did()?;

        let convo: ConvoOutput = self.query(
            "chat.bsky.convo.getConvoForMembers",
            &[("members", to.as_str()), ("members", me.as_str())],
            Some(CHAT_PROXY),
        )?;

        let rich = markdown_to_richtext(text);
        let body = json!({
            "convoId": convo.convo.id,
            "message": {
                "text": rich.text,
                "facets": rich.facets,
            },
        });
        let _: serde_json::Value =
            self.procedure("chat.bsky.convo.sendMessage", &body, Some(CHAT_PROXY))?;
        tracing::debug!(receiver = %to, "message sent");
        Ok(())
    }
}
