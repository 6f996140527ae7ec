//! Frame sources: the relay WebSocket, and an in-memory replay.

use crate::error::{AlertError, Result};
use crate::types::Seq;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// XRPC path of the repo event stream.
pub const SUBSCRIBE_REPOS: &str = "/xrpc/com.atproto.sync.subscribeRepos";

/// One read from an open stream.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A binary frame, in arrival order.
    Frame(Vec<u8>),
    /// Nothing arrived within the read timeout.
    Idle,
    /// The source has no more frames and will not produce any.
    End,
}

/// An open subscription.
pub trait FrameStream: Send {
    fn next_event(&mut self) -> Result<StreamEvent>;

    /// Unsubscribe. Best effort.
    fn close(&mut self);
}

/// Opens subscriptions, resuming after `cursor` when given.
pub trait FirehoseSource: Send + Sync {
    fn connect(&self, cursor: Option<Seq>) -> Result<Box<dyn FrameStream>>;
}

// --- WebSocket ---

/// `subscribeRepos` over a blocking WebSocket.
pub struct WebSocketSource {
    base: String,
    read_timeout: Duration,
}

impl WebSocketSource {
    /// `relay` is a host or `ws(s)://` base URL, e.g. `wss://bsky.network`.
    pub fn new(relay: &str, read_timeout: Duration) -> Self {
        let relay = relay.trim_end_matches('/');
        let base = if relay.starts_with("ws://") || relay.starts_with("wss://") {
            relay.to_string()
        } else {
            format!("wss://{}", relay)
        };
        Self { base, read_timeout }
    }

    pub fn subscribe_url(&self, cursor: Option<Seq>) -> String {
        match cursor {
            Some(seq) => format!("{}{}?cursor={}", self.base, SUBSCRIBE_REPOS, seq),
            None => format!("{}{}", self.base, SUBSCRIBE_REPOS),
        }
    }
}

impl FirehoseSource for WebSocketSource {
    fn connect(&self, cursor: Option<Seq>) -> Result<Box<dyn FrameStream>> {
        let url = self.subscribe_url(cursor);
        let (socket, response) = tungstenite::connect(url.as_str())?;
        tracing::debug!(url = %url, status = %response.status(), "websocket handshake complete");

        // Bounded reads let the intake loop notice stop requests.
        match socket.get_ref() {
            MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(self.read_timeout))?,
            MaybeTlsStream::Rustls(stream) => {
                stream.get_ref().set_read_timeout(Some(self.read_timeout))?
            }
            _ => {
                tracing::warn!("unknown stream type, reads will block until data arrives");
            }
        }

        Ok(Box::new(WebSocketStream { socket }))
    }
}

struct WebSocketStream {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl FrameStream for WebSocketStream {
    fn next_event(&mut self) -> Result<StreamEvent> {
        match self.socket.read() {
            Ok(Message::Binary(bytes)) => Ok(StreamEvent::Frame(bytes)),
            Ok(Message::Close(frame)) => {
                tracing::info!(reason = ?frame, "relay closed the stream");
                Err(AlertError::StreamClosed)
            }
            Ok(Message::Text(text)) => {
                tracing::debug!(len = text.len(), "ignoring text message");
                Ok(StreamEvent::Idle)
            }
            // Ping, pong and raw frames; pongs are queued by tungstenite itself.
            Ok(_) => Ok(StreamEvent::Idle),
            Err(tungstenite::Error::Io(ref e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(StreamEvent::Idle)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.socket.close(None) {
            tracing::debug!(error = %e, "close handshake failed");
        }
        let _ = self.socket.flush();
    }
}

// --- Replay ---

/// Scripted event for [`ReplaySource`].
#[doc(hidden)]
#[derive(Clone, Debug)]
pub enum ReplayEvent {
    Frame(Vec<u8>),
    Idle,
    /// The connection drops (transient).
    Disconnect,
}

/// Replays scripted sessions, one per connect.
///
/// A session that runs out of events disconnects; the last session instead
/// ends the stream, or idles forever with [`ReplaySource::idle_after`].
/// Used by the integration tests and benchmarks; not part of the public API.
#[doc(hidden)]
pub struct ReplaySource {
    sessions: Mutex<VecDeque<Vec<ReplayEvent>>>,
    connects: Mutex<Vec<Option<Seq>>>,
    idle_after: bool,
}

impl ReplaySource {
    pub fn new(sessions: Vec<Vec<ReplayEvent>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            connects: Mutex::new(Vec::new()),
            idle_after: false,
        }
    }

    /// Single session of frames.
    pub fn frames(frames: Vec<Vec<u8>>) -> Self {
        Self::new(vec![frames.into_iter().map(ReplayEvent::Frame).collect()])
    }

    /// Keep the last session open (idle) instead of ending it.
    pub fn idle_after(mut self) -> Self {
        self.idle_after = true;
        self
    }

    /// Cursor passed to each connect so far.
    pub fn connect_cursors(&self) -> Vec<Option<Seq>> {
        self.connects.lock().clone()
    }
}

impl FirehoseSource for ReplaySource {
    fn connect(&self, cursor: Option<Seq>) -> Result<Box<dyn FrameStream>> {
        self.connects.lock().push(cursor);
        let mut sessions = self.sessions.lock();
        let events = sessions.pop_front().unwrap_or_default();
        let last = sessions.is_empty();
        Ok(Box::new(ReplayStream {
            events: events.into(),
            last,
            idle_after: self.idle_after,
        }))
    }
}

struct ReplayStream {
    events: VecDeque<ReplayEvent>,
    last: bool,
    idle_after: bool,
}

impl FrameStream for ReplayStream {
    fn next_event(&mut self) -> Result<StreamEvent> {
        match self.events.pop_front() {
            Some(ReplayEvent::Frame(bytes)) => Ok(StreamEvent::Frame(bytes)),
            Some(ReplayEvent::Idle) => Ok(StreamEvent::Idle),
            Some(ReplayEvent::Disconnect) => Err(AlertError::StreamClosed),
            None if !self.last => Err(AlertError::StreamClosed),
            None if self.idle_after => {
                std::thread::sleep(Duration::from_millis(5));
                Ok(StreamEvent::Idle)
            }
            None => Ok(StreamEvent::End),
        }
    }

    fn close(&mut self) {
        self.events.clear();
    }
}
