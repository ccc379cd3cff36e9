//! Duplex text-frame transports.
//!
//! The connection task only needs "a sink of frames and a stream of
//! frames", so sockets are hidden behind [`Connector`]:
//!
//! - [`WebSocketConnector`] dials a `ws://` / `wss://` URL with
//!   tokio-tungstenite. Only text frames are surfaced; ping/pong and the
//!   close handshake are handled by tungstenite and binary frames are
//!   skipped.
//! - [`MemoryConnector`] pairs the client with an in-process
//!   [`MemoryPeer`], for tests and for embedding two engines in one process.

use futures_util::future::{self, BoxFuture};
use futures_util::{sink, stream, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open connection: frames out, frames in.
///
/// The stream ending means the peer closed the connection.
pub struct Duplex {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens [`Duplex`] connections to a URL.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Duplex, TransportError>>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// tokio-tungstenite client.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Duplex, TransportError>> {
        Box::pin(async move {
            let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
            let (ws_writer, ws_reader) = ws_stream.split();

            let sink = ws_writer.with(|text: String| {
                future::ready(Ok::<_, TransportError>(WsMessage::Text(text.into())))
            });

            let stream = ws_reader.filter_map(|frame| {
                future::ready(match frame {
                    Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    // The stream ends once the close handshake completes.
                    Ok(_) => None,
                    Err(e) => Some(Err(e.into())),
                })
            });

            Ok(Duplex {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// Connector whose connections are accepted by a [`MemoryListener`].
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<MemoryPeer>,
    attempts: AtomicUsize,
    refuse: AtomicBool,
}

/// Server side of a [`MemoryConnector`].
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server end of one in-process connection.
///
/// Dropping it closes the connection for the client.
pub struct MemoryPeer {
    url: String,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            incoming: tx,
            attempts: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        };
        (connector, MemoryListener { incoming: rx })
    }

    /// Number of `connect` calls so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Duplex, TransportError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Refused(url.to_string()));
            }

            let (to_peer, from_client) = mpsc::unbounded_channel::<String>();
            let (to_client, from_peer) = mpsc::unbounded_channel::<String>();
            let peer = MemoryPeer {
                url: url.to_string(),
                tx: to_client,
                rx: from_client,
            };
            // No listener means nobody is accepting.
            self.incoming
                .send(peer)
                .map_err(|_| TransportError::Refused(url.to_string()))?;

            let sink = sink::unfold(to_peer, |tx, frame: String| async move {
                tx.send(frame).map_err(|_| TransportError::Closed)?;
                Ok::<_, TransportError>(tx)
            });
            let stream = stream::unfold(from_peer, |mut rx| async move {
                rx.recv().await.map(|frame| (Ok(frame), rx))
            });

            Ok(Duplex {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

impl MemoryListener {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.try_recv().ok()
    }
}

impl MemoryPeer {
    /// URL the client dialed.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a frame to the client. Returns false if the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.tx.send(frame.into()).is_ok()
    }

    /// Next frame from the client; `None` once the client disconnected.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}
