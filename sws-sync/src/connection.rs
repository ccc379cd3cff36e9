//! Reconnecting connection with an offline queue.
//!
//! ```text
//!            start()                 connect ok
//!   Closed ───────────▶ Connecting ─────────────▶ Open
//!     ▲                     │                       │
//!     │   connect failed    │      error / close    │
//!     └─────────────────────┴───────────────────────┘
//!     │
//!     └── sleep(reconnect_delay) ──▶ start() again, forever
//! ```
//!
//! One task per connection owns the transport and runs a `select!` loop
//! over inbound frames, outbound frames and the heartbeat. Callers never
//! block: [`Connection::send`] pushes into an unbounded channel while open
//! and into the [`OutboundQueue`] otherwise.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};

use crate::error::SyncError;
use crate::observable::{lock, Observable};
use crate::protocol::HEARTBEAT_FRAME;
use crate::queue::{Enqueued, OutboundQueue};
use crate::transport::{Connector, Duplex};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
        })
    }
}

/// What happens to updates submitted while not open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfflinePolicy {
    /// Discard the update.
    Drop,
    /// Keep the latest frame per key and replay on open.
    #[default]
    Queue,
}

/// Result of [`Connection::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
    Dropped,
}

/// Receives everything the connection task reads.
///
/// Called on the connection task; implementations must not block.
pub trait InboundHandler: Send + Sync + 'static {
    fn on_frame(&self, frame: &str);

    /// The connection just opened and the offline queue was flushed.
    fn on_open(&self) {}

    /// The connection just closed (or a connect attempt failed).
    fn on_close(&self) {}
}

/// Connection parameters, usually derived from a `SyncConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub url: String,
    pub reconnect_delay: Duration,
    /// `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    pub offline: OfflinePolicy,
    pub queue_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_delay: Duration::from_millis(10_000),
            heartbeat_interval: Some(Duration::from_secs(30)),
            offline: OfflinePolicy::Queue,
            queue_capacity: 10_000,
        }
    }
}

struct Outbox {
    /// Present exactly while the connection is open.
    writer: Option<mpsc::UnboundedSender<String>>,
    queue: OutboundQueue,
}

pub struct Connection {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    /// Authoritative state; the observables below mirror it.
    phase: Mutex<ConnectionState>,
    state: Observable<ConnectionState>,
    connected: Observable<bool>,
    outbox: Mutex<Outbox>,
    attempts: AtomicU64,
}

impl Connection {
    pub fn new(settings: ConnectionSettings, connector: Arc<dyn Connector>) -> Self {
        let queue = OutboundQueue::new(settings.queue_capacity);
        Self {
            settings,
            connector,
            phase: Mutex::new(ConnectionState::Closed),
            state: Observable::new(ConnectionState::Closed),
            connected: Observable::new(false),
            outbox: Mutex::new(Outbox {
                writer: None,
                queue,
            }),
            attempts: AtomicU64::new(0),
        }
    }

    /// Begin connecting in the background.
    ///
    /// Returns `Ok(false)` without doing anything if the connection is
    /// already open or connecting. Must be called within a tokio runtime.
    pub fn start(self: &Arc<Self>, handler: Arc<dyn InboundHandler>) -> Result<bool, SyncError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        if !self.begin_connecting() {
            log::info!("Connection to {} already {}", self.settings.url, self.state());
            return Ok(false);
        }
        runtime.spawn(Arc::clone(self).run(handler));
        Ok(true)
    }

    /// Write `frame` if open; otherwise queue or drop it per the offline
    /// policy. `key` identifies the store for queue coalescing.
    pub fn send(&self, key: &str, frame: String) -> SendOutcome {
        let mut outbox = lock(&self.outbox);
        let frame = match &outbox.writer {
            Some(writer) => match writer.send(frame) {
                Ok(()) => return SendOutcome::Sent,
                // Task is between close and state flip.
                Err(mpsc::error::SendError(frame)) => frame,
            },
            None => frame,
        };

        match self.settings.offline {
            OfflinePolicy::Drop => {
                log::debug!("Not connected, dropping update for '{key}'");
                SendOutcome::Dropped
            }
            OfflinePolicy::Queue => match outbox.queue.enqueue(key, frame) {
                Enqueued::Full => {
                    log::warn!(
                        "Offline queue full ({} frames), dropping update for '{key}'",
                        outbox.queue.capacity()
                    );
                    SendOutcome::Dropped
                }
                Enqueued::Added | Enqueued::Replaced => SendOutcome::Queued,
            },
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.phase)
    }

    /// Observable connection state.
    pub fn state_observable(&self) -> &Observable<ConnectionState> {
        &self.state
    }

    /// Observable `state == Open`.
    pub fn connected(&self) -> &Observable<bool> {
        &self.connected
    }

    /// Connect attempts so far, failed ones included.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Frames waiting for the next open.
    pub fn queued_len(&self) -> usize {
        lock(&self.outbox).queue.len()
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Connection task
    // -----------------------------------------------------------------------

    async fn run(self: Arc<Self>, handler: Arc<dyn InboundHandler>) {
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            log::info!("Connecting to {} (attempt {attempt})", self.settings.url);

            match self.connector.connect(&self.settings.url).await {
                Ok(duplex) => self.serve(duplex, handler.as_ref()).await,
                Err(e) => log::warn!("Connection to {} failed: {e}", self.settings.url),
            }

            self.transition(ConnectionState::Closed);
            handler.on_close();

            log::info!(
                "Reconnecting to {} in {}ms",
                self.settings.url,
                self.settings.reconnect_delay.as_millis()
            );
            tokio::time::sleep(self.settings.reconnect_delay).await;

            // Someone may have called start() while we slept.
            if !self.begin_connecting() {
                break;
            }
        }
    }

    async fn serve(&self, duplex: Duplex, handler: &dyn InboundHandler) {
        let Duplex {
            mut sink,
            mut stream,
        } = duplex;
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        // Queued frames go into the channel before the writer is visible,
        // so they precede anything sent after the flip.
        let replayed = {
            let mut outbox = lock(&self.outbox);
            let queued = outbox.queue.drain();
            let replayed = queued.len();
            for frame in queued {
                let _ = out_tx.send(frame);
            }
            outbox.writer = Some(out_tx);
            replayed
        };
        if replayed > 0 {
            log::info!("Replaying {replayed} queued updates");
        }

        self.transition(ConnectionState::Open);
        handler.on_open();

        let mut heartbeat = self
            .settings
            .heartbeat_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(frame)) => handler.on_frame(&frame),
                    Some(Err(e)) => {
                        log::warn!("Connection to {} errored: {e}", self.settings.url);
                        break;
                    }
                    None => {
                        log::info!("Connection to {} closed by peer", self.settings.url);
                        break;
                    }
                },
                Some(frame) = out_rx.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        log::warn!("Send to {} failed: {e}", self.settings.url);
                        break;
                    }
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    log::trace!("Heartbeat to {}", self.settings.url);
                    if let Err(e) = sink.send(HEARTBEAT_FRAME.to_string()).await {
                        log::warn!("Heartbeat to {} failed: {e}", self.settings.url);
                        break;
                    }
                }
            }
        }

        lock(&self.outbox).writer = None;
        let _ = sink.close().await;
    }

    /// Closed → Connecting, atomically. False if not closed.
    fn begin_connecting(&self) -> bool {
        {
            let mut phase = lock(&self.phase);
            if *phase != ConnectionState::Closed {
                return false;
            }
            *phase = ConnectionState::Connecting;
        }
        self.publish(ConnectionState::Connecting);
        true
    }

    fn transition(&self, next: ConnectionState) {
        *lock(&self.phase) = next;
        self.publish(next);
    }

    fn publish(&self, state: ConnectionState) {
        log::info!("Connection to {} is {state}", self.settings.url);
        self.state.set_if_changed(state);
        self.connected.set_if_changed(state == ConnectionState::Open);
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
