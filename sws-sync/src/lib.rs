//! # sws-sync: socket-synced stores
//!
//! Keeps local, observable copies of named values in sync with a remote
//! peer over a reconnecting WebSocket, and sends local edits back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  set   ┌─────────────┐  frame   ┌─────────────┐
//! │ Store /     │ ─────► │ Protocol    │ ───────► │ Connection  │ ◄──► peer
//! │ PathStore   │        │ (Routing)   │          │ (+ queue)   │
//! └──────▲──────┘        └──────▲──────┘          └──────┬──────┘
//!        │ set_locally          │ route                  │ inbound frame
//!        │                      └────────────────────────┘
//! ┌──────┴──────┐
//! │ Registry /  │  one store per key, or one document + path views
//! │ Document    │
//! └─────────────┘
//! ```
//!
//! Remote updates are applied with `set_locally`, which notifies
//! subscribers but never sends, so nothing is echoed back to the peer.
//!
//! ## Modules
//!
//! - [`path`]: read/write nested JSON values by path
//! - [`observable`]: current value + subscribers
//! - [`store`] / [`registry`]: keyed stores, one instance per key
//! - [`document`]: single shared document with path-addressed stores
//! - [`protocol`]: wire messages, value coercion and routing
//! - [`queue`]: offline queue, coalesced per key
//! - [`transport`]: WebSocket and in-memory connectors
//! - [`connection`]: reconnecting connection state machine
//! - [`config`]: [`SyncConfig`]
//! - [`engine`]: [`SyncEngine`], everything wired together
//! - [`global`]: optional process-wide engine
//!
//! ## Example
//!
//! ```no_run
//! use sws_sync::{SyncConfig, SyncEngine};
//!
//! # async fn run() -> Result<(), sws_sync::SyncError> {
//! let engine = SyncEngine::new(SyncConfig::for_host("192.168.1.20"))?;
//! engine.start()?;
//!
//! let press = engine.booleans()?.get_or_default("btn1.press");
//! let _sub = press.subscribe(|pressed| println!("pressed: {pressed}"));
//! press.set(true);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod document;
pub mod engine;
pub mod error;
pub mod global;
pub mod observable;
pub mod path;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use config::{SyncConfig, DEFAULT_PORT};
pub use connection::{
    Connection, ConnectionSettings, ConnectionState, InboundHandler, OfflinePolicy, SendOutcome,
};
pub use document::{Document, PathPropagator, PathStore};
pub use engine::{SyncEngine, SyncEvent};
pub use error::{ConfigError, PathError, ProtocolError, SyncError, TransportError};
pub use observable::{Observable, Subscription};
pub use path::{
    get_at_path, parse_path, path_key, set_at_path, Path, PathStep, MAX_ARRAY_PADDING,
};
pub use protocol::{
    Addressing, Dispatch, IgnoreReason, Message, Routing, Scope, ValueKind, WireValue,
};
pub use queue::{Enqueued, OutboundQueue};
pub use registry::{StoreRegistry, Stores};
pub use store::{no_propagation, Propagator, Store};
pub use transport::{
    Connector, Duplex, MemoryConnector, MemoryListener, MemoryPeer, WebSocketConnector,
};
