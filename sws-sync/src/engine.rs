//! The sync engine: stores, document, protocol and connection wired
//! together behind one configuration.
//!
//! ```text
//!  Store::set ─▶ notify ─▶ Routing::*_message ─▶ encode ─▶ Connection::send
//!                                                              │
//!                                                  open ◀──────┴──────▶ queue / drop
//!
//!  frame ─▶ Message::decode ─▶ Routing::route ─▶ set_locally ─▶ notify
//!                                    │
//!                                    └─▶ Dispatch::Ignored (heartbeat, other peer)
//! ```

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::SyncConfig;
use crate::connection::{Connection, ConnectionState, InboundHandler};
use crate::document::{Document, PathPropagator, PathStore};
use crate::error::{ProtocolError, SyncError};
use crate::observable::Observable;
use crate::path::{path_key, PathStep};
use crate::protocol::{
    Address, Addressing, Dispatch, Message, Routing, ValueKind, WireValue,
};
use crate::registry::Stores;
use crate::store::Propagator;
use crate::transport::{Connector, WebSocketConnector};

/// Capacity of the event channel; slow receivers see `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection opened (queue already flushed)
    Connected,
    /// Connection closed or a connect attempt failed
    Disconnected,
    /// A remote update was applied locally
    RemoteUpdate { key: String, value: Option<Value> },
    /// An inbound frame could not be applied
    Rejected { reason: String },
}

struct EngineInner {
    config: SyncConfig,
    connection: Arc<Connection>,
    booleans: Stores<bool>,
    numbers: Stores<f64>,
    strings: Stores<String>,
    objects: Stores<Value>,
    document: Arc<Document>,
    /// Store ids are logged on the first open only.
    announced: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

/// A cheaply cloneable handle to one engine instance.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("server_url", &self.inner.config.server_url)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl SyncEngine {
    /// Engine talking WebSocket to `config.server_url`. Not started.
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Engine using a custom transport.
    pub fn with_connector(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let connection = Arc::new(Connection::new(config.connection_settings(), connector));
        let routing = &config.routing;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = EngineInner {
            booleans: Stores::new(false, flat_propagator(&connection, routing)),
            numbers: Stores::new(0.0, flat_propagator(&connection, routing)),
            strings: Stores::new(String::new(), flat_propagator(&connection, routing)),
            objects: Stores::new(Value::Null, flat_propagator(&connection, routing)),
            document: Arc::new(Document::new()),
            announced: AtomicBool::new(false),
            events,
            connection,
            config,
        };
        log::info!(
            "Sync engine for {} ({} addressing, routing {:?})",
            inner.config.server_url,
            inner.config.addressing.as_str(),
            inner.config.routing
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Start the background connection.
    ///
    /// Idempotent: returns `Ok(false)` if already open or connecting.
    pub fn start(&self) -> Result<bool, SyncError> {
        let handler: Arc<dyn InboundHandler> = self.inner.clone();
        self.inner.connection.start(handler)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.inner.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Observable connection state.
    pub fn state(&self) -> &Observable<ConnectionState> {
        self.inner.connection.state_observable()
    }

    /// Observable `true` while open.
    pub fn connected(&self) -> &Observable<bool> {
        self.inner.connection.connected()
    }

    pub fn booleans(&self) -> Result<&Stores<bool>, SyncError> {
        self.require(Addressing::Flat)?;
        Ok(&self.inner.booleans)
    }

    pub fn numbers(&self) -> Result<&Stores<f64>, SyncError> {
        self.require(Addressing::Flat)?;
        Ok(&self.inner.numbers)
    }

    pub fn strings(&self) -> Result<&Stores<String>, SyncError> {
        self.require(Addressing::Flat)?;
        Ok(&self.inner.strings)
    }

    pub fn objects(&self) -> Result<&Stores<Value>, SyncError> {
        self.require(Addressing::Flat)?;
        Ok(&self.inner.objects)
    }

    /// Store for `path` in the shared document.
    ///
    /// `default` is written (locally) only if the path is undefined.
    /// Views are keyed by their steps: `["a.b"]` and `["a", "b"]` are
    /// different stores.
    pub fn store(&self, path: &[PathStep], default: Option<Value>) -> Result<PathStore, SyncError> {
        self.require(Addressing::Path)?;
        let store = PathStore::open(
            &self.inner.document,
            path,
            default,
            path_propagator(&self.inner.connection, &self.inner.config.routing),
            self.inner.config.strict_values,
        )?;
        Ok(store)
    }

    /// The shared document (path addressing).
    pub fn document(&self) -> &Arc<Document> {
        &self.inner.document
    }

    /// Receiver for [`SyncEvent`]s sent from now on.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Keys of every store created so far, sorted.
    pub fn store_ids(&self) -> Vec<String> {
        self.inner.store_ids()
    }

    /// Apply one inbound frame as if it arrived on the connection.
    pub fn handle_frame(&self, frame: &str) -> Result<Dispatch, ProtocolError> {
        self.inner.handle_frame(frame)
    }

    /// Whether both handles are the same engine.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    fn require(&self, requested: Addressing) -> Result<(), SyncError> {
        let configured = self.inner.config.addressing;
        if configured != requested {
            return Err(SyncError::WrongAddressing {
                configured: configured.as_str(),
                requested: requested.as_str(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

fn flat_propagator<T: WireValue>(connection: &Arc<Connection>, routing: &Routing) -> Propagator<T> {
    let connection = Arc::clone(connection);
    let routing = routing.clone();
    Arc::new(move |key: &str, value: &T| {
        let message = routing.flat_message(key, T::KIND, value.to_json());
        send(&connection, &format!("{}/{key}", T::KIND), &message);
    })
}

fn path_propagator(connection: &Arc<Connection>, routing: &Routing) -> PathPropagator {
    let connection = Arc::clone(connection);
    let routing = routing.clone();
    Arc::new(move |path: &[PathStep], value: &Option<Value>| {
        let message = routing.path_message(path, value.clone());
        send(&connection, &path_key(path), &message);
    })
}

fn send(connection: &Connection, queue_key: &str, message: &Message) {
    match message.encode() {
        Ok(frame) => {
            let outcome = connection.send(queue_key, frame);
            log::debug!("Update '{queue_key}': {outcome:?}");
        }
        Err(e) => log::warn!("Could not encode update '{queue_key}': {e}"),
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

impl EngineInner {
    fn handle_frame(&self, frame: &str) -> Result<Dispatch, ProtocolError> {
        let message = Message::decode(frame)?;
        let address = match self.config.routing.route(&message, self.config.addressing) {
            Ok(address) => address,
            Err(reason) => return Ok(Dispatch::Ignored(reason)),
        };

        let key = match address {
            Address::Id(id) => {
                let value = message.value.as_ref().ok_or_else(|| ProtocolError::MissingField {
                    key: id.clone(),
                    field: "value",
                })?;
                match message.kind.unwrap_or_else(|| ValueKind::of(value)) {
                    ValueKind::Boolean => apply(&self.booleans, &id, value),
                    ValueKind::Number => apply(&self.numbers, &id, value),
                    ValueKind::String => apply(&self.strings, &id, value),
                    ValueKind::Object => apply(&self.objects, &id, value),
                }
                id
            }
            Address::Path(path) => {
                self.document.set(&path, message.value.clone())?;
                path_key(&path)
            }
        };

        let _ = self.events.send(SyncEvent::RemoteUpdate {
            key: key.clone(),
            value: message.value,
        });
        Ok(Dispatch::Applied { key })
    }

    fn store_ids(&self) -> Vec<String> {
        match self.config.addressing {
            Addressing::Path => self.document.keys(),
            Addressing::Flat => {
                let mut ids: Vec<String> = self
                    .booleans
                    .keys()
                    .into_iter()
                    .chain(self.numbers.keys())
                    .chain(self.strings.keys())
                    .chain(self.objects.keys())
                    .collect();
                ids.sort();
                ids.dedup();
                ids
            }
        }
    }
}

/// Remote-origin write: coerce and notify, never propagate.
fn apply<T: WireValue>(stores: &Stores<T>, key: &str, value: &Value) {
    stores.get_or_default(key).set_locally(T::coerce(value));
}

impl InboundHandler for EngineInner {
    fn on_frame(&self, frame: &str) {
        match self.handle_frame(frame) {
            Ok(Dispatch::Applied { key }) => log::debug!("Applied remote update '{key}'"),
            Ok(Dispatch::Ignored(reason)) => log::trace!("Ignored message ({reason}): {frame}"),
            Err(e) => {
                log::warn!("Dropped inbound message: {e}");
                let _ = self.events.send(SyncEvent::Rejected {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_open(&self) {
        if !self.announced.swap(true, Ordering::SeqCst) {
            log::debug!("Store ids: {:?}", self.store_ids());
        }
        let _ = self.events.send(SyncEvent::Connected);
    }

    fn on_close(&self) {
        let _ = self.events.send(SyncEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parse_path;
    use crate::protocol::IgnoreReason;
    use crate::transport::MemoryConnector;
    use serde_json::json;

    fn engine(config: SyncConfig) -> SyncEngine {
        let (connector, _listener) = MemoryConnector::new();
        SyncEngine::with_connector(config, Arc::new(connector)).unwrap()
    }

    fn flat() -> SyncConfig {
        SyncConfig::new("ws://control.local:50080")
    }

    fn path() -> SyncConfig {
        SyncConfig {
            addressing: Addressing::Path,
            ..flat()
        }
    }

    #[test]
    fn test_invalid_config_refused() {
        let (connector, _listener) = MemoryConnector::new();
        let err = SyncEngine::with_connector(SyncConfig::default(), Arc::new(connector)).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_addressing_enforced() {
        let flat_engine = engine(flat());
        assert!(flat_engine.booleans().is_ok());
        assert!(matches!(
            flat_engine.store(&parse_path("a"), None),
            Err(SyncError::WrongAddressing {
                configured: "flat",
                requested: "path"
            })
        ));

        let path_engine = engine(path());
        assert!(path_engine.store(&parse_path("a"), None).is_ok());
        assert!(path_engine.numbers().is_err());
    }

    #[test]
    fn test_typed_inbound_coerces_into_registry() {
        let engine = engine(flat());
        let dispatch = engine
            .handle_frame(r#"{"id":"level","type":"integer","value":"0.5"}"#)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Applied { key: "level".into() });
        assert_eq!(engine.numbers().unwrap().get_or_default("level").get(), 0.5);
        assert!(engine.strings().unwrap().lookup("level").is_none());
    }

    #[test]
    fn test_untyped_inbound_infers_registry() {
        let engine = engine(flat());
        engine.handle_frame(r#"{"id":"on","value":true}"#).unwrap();
        engine.handle_frame(r#"{"id":"name","value":"A"}"#).unwrap();
        engine.handle_frame(r#"{"id":"cfg","value":{"x":1}}"#).unwrap();
        assert!(engine.booleans().unwrap().get_or_default("on").get());
        assert_eq!(engine.strings().unwrap().get_or_default("name").get(), "A");
        assert_eq!(engine.objects().unwrap().get_or_default("cfg").get(), json!({"x": 1}));
        assert_eq!(engine.store_ids(), vec!["cfg", "name", "on"]);
    }

    #[test]
    fn test_inbound_without_value_is_malformed() {
        let engine = engine(flat());
        let err = engine.handle_frame(r#"{"id":"x","type":"boolean"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { field: "value", .. }));
        assert!(engine.handle_frame("[").is_err());
    }

    #[test]
    fn test_remote_update_is_not_echoed() {
        let engine = engine(flat());
        let store = engine.booleans().unwrap().get_or_default("btn1.press");
        engine
            .handle_frame(r#"{"id":"btn1.press","type":"boolean","value":true}"#)
            .unwrap();
        assert!(store.get());
        assert_eq!(engine.connection().queued_len(), 0);

        store.set(false);
        assert_eq!(engine.connection().queued_len(), 1);
    }

    #[test]
    fn test_path_inbound_replaces_document() {
        let engine = engine(path());
        let fader = engine.store(&parse_path("faders.0"), None).unwrap();
        engine
            .handle_frame(r#"{"path":["faders",0],"value":0.25}"#)
            .unwrap();
        assert_eq!(fader.get(), Some(json!(0.25)));
        assert_eq!(engine.document().snapshot(), Some(json!({"faders": [0.25]})));

        // Undefined from the wire nulls an array slot and removes a key.
        let mode = engine.store(&parse_path("mode"), Some(json!("live"))).unwrap();
        engine.handle_frame(r#"{"path":["faders",0]}"#).unwrap();
        engine.handle_frame(r#"{"path":["mode"]}"#).unwrap();
        assert_eq!(fader.get(), Some(Value::Null));
        assert_eq!(mode.get(), None);
        assert_eq!(engine.connection().queued_len(), 0);
    }

    #[test]
    fn test_path_inbound_with_huge_index_is_rejected() {
        let engine = engine(path());
        let list = engine.store(&parse_path("list"), Some(json!([1]))).unwrap();

        for frame in [
            r#"{"path":[18446744073709551615],"value":1}"#,
            r#"{"path":["list",4000000000],"value":1}"#,
        ] {
            let err = engine.handle_frame(frame).unwrap_err();
            assert!(matches!(err, ProtocolError::Path(_)), "{frame}: {err}");
        }
        assert_eq!(engine.document().snapshot(), Some(json!({"list": [1]})));

        engine
            .handle_frame(r#"{"path":["list",1],"value":2}"#)
            .unwrap();
        assert_eq!(list.get(), Some(json!([1, 2])));
    }

    #[test]
    fn test_path_messages_ignored_by_flat_engine() {
        let engine = engine(flat());
        assert_eq!(
            engine.handle_frame(r#"{"path":["a"],"value":1}"#).unwrap(),
            Dispatch::Ignored(IgnoreReason::MissingAddress)
        );
    }

    #[test]
    fn test_strict_path_store_refuses_undefined() {
        let engine = engine(path());
        let store = engine.store(&parse_path("a"), Some(json!(1))).unwrap();
        assert!(matches!(store.set(None), Err(SyncError::UndefinedValue { .. })));
        assert_eq!(engine.connection().queued_len(), 0);

        let lenient = self::engine(SyncConfig {
            strict_values: false,
            ..path()
        });
        let store = lenient.store(&parse_path("a"), Some(json!(1))).unwrap();
        store.set(None).unwrap();
        assert_eq!(lenient.connection().queued_len(), 1);
    }

    #[tokio::test]
    async fn test_events_report_remote_updates() {
        let engine = engine(flat());
        let mut events = engine.events();
        engine.handle_frame(r#"{"id":"n","value":2}"#).unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::RemoteUpdate {
                key: "n".into(),
                value: Some(json!(2))
            }
        );
    }
}
