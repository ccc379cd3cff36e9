//! JSON wire protocol and message routing.
//!
//! Every frame is one JSON object:
//! ```text
//! { "scope": "tp1" | ["tp1", "global"],     optional
//!   "id":    "btn1.press"                   flat addressing
//!   "path":  ["faders", 0, "level"]         path addressing
//!   "type":  "boolean" | "number" | "string" | "object"
//!   "value": <any json> }                   optional
//! ```
//!
//! `{}` is the heartbeat frame and is never dispatched.
//!
//! [`Routing`] decides both halves of the exchange: how an outbound message
//! is stamped with the local identity, and whether an inbound message is
//! addressed to this peer at all.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ProtocolError;
use crate::path::{Path, PathStep};

/// Scope token that every receiver accepts.
pub const GLOBAL_SCOPE: &str = "global";

/// Id prefix that every receiver accepts under prefix routing.
pub const GLOBAL_ID_PREFIX: &str = "global.";

/// Keep-alive frame sent while the connection is open.
pub const HEARTBEAT_FRAME: &str = "{}";

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Sender scope: one token or a list of tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scope {
    One(String),
    Many(Vec<String>),
}

impl Scope {
    pub fn contains(&self, token: &str) -> bool {
        match self {
            Scope::One(scope) => scope == token,
            Scope::Many(scopes) => scopes.iter().any(|scope| scope == token),
        }
    }
}

impl From<&str> for Scope {
    fn from(scope: &str) -> Self {
        Scope::One(scope.to_string())
    }
}

/// Registry selector carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Boolean,
    #[serde(alias = "integer")]
    Number,
    String,
    Object,
}

impl ValueKind {
    /// Registry a tag-less value belongs to.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Null | Value::Array(_) | Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire message.
///
/// `value` distinguishes an explicit `null` (`Some(Value::Null)`) from an
/// absent field (`None`, i.e. undefined).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    /// Flat update for one registry key.
    pub fn flat(id: impl Into<String>, kind: ValueKind, value: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind: Some(kind),
            value: Some(value),
            ..Self::default()
        }
    }

    /// Path update into the shared document. `None` sends no `value` field.
    pub fn at_path(path: Path, value: Option<Value>) -> Self {
        Self {
            path: Some(path),
            value,
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// A message carrying nothing at all (`{}`).
    pub fn is_heartbeat(&self) -> bool {
        *self == Self::default()
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Value coercion
// ---------------------------------------------------------------------------

/// A store value type that can cross the wire.
///
/// `coerce` converts whatever JSON arrived into this type the way a loosely
/// typed peer would (`Boolean(v)`, `Number(v)`, `String(v)`), so a sloppy
/// sender can never put a store into an unrepresentable state.
pub trait WireValue: Clone + PartialEq + Send + Sync + 'static {
    const KIND: ValueKind;

    fn to_json(&self) -> Value;

    fn coerce(value: &Value) -> Self;
}

impl WireValue for bool {
    const KIND: ValueKind = ValueKind::Boolean;

    fn to_json(&self) -> Value {
        Value::Bool(*self)
    }

    fn coerce(value: &Value) -> Self {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl WireValue for f64 {
    const KIND: ValueKind = ValueKind::Number;

    /// Integral values go out as JSON integers; NaN and infinities as `null`.
    fn to_json(&self) -> Value {
        const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
        if self.fract() == 0.0 && self.abs() <= MAX_SAFE_INTEGER {
            Value::from(*self as i64)
        } else {
            serde_json::Number::from_f64(*self).map_or(Value::Null, Value::Number)
        }
    }

    fn coerce(value: &Value) -> Self {
        match value {
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            Value::String(s) => parse_number(s),
            Value::Array(items) => match items.as_slice() {
                [] => 0.0,
                [only] => parse_number(&String::coerce(only)),
                _ => f64::NAN,
            },
            Value::Object(_) => f64::NAN,
        }
    }
}

fn parse_number(text: &str) -> f64 {
    let text = text.trim();
    match text {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust also accepts "inf" and "nan", which are not numbers here.
        _ if text.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') => f64::NAN,
        _ => text.parse().unwrap_or(f64::NAN),
    }
}

impl WireValue for String {
    const KIND: ValueKind = ValueKind::String;

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }

    fn coerce(value: &Value) -> Self {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => i.to_string(),
                (_, Some(u), _) => u.to_string(),
                (_, _, Some(f)) => f.to_string(),
                _ => n.to_string(),
            },
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Null => String::new(),
                    other => String::coerce(other),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
        }
    }
}

impl WireValue for Value {
    const KIND: ValueKind = ValueKind::Object;

    fn to_json(&self) -> Value {
        self.clone()
    }

    fn coerce(value: &Value) -> Self {
        value.clone()
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// How stores are addressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    /// One message per key, four typed registries.
    #[default]
    Flat,
    /// One shared document, messages carry a path.
    Path,
}

impl Addressing {
    pub fn as_str(self) -> &'static str {
        match self {
            Addressing::Flat => "flat",
            Addressing::Path => "path",
        }
    }
}

/// Local identity used to stamp outbound and filter inbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Routing {
    /// Accept everything, stamp nothing.
    #[default]
    None,
    /// Stamp `scope`; accept unscoped, `global` and own-scope messages.
    Scope { local_scope: String },
    /// Prefix ids with `local_prefix`; accept `local_prefix` and `global.`
    /// ids with the prefix stripped.
    Prefix { local_prefix: String },
}

/// Where an accepted inbound message applies, already made local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Id(String),
    Path(Path),
}

impl Routing {
    /// Outbound message for a flat registry key.
    pub fn flat_message(&self, key: &str, kind: ValueKind, value: Value) -> Message {
        match self {
            Routing::None => Message::flat(key, kind, value),
            Routing::Scope { local_scope } => {
                Message::flat(key, kind, value).with_scope(local_scope.as_str())
            }
            Routing::Prefix { local_prefix } => {
                Message::flat(format!("{local_prefix}{key}"), kind, value)
            }
        }
    }

    /// Outbound message for a document path.
    pub fn path_message(&self, path: &[PathStep], value: Option<Value>) -> Message {
        match self {
            Routing::None => Message::at_path(path.to_vec(), value),
            Routing::Scope { local_scope } => {
                Message::at_path(path.to_vec(), value).with_scope(local_scope.as_str())
            }
            Routing::Prefix { local_prefix } => {
                let mut prefixed = Vec::with_capacity(path.len() + 1);
                prefixed.push(PathStep::from(prefix_step(local_prefix)));
                prefixed.extend_from_slice(path);
                Message::at_path(prefixed, value)
            }
        }
    }

    /// Decide whether `message` is addressed to this peer and, if so, where
    /// it applies.
    pub fn route(&self, message: &Message, addressing: Addressing) -> Result<Address, IgnoreReason> {
        if message.is_heartbeat() {
            return Err(IgnoreReason::Heartbeat);
        }
        if !self.accepts_scope(message.scope.as_ref()) {
            return Err(IgnoreReason::OutOfScope);
        }
        match addressing {
            Addressing::Flat => {
                let id = message.id.as_deref().ok_or(IgnoreReason::MissingAddress)?;
                self.local_id(id)
                    .map(|id| Address::Id(id.to_string()))
                    .ok_or(IgnoreReason::OutOfScope)
            }
            Addressing::Path => {
                let path = message.path.as_deref().ok_or(IgnoreReason::MissingAddress)?;
                self.local_path(path)
                    .map(Address::Path)
                    .ok_or(IgnoreReason::OutOfScope)
            }
        }
    }

    /// Scope filter. Only scope routing looks at the field.
    pub fn accepts_scope(&self, scope: Option<&Scope>) -> bool {
        match (self, scope) {
            (Routing::Scope { local_scope }, Some(scope)) => {
                scope.contains(GLOBAL_SCOPE) || scope.contains(local_scope)
            }
            _ => true,
        }
    }

    /// Id with the routing prefix stripped, or `None` if it is not ours.
    pub fn local_id<'a>(&self, id: &'a str) -> Option<&'a str> {
        match self {
            Routing::Prefix { local_prefix } => id
                .strip_prefix(local_prefix.as_str())
                .or_else(|| id.strip_prefix(GLOBAL_ID_PREFIX)),
            _ => Some(id),
        }
    }

    /// Path with the routing prefix removed, or `None` if it is not ours.
    ///
    /// The prefix may arrive either as its own leading step (`["tp1", "a"]`)
    /// or glued to the first key (`["tp1.a"]`).
    pub fn local_path(&self, path: &[PathStep]) -> Option<Path> {
        let Routing::Prefix { local_prefix } = self else {
            return Some(path.to_vec());
        };
        let (first, rest) = path.split_first()?;
        let PathStep::Key(first) = first else {
            return None;
        };

        for prefix in [local_prefix.as_str(), GLOBAL_ID_PREFIX] {
            if first == prefix_step(prefix) {
                return Some(rest.to_vec());
            }
            if let Some(remainder) = first.strip_prefix(prefix).filter(|r| !r.is_empty()) {
                let mut local = Vec::with_capacity(path.len());
                local.push(PathStep::from(remainder));
                local.extend_from_slice(rest);
                return Some(local);
            }
        }
        None
    }
}

/// `"tp1."` as a single path step: `"tp1"`.
fn prefix_step(prefix: &str) -> &str {
    prefix.strip_suffix('.').unwrap_or(prefix)
}

/// Outcome of handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The value was applied to the store or document location `key`.
    Applied { key: String },
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `{}` keep-alive.
    Heartbeat,
    /// No `id` (flat) or no `path` (path addressing).
    MissingAddress,
    /// Another peer's scope or prefix.
    OutOfScope,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IgnoreReason::Heartbeat => "heartbeat",
            IgnoreReason::MissingAddress => "no address",
            IgnoreReason::OutOfScope => "not addressed to this peer",
        })
    }
}
