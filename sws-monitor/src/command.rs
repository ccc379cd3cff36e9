//! Console commands.
//!
//! ```text
//! set  <bool|num|str|obj> <key> <value>
//! set  path <a.0.b> <json|undefined>
//! get  <bool|num|str|obj> <key>
//! get  path <a.0.b>
//! watch <bool|num|str|obj> <key>
//! watch path <a.0.b>
//! ids | state | help
//! ```

use serde_json::Value;
use sws_sync::{parse_path, Path, ValueKind};

/// Store a command refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Flat { kind: ValueKind, key: String },
    Path(Path),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { target: Target, value: Option<Value> },
    Get(Target),
    Watch(Target),
    Ids,
    State,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("unknown store kind '{0}' (bool, num, str, obj, path)")]
    UnknownKind(String),

    #[error("missing {0}")]
    Missing(&'static str),

    #[error("invalid {kind} value '{input}'")]
    InvalidValue { kind: &'static str, input: String },
}

pub const HELP: &str = "\
set <bool|num|str|obj> <key> <value>   local edit, sent to the peer
set path <a.0.b> <json|undefined>      edit the shared document
get <kind> <key> | get path <a.0.b>    print the current value
watch <kind> <key> | watch path <p>    log every change
ids                                    list created stores
state                                  connection state";

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (verb, rest) = split_word(line);
        match verb {
            "" => Err(CommandError::Empty),
            "ids" => Ok(Command::Ids),
            "state" => Ok(Command::State),
            "help" | "?" => Ok(Command::Help),
            "get" => Ok(Command::Get(parse_target(rest)?.0)),
            "watch" => Ok(Command::Watch(parse_target(rest)?.0)),
            "set" => {
                let (target, raw) = parse_target(rest)?;
                if raw.is_empty() && !matches!(target, Target::Flat { kind: ValueKind::String, .. }) {
                    return Err(CommandError::Missing("value"));
                }
                let value = parse_value(&target, raw)?;
                Ok(Command::Set { target, value })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// First whitespace-separated word and the trimmed remainder.
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn parse_target(input: &str) -> Result<(Target, &str), CommandError> {
    let (kind, rest) = split_word(input);
    let (address, rest) = split_word(rest);
    if kind.is_empty() {
        return Err(CommandError::Missing("store kind"));
    }
    if address.is_empty() {
        return Err(CommandError::Missing("key"));
    }
    let target = match kind {
        "bool" => flat(ValueKind::Boolean, address),
        "num" => flat(ValueKind::Number, address),
        "str" => flat(ValueKind::String, address),
        "obj" => flat(ValueKind::Object, address),
        "path" => Target::Path(parse_path(address)),
        other => return Err(CommandError::UnknownKind(other.to_string())),
    };
    Ok((target, rest))
}

fn flat(kind: ValueKind, key: &str) -> Target {
    Target::Flat {
        kind,
        key: key.to_string(),
    }
}

fn parse_value(target: &Target, raw: &str) -> Result<Option<Value>, CommandError> {
    let invalid = |kind: &'static str| CommandError::InvalidValue {
        kind,
        input: raw.to_string(),
    };
    let value = match target {
        Target::Flat {
            kind: ValueKind::Boolean,
            ..
        } => match raw {
            "true" | "1" | "on" => Value::Bool(true),
            "false" | "0" | "off" => Value::Bool(false),
            _ => return Err(invalid("boolean")),
        },
        Target::Flat {
            kind: ValueKind::Number,
            ..
        } => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid("number"))?,
        Target::Flat {
            kind: ValueKind::String,
            ..
        } => Value::String(raw.to_string()),
        Target::Flat {
            kind: ValueKind::Object,
            ..
        } => serde_json::from_str(raw).map_err(|_| invalid("json"))?,
        Target::Path(_) if raw == "undefined" => return Ok(None),
        Target::Path(_) => serde_json::from_str(raw).map_err(|_| invalid("json"))?,
    };
    Ok(Some(value))
}
