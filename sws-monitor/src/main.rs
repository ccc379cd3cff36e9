//! sws-monitor: console peer for a state-sync server.
//!
//! Connects with the configured routing, logs connection changes and
//! every remote update, and applies commands typed on stdin:
//!
//! ```text
//! stdin ──► Command::parse ──► Store::set / PathStore::set ──► server
//! server ──► SyncEngine ──► SyncEvent ──► log
//! ```

mod command;
mod settings;

use clap::Parser;
use log::{error, info, warn};
use serde_json::Value;
use sws_sync::{
    path_key, Stores, Subscription, SyncEngine, SyncError, SyncEvent, ValueKind, WireValue,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use command::{Command, Target, HELP};
use settings::Cli;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting sws-monitor...");

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    info!(
        "Server {} (routing: {:?}, addressing: {})",
        config.server_url,
        config.routing,
        config.addressing.as_str()
    );

    let engine = match SyncEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to create engine: {e}");
            std::process::exit(2);
        }
    };

    let _state_log = engine
        .state()
        .subscribe(|state| info!("Connection state: {state}"));
    tokio::spawn(log_events(engine.clone()));

    if let Err(e) = engine.start() {
        error!("Failed to start: {e}");
        std::process::exit(1);
    }

    let mut watches: Vec<Subscription> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => run_line(&engine, &line, &mut watches),
                Ok(None) => {
                    info!("stdin closed; monitoring until Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin: {e}");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }
}

async fn log_events(engine: SyncEngine) {
    let mut events = engine.events();
    loop {
        match events.recv().await {
            Ok(SyncEvent::Connected) => info!("Connected"),
            Ok(SyncEvent::Disconnected) => info!("Disconnected"),
            Ok(SyncEvent::RemoteUpdate { key, value }) => match value {
                Some(value) => info!("{key} <- {value}"),
                None => info!("{key} <- undefined"),
            },
            Ok(SyncEvent::Rejected { reason }) => warn!("Rejected frame: {reason}"),
            Err(RecvError::Lagged(n)) => warn!("Event log skipped {n} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn run_line(engine: &SyncEngine, line: &str, watches: &mut Vec<Subscription>) {
    if line.trim().is_empty() {
        return;
    }
    let result = match Command::parse(line) {
        Ok(command) => execute(engine, command, watches),
        Err(e) => {
            warn!("{e}");
            return;
        }
    };
    if let Err(e) = result {
        warn!("{e}");
    }
}

fn execute(
    engine: &SyncEngine,
    command: Command,
    watches: &mut Vec<Subscription>,
) -> Result<(), SyncError> {
    match command {
        Command::Help => println!("{HELP}"),
        Command::State => println!(
            "{} (attempts: {}, queued: {})",
            engine.connection_state(),
            engine.connection().connect_attempts(),
            engine.connection().queued_len()
        ),
        Command::Ids => {
            for id in engine.store_ids() {
                println!("{id}");
            }
        }
        Command::Set {
            target: Target::Path(path),
            value,
        } => engine.store(&path, None)?.set(value)?,
        Command::Get(Target::Path(path)) => {
            let store = engine.store(&path, None)?;
            println!("{} = {}", store.key(), show(store.get().as_ref()));
        }
        Command::Watch(Target::Path(path)) => {
            let store = engine.store(&path, None)?;
            let key = path_key(&path);
            watches.push(store.subscribe(move |value| {
                info!("watch {key}: {}", show(value.as_ref()))
            }));
        }
        Command::Set {
            target: Target::Flat { kind, key },
            value,
        } => {
            let value = value.unwrap_or(Value::Null);
            match kind {
                ValueKind::Boolean => set_flat(engine.booleans()?, &key, &value),
                ValueKind::Number => set_flat(engine.numbers()?, &key, &value),
                ValueKind::String => set_flat(engine.strings()?, &key, &value),
                ValueKind::Object => set_flat(engine.objects()?, &key, &value),
            }
        }
        Command::Get(Target::Flat { kind, key }) => {
            let value = match kind {
                ValueKind::Boolean => current(engine.booleans()?, &key),
                ValueKind::Number => current(engine.numbers()?, &key),
                ValueKind::String => current(engine.strings()?, &key),
                ValueKind::Object => current(engine.objects()?, &key),
            };
            println!("{kind} {key} = {value}");
        }
        Command::Watch(Target::Flat { kind, key }) => {
            let subscription = match kind {
                ValueKind::Boolean => watch_flat(engine.booleans()?, &key),
                ValueKind::Number => watch_flat(engine.numbers()?, &key),
                ValueKind::String => watch_flat(engine.strings()?, &key),
                ValueKind::Object => watch_flat(engine.objects()?, &key),
            };
            watches.push(subscription);
        }
    }
    Ok(())
}

fn set_flat<T: WireValue>(stores: &Stores<T>, key: &str, value: &Value) {
    stores.get_or_default(key).set(T::coerce(value));
}

fn current<T: WireValue>(stores: &Stores<T>, key: &str) -> Value {
    stores.get_or_default(key).get().to_json()
}

fn watch_flat<T: WireValue>(stores: &Stores<T>, key: &str) -> Subscription {
    let label = format!("{} {key}", T::KIND);
    stores
        .get_or_default(key)
        .subscribe(move |value| info!("watch {label}: {}", value.to_json()))
}

fn show(value: Option<&Value>) -> String {
    value.map_or_else(|| "undefined".to_string(), Value::to_string)
}
