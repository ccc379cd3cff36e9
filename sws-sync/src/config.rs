//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::connection::{ConnectionSettings, OfflinePolicy};
use crate::error::ConfigError;
use crate::protocol::{Addressing, Routing};

/// Port used by [`SyncConfig::for_host`].
pub const DEFAULT_PORT: u16 = 50080;

/// Everything a [`SyncEngine`](crate::SyncEngine) needs to know.
///
/// Deserializable from JSON; omitted fields take their defaults:
///
/// ```json
/// { "server_url": "ws://10.0.0.2:50080",
///   "routing": { "mode": "scope", "local_scope": "tp1" },
///   "addressing": "flat",
///   "offline": "queue" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// `ws://` or `wss://` endpoint
    pub server_url: String,
    /// Local identity stamping and inbound filtering
    pub routing: Routing,
    /// Flat key registries or one path-addressed document
    pub addressing: Addressing,
    /// Updates submitted while not connected are queued or dropped
    pub offline: OfflinePolicy,
    /// Fixed delay between a close and the next connect attempt
    pub reconnect_delay_ms: u64,
    /// Keep-alive period while open (None = disabled)
    pub heartbeat_interval_ms: Option<u64>,
    /// Maximum distinct keys held by the offline queue
    pub queue_capacity: usize,
    /// Reject undefined values on path stores
    pub strict_values: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            routing: Routing::None,
            addressing: Addressing::Flat,
            offline: OfflinePolicy::Queue,
            reconnect_delay_ms: 10_000,
            heartbeat_interval_ms: Some(30_000),
            queue_capacity: 10_000,
            strict_values: true,
        }
    }
}

impl SyncConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// `ws://<host>:50080`.
    pub fn for_host(host: &str) -> Self {
        Self::new(format!("ws://{host}:{DEFAULT_PORT}"))
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        let invalid = |reason: String| ConfigError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason,
        };
        let request = self
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;
        match request.uri().scheme_str() {
            Some("ws" | "wss") => {}
            _ => return Err(invalid("scheme must be ws or wss".to_string())),
        }
        if !matches!(request.uri().host(), Some(host) if !host.is_empty()) {
            return Err(invalid("missing host".to_string()));
        }

        match &self.routing {
            Routing::Scope { local_scope } if local_scope.trim().is_empty() => {
                return Err(ConfigError::EmptyIdentity("local_scope"));
            }
            Routing::Prefix { local_prefix } if local_prefix.trim().is_empty() => {
                return Err(ConfigError::EmptyIdentity("local_prefix"));
            }
            _ => {}
        }

        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::ZeroReconnectDelay);
        }
        if self.queue_capacity == 0 && self.offline == OfflinePolicy::Queue {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            url: self.server_url.clone(),
            reconnect_delay: self.reconnect_delay(),
            heartbeat_interval: self.heartbeat_interval(),
            offline: self.offline,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.reconnect_delay(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.offline, OfflinePolicy::Queue);
        assert_eq!(config.addressing, Addressing::Flat);
        assert!(config.strict_values);
        assert_eq!(config.validate(), Err(ConfigError::MissingServerUrl));
    }

    #[test]
    fn test_for_host() {
        let config = SyncConfig::for_host("192.168.1.20");
        assert_eq!(config.server_url, "ws://192.168.1.20:50080");
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_rejects_bad_urls() {
        for url in ["http://host", "not a url", "ws://"] {
            let err = SyncConfig::new(url).validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidServerUrl { .. }),
                "{url}: {err:?}"
            );
        }
        assert!(SyncConfig::new("wss://example.com/sync").validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_identity() {
        let config = SyncConfig {
            routing: Routing::Scope {
                local_scope: " ".into(),
            },
            ..SyncConfig::new("ws://h")
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyIdentity("local_scope")));

        let config = SyncConfig {
            routing: Routing::Prefix {
                local_prefix: String::new(),
            },
            ..SyncConfig::new("ws://h")
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyIdentity("local_prefix")));
    }

    #[test]
    fn test_rejects_zero_delay_and_capacity() {
        let config = SyncConfig {
            reconnect_delay_ms: 0,
            ..SyncConfig::new("ws://h")
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroReconnectDelay));

        let config = SyncConfig {
            queue_capacity: 0,
            ..SyncConfig::new("ws://h")
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueCapacity));

        let config = SyncConfig {
            queue_capacity: 0,
            offline: OfflinePolicy::Drop,
            ..SyncConfig::new("ws://h")
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SyncConfig::from_json(
            r#"{
                "server_url": "ws://10.0.0.2:50080",
                "routing": { "mode": "prefix", "local_prefix": "tp1." },
                "addressing": "path",
                "offline": "drop",
                "heartbeat_interval_ms": null
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.routing,
            Routing::Prefix {
                local_prefix: "tp1.".into()
            }
        );
        assert_eq!(config.addressing, Addressing::Path);
        assert_eq!(config.offline, OfflinePolicy::Drop);
        assert_eq!(config.heartbeat_interval(), None);
        assert_eq!(config.reconnect_delay_ms, 10_000);

        let settings = config.connection_settings();
        assert_eq!(settings.url, "ws://10.0.0.2:50080");
        assert_eq!(settings.heartbeat_interval, None);
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(
            SyncConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            SyncConfig::from_json(r#"{"server_url": ""}"#),
            Err(ConfigError::MissingServerUrl)
        );
    }
}
