use callcore::media::IceServer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for the call controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// How long a placed call waits for accept/reject.
    pub no_answer_timeout_secs: u64,
    /// How long an incoming call rings before it is dropped.
    pub ring_timeout_secs: u64,
    pub elapsed_tick_ms: u64,
    pub mailbox_capacity: usize,
    pub ice_servers: Vec<IceServer>,
    /// WebSocket endpoint of the relay server.
    pub signaling_url: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            no_answer_timeout_secs: 30,
            ring_timeout_secs: 30,
            elapsed_tick_ms: 1000,
            mailbox_capacity: 64,
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
                IceServer::stun("stun:stun2.l.google.com:19302"),
            ],
            signaling_url: None,
        }
    }
}

impl CallConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn no_answer_timeout(&self) -> Duration {
        Duration::from_secs(self.no_answer_timeout_secs)
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn elapsed_tick(&self) -> Duration {
        Duration::from_millis(self.elapsed_tick_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert_eq!(config.no_answer_timeout(), Duration::from_secs(30));
        assert_eq!(config.ring_timeout(), Duration::from_secs(30));
        assert_eq!(config.elapsed_tick(), Duration::from_secs(1));
        assert_eq!(config.ice_servers.len(), 3);
        assert!(config.signaling_url.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CallConfig::from_json_str(
            r#"{"no_answer_timeout_secs": 5, "signaling_url": "ws://127.0.0.1:5000/ws"}"#,
        )
        .unwrap();
        assert_eq!(config.no_answer_timeout_secs, 5);
        assert_eq!(config.ring_timeout_secs, 30);
        assert_eq!(config.signaling_url.as_deref(), Some("ws://127.0.0.1:5000/ws"));
        assert_eq!(config.ice_servers, CallConfig::default().ice_servers);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ice_servers": [{{"urls": ["turn:turn.example.org:3478"], "username": "u", "credential": "p"}}]}}"#
        )
        .unwrap();

        let config = CallConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let err = CallConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = CallConfig::from_json_file("/nonexistent/parley.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
