use shared::{Position, DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// Startup configuration for one client process
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Where the local entity appears before the first drag
    pub spawn: Position,
    /// Minimum time between emitted move events, `None` emits every sample
    pub min_move_interval: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            spawn: Position::spawn(),
            min_move_interval: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up, `None` retries forever
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint(), "ws://127.0.0.1:8080");
        assert_eq!(config.spawn, Position::new(48.0, 48.0));
        assert!(config.min_move_interval.is_none());
        assert!(config.reconnect.enabled);
    }

    #[test]
    fn test_endpoint_formatting() {
        let config = ClientConfig::new("relay.local", 9001);
        assert_eq!(config.endpoint(), "ws://relay.local:9001");
    }

    #[test]
    fn test_disabled_reconnect() {
        let policy = ReconnectPolicy::disabled();
        assert!(!policy.enabled);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }
}
