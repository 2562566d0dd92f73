//! Connection parameters and reconnect policy supplied by the host
//! application.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed delay between reconnect attempts after an abnormal close.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// WebSocket close code for a normal closure. Any other code reconnects.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Where to connect.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Full WebSocket endpoint, built by the host application.
    pub url: String,
    /// Document identifier, used in log lines only.
    #[serde(default)]
    pub document_id: Option<String>,
    /// Static bearer token. A [`TokenProvider`] takes precedence.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl ConnectionParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            document_id: None,
            auth_token: None,
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Label for log lines.
    pub fn label(&self) -> &str {
        self.document_id.as_deref().unwrap_or(&self.url)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self::new("ws://127.0.0.1:9090/collab")
    }
}

// Keeps the token out of logs.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("url", &self.url)
            .field("document_id", &self.document_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Reconnect timing. The interval is fixed; there is no backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub interval_ms: u64,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Whether a close with `code` should be followed by a reconnect.
    /// A missing code means the socket dropped without a close frame.
    pub fn should_reconnect(&self, code: Option<u16>) -> bool {
        code != Some(NORMAL_CLOSE_CODE)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_INTERVAL)
    }
}

/// Everything a collaboration session needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub params: ConnectionParams,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Capacity of the outgoing frame queue.
    #[serde(default = "default_outgoing_capacity")]
    pub outgoing_capacity: usize,
}

fn default_outgoing_capacity() -> usize {
    256
}

impl SessionConfig {
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            reconnect: ReconnectPolicy::default(),
            outgoing_capacity: default_outgoing_capacity(),
        }
    }

    /// Parse from JSON, filling unset fields with defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(ConnectionParams::default())
    }
}

/// Supplies a fresh auth token on every (re)connect.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

pub type SharedTokenProvider = Arc<dyn TokenProvider>;

/// Token to present on the next connect: the provider's, else the static one.
pub fn resolve_token(params: &ConnectionParams, provider: Option<&dyn TokenProvider>) -> Option<String> {
    provider
        .and_then(|p| p.token())
        .or_else(|| params.auth_token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.reconnect.interval(), DEFAULT_RECONNECT_INTERVAL);
        assert_eq!(config.outgoing_capacity, 256);
        assert!(config.params.auth_token.is_none());
    }

    #[test]
    fn test_from_json_partial() {
        let config = SessionConfig::from_json(
            r#"{"params":{"url":"ws://localhost:4000/doc/7","document_id":"7"},"reconnect":{"interval_ms":500}}"#,
        )
        .unwrap();
        assert_eq!(config.params.url, "ws://localhost:4000/doc/7");
        assert_eq!(config.params.label(), "7");
        assert_eq!(config.reconnect.interval(), Duration::from_millis(500));
        assert_eq!(config.outgoing_capacity, 256);
    }

    #[test]
    fn test_should_reconnect() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.should_reconnect(Some(NORMAL_CLOSE_CODE)));
        assert!(policy.should_reconnect(Some(1006)));
        assert!(policy.should_reconnect(Some(4001)));
        assert!(policy.should_reconnect(None));
    }

    #[test]
    fn test_token_resolution() {
        let params = ConnectionParams::new("ws://x").with_token("static");
        assert_eq!(resolve_token(&params, None).as_deref(), Some("static"));

        let provider = || Some("fresh".to_string());
        assert_eq!(resolve_token(&params, Some(&provider as &dyn TokenProvider)).as_deref(), Some("fresh"));

        let empty = || None::<String>;
        assert_eq!(resolve_token(&params, Some(&empty as &dyn TokenProvider)).as_deref(), Some("static"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let params = ConnectionParams::new("ws://x").with_token("secret");
        let printed = format!("{params:?}");
        assert!(!printed.contains("secret"));
        assert!(printed.contains("<redacted>"));
    }
}
