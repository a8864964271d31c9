//! NATS notifier configuration

use serde::{Deserialize, Serialize};

/// Connection and delivery settings for the NATS alert channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsNotifierConfig {
    /// NATS server URL
    pub url: String,

    /// Subject alerts are published to
    pub subject: String,

    /// Authentication token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Publish through JetStream and wait for the stream ack.
    /// The alert id is sent as `Nats-Msg-Id`, so the server drops
    /// redeliveries inside its duplicate window.
    pub jetstream: bool,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request/ack timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for NatsNotifierConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            subject: "dlp.alerts".to_string(),
            token: None,
            jetstream: false,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl NatsNotifierConfig {
    /// Subject for a given alert kind, e.g. `dlp.alerts.unauthorized_access`
    pub fn subject_for(&self, kind: &str) -> String {
        format!("{}.{}", self.subject, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NatsNotifierConfig::default();
        assert_eq!(config.url, "nats://127.0.0.1:4222");
        assert!(!config.jetstream);
        assert_eq!(
            config.subject_for("malformed_event"),
            "dlp.alerts.malformed_event"
        );
    }

    #[test]
    fn test_partial_deserialize() {
        let config: NatsNotifierConfig =
            serde_json::from_str(r#"{"url":"nats://nats:4222","jetstream":true}"#).unwrap();
        assert_eq!(config.url, "nats://nats:4222");
        assert!(config.jetstream);
        assert_eq!(config.subject, "dlp.alerts");
    }
}
