//! NATS client for alert delivery

use super::config::NatsNotifierConfig;
use crate::error::{Result, SentinelError};
use crate::types::Alert;
use async_nats::jetstream;
use std::time::Duration;

/// Connected NATS client publishing JSON alerts
pub struct NatsAlertClient {
    client: async_nats::Client,
    jetstream: Option<jetstream::Context>,
    config: NatsNotifierConfig,
}

impl NatsAlertClient {
    /// Connect to the configured server
    pub async fn connect(config: NatsNotifierConfig) -> Result<Self> {
        let client = build_connect_options(&config)
            .connect(&config.url)
            .await
            .map_err(|e| SentinelError::external("nats", "Connect", format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, jetstream = config.jetstream, "Connected to NATS");

        let jetstream = config.jetstream.then(|| jetstream::new(client.clone()));
        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Publish an alert, returning the stream sequence (JetStream) or the alert id
    pub async fn publish(&self, alert: &Alert) -> Result<String> {
        let subject = self.config.subject_for(alert.kind.as_str());
        let payload = serde_json::to_vec(alert)?;

        let id = match &self.jetstream {
            Some(js) => {
                let mut headers = async_nats::HeaderMap::new();
                headers.insert("Nats-Msg-Id", alert.id.as_str());

                let ack_fut = js
                    .publish_with_headers(subject.clone(), headers, payload.into())
                    .await
                    .map_err(|e| SentinelError::external("nats", "Publish", e))?;

                let timeout = Duration::from_secs(self.config.request_timeout_secs);
                let ack = tokio::time::timeout(timeout, ack_fut)
                    .await
                    .map_err(|_| {
                        SentinelError::external(
                            "nats",
                            "Publish",
                            format!("ack timed out after {}s", self.config.request_timeout_secs),
                        )
                    })?
                    .map_err(|e| SentinelError::external("nats", "Publish", format!("ack failed: {}", e)))?;

                ack.sequence.to_string()
            }
            None => {
                self.client
                    .publish(subject.clone(), payload.into())
                    .await
                    .map_err(|e| SentinelError::external("nats", "Publish", e))?;
                self.client
                    .flush()
                    .await
                    .map_err(|e| SentinelError::external("nats", "Flush", e))?;
                alert.id.clone()
            }
        };

        tracing::debug!(alert_id = %alert.id, subject = %subject, message_id = %id, "Alert published");
        Ok(id)
    }

    pub fn config(&self) -> &NatsNotifierConfig {
        &self.config
    }
}

fn build_connect_options(config: &NatsNotifierConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}
