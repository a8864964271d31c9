//! NATS alert channel
//!
//! Implements `Notifier` by publishing JSON alerts to
//! `<subject>.<alert kind>`, optionally through JetStream.

mod client;
mod config;

pub use client::NatsAlertClient;
pub use config::NatsNotifierConfig;

use crate::error::Result;
use crate::provider::Notifier;
use crate::types::Alert;
use async_trait::async_trait;

/// NATS notifier
pub struct NatsNotifier {
    client: NatsAlertClient,
}

impl NatsNotifier {
    pub async fn connect(config: NatsNotifierConfig) -> Result<Self> {
        let client = NatsAlertClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Underlying client for advanced usage
    pub fn client(&self) -> &NatsAlertClient {
        &self.client
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn publish(&self, alert: &Alert) -> Result<String> {
        self.client.publish(alert).await
    }

    fn name(&self) -> &str {
        "nats"
    }
}
