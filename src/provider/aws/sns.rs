//! SNS alert channel

use super::sdk_error;
use crate::error::Result;
use crate::provider::Notifier;
use crate::types::Alert;
use async_trait::async_trait;
use aws_config::SdkConfig;

/// SNS subjects are capped at 100 characters
const MAX_SUBJECT_LEN: usize = 100;

/// Publishes alerts to an SNS topic
pub struct SnsNotifier {
    client: aws_sdk_sns::Client,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new(sdk: &SdkConfig, topic_arn: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_sns::Client::new(sdk),
            topic_arn: topic_arn.into(),
        }
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, alert: &Alert) -> Result<String> {
        let subject: String = alert.subject.chars().take(MAX_SUBJECT_LEN).collect();
        let resp = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(subject)
            .message(alert.render_text())
            .send()
            .await
            .map_err(|e| sdk_error("sns", "Publish", e))?;

        Ok(resp.message_id().unwrap_or_default().to_string())
    }

    fn name(&self) -> &str {
        "sns"
    }
}
