//! SES email report channel

use super::sdk_error;
use crate::error::{Result, SentinelError};
use crate::provider::Notifier;
use crate::types::Alert;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};

/// Sends the alert as a plain-text email
pub struct SesEmailNotifier {
    client: aws_sdk_sesv2::Client,
    sender: String,
    recipients: Vec<String>,
}

impl SesEmailNotifier {
    pub fn new(sdk: &SdkConfig, sender: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            client: aws_sdk_sesv2::Client::new(sdk),
            sender: sender.into(),
            recipients,
        }
    }
}

fn utf8(data: String) -> Result<Content> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| SentinelError::external("ses", "SendEmail", e))
}

#[async_trait]
impl Notifier for SesEmailNotifier {
    async fn publish(&self, alert: &Alert) -> Result<String> {
        let message = Message::builder()
            .subject(utf8(alert.subject.clone())?)
            .body(Body::builder().text(utf8(alert.render_text())?).build())
            .build()
            .map_err(|e| SentinelError::external("ses", "SendEmail", e))?;

        let resp = self
            .client
            .send_email()
            .from_email_address(&self.sender)
            .destination(
                Destination::builder()
                    .set_to_addresses(Some(self.recipients.clone()))
                    .build(),
            )
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| sdk_error("ses", "SendEmail", e))?;

        Ok(resp.message_id().unwrap_or_default().to_string())
    }

    fn name(&self) -> &str {
        "ses"
    }
}
