//! NATS notifier integration tests
//!
//! These tests require a running NATS server:
//!   nats-server -js
//!
//! Tests are skipped automatically if NATS is not available.

use dlp_sentinel::provider::nats::{NatsNotifier, NatsNotifierConfig};
use dlp_sentinel::{AccessEvent, Alert, AlertKind, Notifier, SensitivityTier};
use std::time::Duration;

const URL: &str = "nats://127.0.0.1:4222";

fn test_alert() -> Alert {
    let event = AccessEvent {
        event_id: "evt-nats-1".to_string(),
        principal_arn: "arn:aws:iam::123456789012:user/mallory".to_string(),
        event_name: "GetObject".to_string(),
        bucket: "sensitive".to_string(),
        key: "hr/salaries.csv".to_string(),
        source_ip: None,
    };
    Alert::new(AlertKind::UnauthorizedAccess, "Unauthorized Access to HIGH Sensitivity Object")
        .for_event(&event, SensitivityTier::High)
}

#[tokio::test]
async fn test_nats_core_publish_delivers_json() {
    let listener = match async_nats::connect(URL).await {
        Ok(c) => c,
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            return;
        }
    };

    let config = NatsNotifierConfig {
        url: URL.to_string(),
        subject: "test.dlp.core".to_string(),
        ..Default::default()
    };
    let mut sub = listener
        .subscribe("test.dlp.core.unauthorized_access")
        .await
        .unwrap();
    listener.flush().await.unwrap();

    let notifier = NatsNotifier::connect(config).await.unwrap();
    let alert = test_alert();
    let id = notifier.publish(&alert).await.unwrap();
    assert_eq!(id, alert.id);
    assert_eq!(notifier.name(), "nats");

    let msg = tokio::time::timeout(Duration::from_secs(5), next_message(&mut sub))
        .await
        .unwrap()
        .unwrap();
    let received: Alert = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(received.id, alert.id);
    assert_eq!(received.tier, Some(SensitivityTier::High));
    assert_eq!(received.principal.as_deref(), Some("arn:aws:iam::123456789012:user/mallory"));
}

async fn next_message(sub: &mut async_nats::Subscriber) -> Option<async_nats::Message> {
    use tokio_stream::StreamExt;
    sub.next().await
}

#[tokio::test]
async fn test_nats_unreachable_server_is_external_error() {
    let config = NatsNotifierConfig {
        url: "nats://127.0.0.1:1".to_string(),
        connect_timeout_secs: 1,
        ..Default::default()
    };
    if let Err(err) = NatsNotifier::connect(config).await {
        assert!(err.to_string().contains("nats Connect failed"));
    }
}
