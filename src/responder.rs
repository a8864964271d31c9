//! Access-control responder
//!
//! Evaluates one access event against the object's sensitivity tag and the
//! allow-list. An alert is raised only when the tag is HIGH and the
//! principal is not allow-listed. Response actions run independently: a
//! failed disable does not stop the alert, and one failed channel does not
//! stop the others.

use crate::config::ResponderConfig;
use crate::dedup::EventDeduplicator;
use crate::error::SentinelError;
use crate::event::RawAccessEvent;
use crate::provider::{IdentityService, Notifier};
use crate::tagging::TagReconciler;
use crate::types::{AccessEvent, Alert, AlertKind, SensitivityTier};
use serde_json::Value;
use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Operations that change object content
pub const MUTATING_OPERATIONS: [&str; 4] =
    ["PutObject", "DeleteObject", "DeleteObjects", "CopyObject"];

/// A CIDR block such as `121.128.0.0/11`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedNetwork {
    network: IpAddr,
    prefix: u8,
}

impl TrustedNetwork {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for TrustedNetwork {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, prefix) = s.trim().split_once('/').unwrap_or((s.trim(), ""));
        let network: IpAddr = addr
            .parse()
            .map_err(|e| format!("invalid network address '{}': {}", s, e))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = if prefix.is_empty() {
            max
        } else {
            prefix
                .parse::<u8>()
                .map_err(|e| format!("invalid prefix length in '{}': {}", s, e))?
        };
        if prefix > max {
            return Err(format!("prefix length {} out of range in '{}'", prefix, s));
        }
        Ok(Self { network, prefix })
    }
}

/// Why an event did not raise an alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Object is not tagged HIGH
    BelowThreshold(SensitivityTier),
    /// Principal is on the allow-list
    Authorized,
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: String,
    /// Message id on success, error text on failure
    pub result: std::result::Result<String, String>,
}

/// An alert and where it went
#[derive(Debug, Clone)]
pub struct ResponseReport {
    pub alert: Alert,
    pub deliveries: Vec<Delivery>,
}

impl ResponseReport {
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|d| d.result.is_ok()).count()
    }
}

/// Final state of one access event
#[derive(Debug, Clone)]
pub enum Decision {
    Alerted(ResponseReport),
    Ignored {
        event_id: String,
        tier: SensitivityTier,
        reason: IgnoreReason,
    },
    /// Required fields were missing; an alert was still sent
    Malformed(ResponseReport),
    /// Redelivery of an event already handled
    Duplicate { event_id: String },
}

impl Decision {
    pub fn is_alert(&self) -> bool {
        matches!(self, Self::Alerted(_) | Self::Malformed(_))
    }

    pub fn report(&self) -> Option<&ResponseReport> {
        match self {
            Self::Alerted(report) | Self::Malformed(report) => Some(report),
            _ => None,
        }
    }
}

/// Evaluates access events and carries out the response
pub struct AccessResponder {
    tags: TagReconciler,
    identity: Option<Arc<dyn IdentityService>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    allow_list: HashSet<String>,
    trusted_networks: Vec<TrustedNetwork>,
    dedup: EventDeduplicator,
    config: ResponderConfig,
}

impl AccessResponder {
    pub fn new(tags: TagReconciler, config: ResponderConfig) -> crate::error::Result<Self> {
        let trusted_networks = config
            .trusted_networks
            .iter()
            .map(|cidr| cidr.parse::<TrustedNetwork>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(SentinelError::Config)?;

        Ok(Self {
            tags,
            identity: None,
            notifiers: Vec::new(),
            allow_list: config.authorized_principals.iter().cloned().collect(),
            trusted_networks,
            dedup: EventDeduplicator::new(Duration::from_secs(config.dedup_ttl_secs)),
            config,
        })
    }

    /// Service used to disable offending principals
    pub fn with_identity(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Add an alert channel; channels are tried in the order added
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn is_authorized(&self, principal_arn: &str) -> bool {
        self.allow_list.contains(principal_arn)
    }

    /// Handle a raw event payload
    pub async fn handle_payload(&self, payload: &Value) -> Decision {
        let raw = RawAccessEvent::extract(payload);
        if let Some(ref id) = raw.event_id {
            if !self.dedup.first_delivery(id).await {
                return Decision::Duplicate {
                    event_id: id.clone(),
                };
            }
        }

        let decision = match raw.clone().into_event() {
            Ok(event) => self.respond(&event).await,
            Err(SentinelError::MalformedEvent { missing }) => {
                self.report_malformed(&raw, missing).await
            }
            Err(e) => self.report_malformed(&raw, vec![e.to_string()]).await,
        };
        if let Some(ref id) = raw.event_id {
            self.release_if_undelivered(id, &decision).await;
        }
        decision
    }

    /// Handle an already parsed event
    pub async fn evaluate(&self, event: &AccessEvent) -> Decision {
        if !self.dedup.first_delivery(&event.event_id).await {
            return Decision::Duplicate {
                event_id: event.event_id.clone(),
            };
        }
        let decision = self.respond(event).await;
        self.release_if_undelivered(&event.event_id, &decision).await;
        decision
    }

    /// An alert no channel accepted must not be suppressed on redelivery
    async fn release_if_undelivered(&self, event_id: &str, decision: &Decision) {
        let Some(report) = decision.report() else {
            return;
        };
        if !report.deliveries.is_empty() && report.delivered() == 0 {
            tracing::warn!(event_id, "Alert not delivered on any channel; redelivery will be processed");
            self.dedup.forget(event_id).await;
        }
    }

    async fn respond(&self, event: &AccessEvent) -> Decision {
        let object = event.object();
        let tier = match self.tags.read_tier(&object).await {
            Ok(tier) => tier.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(object = %object, error = %e, "Sensitivity tag unreadable, treating as NONE");
                SensitivityTier::None
            }
        };

        if tier != SensitivityTier::High {
            tracing::debug!(event_id = %event.event_id, object = %object, tier = %tier, "Access ignored");
            return Decision::Ignored {
                event_id: event.event_id.clone(),
                tier,
                reason: IgnoreReason::BelowThreshold(tier),
            };
        }
        if self.is_authorized(&event.principal_arn) {
            tracing::info!(
                event_id = %event.event_id,
                principal = %event.principal_arn,
                object = %object,
                "Authorized access to HIGH object"
            );
            return Decision::Ignored {
                event_id: event.event_id.clone(),
                tier,
                reason: IgnoreReason::Authorized,
            };
        }

        let mut alert = Alert::new(AlertKind::UnauthorizedAccess, &self.config.alert_subject)
            .for_event(event, tier)
            .with_reason(format!(
                "Unauthorized principal {} accessed a HIGH sensitivity object",
                event.principal_arn
            ));
        for reason in self.supplementary_reasons(event) {
            alert = alert.with_reason(reason);
        }

        tracing::warn!(
            event_id = %event.event_id,
            principal = %event.principal_arn,
            event_name = %event.event_name,
            object = %object,
            "Unauthorized access to HIGH object"
        );

        if self.config.disable_principal {
            if let Some(ref identity) = self.identity {
                let action = match identity.disable_principal(&event.principal_arn).await {
                    Ok(done) => done,
                    Err(e) => {
                        tracing::error!(principal = %event.principal_arn, error = %e, "Failed to disable principal");
                        format!("Failed to disable {}: {}", event.principal_arn, e)
                    }
                };
                alert.actions.push(action);
            }
        }

        Decision::Alerted(self.dispatch(alert).await)
    }

    /// Extra context for an alert; never raises one by itself
    fn supplementary_reasons(&self, event: &AccessEvent) -> Vec<String> {
        let mut reasons = Vec::new();

        if MUTATING_OPERATIONS.contains(&event.event_name.as_str()) {
            reasons.push(format!("Content-changing operation {}", event.event_name));
        }

        if let (Some(ip), false) = (&event.source_ip, self.trusted_networks.is_empty()) {
            match ip.parse::<IpAddr>() {
                Ok(addr) if self.trusted_networks.iter().any(|n| n.contains(&addr)) => {}
                Ok(_) => reasons.push(format!("Access from untrusted network {}", ip)),
                Err(_) => reasons.push(format!("Unrecognized source address {}", ip)),
            }
        }

        reasons
    }

    async fn report_malformed(&self, raw: &RawAccessEvent, missing: Vec<String>) -> Decision {
        tracing::warn!(event_id = ?raw.event_id, missing = ?missing, "Malformed access event");

        let mut alert = Alert::new(AlertKind::MalformedEvent, &self.config.malformed_subject)
            .with_reason(format!("Missing required fields: {}", missing.join(", ")));
        alert.event_id = raw.event_id.clone();
        alert.principal = raw.principal_arn.clone();
        alert.event_name = raw.event_name.clone();
        alert.bucket = raw.bucket.clone();
        alert.key = raw.key.clone();
        alert.source_ip = raw.source_ip.clone();

        Decision::Malformed(self.dispatch(alert).await)
    }

    async fn dispatch(&self, alert: Alert) -> ResponseReport {
        let mut deliveries = Vec::with_capacity(self.notifiers.len());

        for notifier in &self.notifiers {
            let result = match notifier.publish(&alert).await {
                Ok(message_id) => {
                    tracing::info!(alert_id = %alert.id, channel = notifier.name(), message_id = %message_id, "Alert delivered");
                    Ok(message_id)
                }
                Err(e) => {
                    tracing::error!(alert_id = %alert.id, channel = notifier.name(), error = %e, "Alert delivery failed");
                    Err(e.to_string())
                }
            };
            deliveries.push(Delivery {
                channel: notifier.name().to_string(),
                result,
            });
        }

        if self.notifiers.is_empty() {
            tracing::warn!(alert_id = %alert.id, "No alert channel configured");
        }

        ResponseReport { alert, deliveries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::{
        MemoryIdentityService, MemoryNotifier, MemoryObjectStore, StoreOperation,
    };
    use crate::types::ObjectRef;
    use serde_json::json;

    const AUDITOR: &str = "arn:aws:iam::123456789012:user/auditor";
    const MALLORY: &str = "arn:aws:iam::123456789012:user/mallory";

    struct Harness {
        store: Arc<MemoryObjectStore>,
        identity: Arc<MemoryIdentityService>,
        primary: Arc<MemoryNotifier>,
        email: Arc<MemoryNotifier>,
        responder: AccessResponder,
    }

    async fn harness(config: ResponderConfig) -> Harness {
        let store = Arc::new(MemoryObjectStore::default());
        store.insert("sensitive", "hr/salaries.csv", b"x".to_vec()).await;
        store.insert("sensitive", "public/readme.txt", b"x".to_vec()).await;
        store
            .set_tag(&ObjectRef::new("sensitive", "hr/salaries.csv"), "sensitivity", "HIGH")
            .await
            .unwrap();
        store
            .set_tag(&ObjectRef::new("sensitive", "public/readme.txt"), "sensitivity", "LOW")
            .await
            .unwrap();

        let identity = Arc::new(MemoryIdentityService::default());
        let primary = Arc::new(MemoryNotifier::new("sns"));
        let email = Arc::new(MemoryNotifier::new("ses"));
        let responder = AccessResponder::new(
            TagReconciler::new(store.clone(), "sensitivity"),
            config,
        )
        .unwrap()
        .with_identity(identity.clone())
        .with_notifier(primary.clone())
        .with_notifier(email.clone());

        Harness {
            store,
            identity,
            primary,
            email,
            responder,
        }
    }

    fn default_config() -> ResponderConfig {
        ResponderConfig {
            authorized_principals: vec![AUDITOR.to_string()],
            ..Default::default()
        }
    }

    fn event(principal: &str, key: &str) -> AccessEvent {
        AccessEvent {
            event_id: format!("evt-{}", uuid::Uuid::new_v4()),
            principal_arn: principal.to_string(),
            event_name: "GetObject".to_string(),
            bucket: "sensitive".to_string(),
            key: key.to_string(),
            source_ip: Some("203.0.113.9".to_string()),
        }
    }

    #[test]
    fn test_trusted_network_parse_and_contains() {
        let net: TrustedNetwork = "121.128.0.0/11".parse().unwrap();
        assert!(net.contains(&"121.130.4.5".parse().unwrap()));
        assert!(net.contains(&"121.159.255.255".parse().unwrap()));
        assert!(!net.contains(&"121.160.0.1".parse().unwrap()));
        assert!(!net.contains(&"::1".parse().unwrap()));

        let any: TrustedNetwork = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains(&"8.8.8.8".parse().unwrap()));

        let host: TrustedNetwork = "10.0.0.1".parse().unwrap();
        assert!(host.contains(&"10.0.0.1".parse().unwrap()));
        assert!(!host.contains(&"10.0.0.2".parse().unwrap()));

        let v6: TrustedNetwork = "2001:db8::/32".parse().unwrap();
        assert!(v6.contains(&"2001:db8::1".parse().unwrap()));

        assert!("10.0.0.0/33".parse::<TrustedNetwork>().is_err());
        assert!("not-an-ip/8".parse::<TrustedNetwork>().is_err());
    }

    #[tokio::test]
    async fn test_authorized_principal_ignored() {
        let h = harness(default_config()).await;
        let decision = h.responder.evaluate(&event(AUDITOR, "hr/salaries.csv")).await;

        assert!(matches!(
            decision,
            Decision::Ignored {
                reason: IgnoreReason::Authorized,
                tier: SensitivityTier::High,
                ..
            }
        ));
        assert!(h.primary.alerts().await.is_empty());
        assert_eq!(h.identity.attempts(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_high_access_alerts() {
        let h = harness(default_config()).await;
        let decision = h.responder.evaluate(&event(MALLORY, "hr/salaries.csv")).await;

        let report = match decision {
            Decision::Alerted(report) => report,
            other => panic!("expected Alerted, got {:?}", other),
        };
        let alert = &report.alert;
        assert_eq!(alert.kind, AlertKind::UnauthorizedAccess);
        assert_eq!(alert.subject, "Unauthorized Access to HIGH Sensitivity Object");
        assert_eq!(alert.principal.as_deref(), Some(MALLORY));
        assert_eq!(alert.event_name.as_deref(), Some("GetObject"));
        assert_eq!(alert.bucket.as_deref(), Some("sensitive"));
        assert_eq!(alert.key.as_deref(), Some("hr/salaries.csv"));
        assert_eq!(alert.tier, Some(SensitivityTier::High));
        assert_eq!(alert.actions, vec!["Renamed IAM user mallory to DISABLED_mallory"]);
        assert_eq!(report.delivered(), 2);
        assert_eq!(h.primary.alerts().await.len(), 1);
        assert_eq!(h.email.alerts().await.len(), 1);
        assert_eq!(h.identity.disabled().await, vec![MALLORY.to_string()]);
    }

    #[tokio::test]
    async fn test_disable_attempted_when_channel_fails() {
        let h = harness(default_config()).await;
        h.primary.fail(true);

        let decision = h.responder.evaluate(&event(MALLORY, "hr/salaries.csv")).await;
        let report = decision.report().unwrap();

        assert_eq!(h.identity.attempts(), 1);
        assert_eq!(report.delivered(), 1);
        assert!(report.deliveries[0].result.is_err());
        assert_eq!(h.email.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_alert_sent_when_disable_fails() {
        let h = harness(default_config()).await;
        h.identity.fail(true);

        let decision = h.responder.evaluate(&event(MALLORY, "hr/salaries.csv")).await;
        let report = decision.report().unwrap();

        assert!(report.alert.actions[0].starts_with("Failed to disable"));
        assert_eq!(h.primary.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_high_object_ignored() {
        let h = harness(default_config()).await;
        let decision = h.responder.evaluate(&event(MALLORY, "public/readme.txt")).await;
        assert!(matches!(
            decision,
            Decision::Ignored {
                reason: IgnoreReason::BelowThreshold(SensitivityTier::Low),
                ..
            }
        ));
        assert_eq!(h.identity.attempts(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_tag_treated_as_none() {
        let h = harness(default_config()).await;
        h.store
            .inject_failure(StoreOperation::GetTags, "hr/salaries.csv")
            .await;

        let decision = h.responder.evaluate(&event(MALLORY, "hr/salaries.csv")).await;
        assert!(matches!(
            decision,
            Decision::Ignored {
                tier: SensitivityTier::None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_supplementary_reasons() {
        let config = ResponderConfig {
            trusted_networks: vec!["121.128.0.0/11".to_string()],
            ..default_config()
        };
        let h = harness(config).await;
        let mut put = event(MALLORY, "hr/salaries.csv");
        put.event_name = "PutObject".to_string();

        let decision = h.responder.evaluate(&put).await;
        let reasons = &decision.report().unwrap().alert.reasons;
        assert_eq!(reasons.len(), 3);
        assert!(reasons[1].contains("PutObject"));
        assert!(reasons[2].contains("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_supplementary_reasons_alone_do_not_alert() {
        let config = ResponderConfig {
            trusted_networks: vec!["121.128.0.0/11".to_string()],
            ..default_config()
        };
        let h = harness(config).await;
        let mut delete = event(MALLORY, "public/readme.txt");
        delete.event_name = "DeleteObject".to_string();

        assert!(!h.responder.evaluate(&delete).await.is_alert());
    }

    #[tokio::test]
    async fn test_disable_toggle() {
        let config = ResponderConfig {
            disable_principal: false,
            ..default_config()
        };
        let h = harness(config).await;
        let decision = h.responder.evaluate(&event(MALLORY, "hr/salaries.csv")).await;
        assert!(decision.is_alert());
        assert_eq!(h.identity.attempts(), 0);
        assert!(decision.report().unwrap().alert.actions.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_alerts_without_action() {
        let h = harness(default_config()).await;
        let payload = json!({
            "id": "eb-1",
            "detail": {
                "eventName": "GetObject",
                "requestParameters": {"bucketName": "sensitive", "key": "hr/salaries.csv"}
            }
        });

        let decision = h.responder.handle_payload(&payload).await;
        let report = match decision {
            Decision::Malformed(report) => report,
            other => panic!("expected Malformed, got {:?}", other),
        };
        assert_eq!(report.alert.kind, AlertKind::MalformedEvent);
        assert!(report.alert.reasons[0].contains("userIdentity.arn"));
        assert_eq!(report.alert.key.as_deref(), Some("hr/salaries.csv"));
        assert_eq!(h.identity.attempts(), 0);
        assert_eq!(h.primary.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_suppressed() {
        let config = ResponderConfig {
            dedup_ttl_secs: 300,
            ..default_config()
        };
        let h = harness(config).await;
        let e = event(MALLORY, "hr/salaries.csv");

        assert!(h.responder.evaluate(&e).await.is_alert());
        assert!(matches!(
            h.responder.evaluate(&e).await,
            Decision::Duplicate { .. }
        ));
        assert_eq!(h.primary.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_undelivered_alert_processed_on_redelivery() {
        let config = ResponderConfig {
            dedup_ttl_secs: 300,
            ..default_config()
        };
        let h = harness(config).await;
        let payload = json!({
            "detail": {
                "eventID": "evt-retry",
                "eventName": "GetObject",
                "userIdentity": {"arn": MALLORY},
                "requestParameters": {"bucketName": "sensitive", "key": "hr/salaries.csv"}
            }
        });

        h.primary.fail(true);
        h.email.fail(true);
        let first = h.responder.handle_payload(&payload).await;
        assert_eq!(first.report().unwrap().delivered(), 0);

        h.primary.fail(false);
        h.email.fail(false);
        let second = h.responder.handle_payload(&payload).await;
        assert_eq!(second.report().unwrap().delivered(), 2);
        assert_eq!(h.primary.alerts().await.len(), 1);

        assert!(matches!(
            h.responder.handle_payload(&payload).await,
            Decision::Duplicate { .. }
        ));
    }

    #[tokio::test]
    async fn test_evaluate_releases_undelivered_event() {
        let config = ResponderConfig {
            dedup_ttl_secs: 300,
            ..default_config()
        };
        let h = harness(config).await;
        let e = event(MALLORY, "hr/salaries.csv");

        h.primary.fail(true);
        h.email.fail(true);
        assert!(h.responder.evaluate(&e).await.is_alert());

        h.primary.fail(false);
        h.email.fail(false);
        assert!(h.responder.evaluate(&e).await.is_alert());
        assert_eq!(h.email.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_alerts_twice_without_dedup() {
        let h = harness(default_config()).await;
        let e = event(MALLORY, "hr/salaries.csv");
        h.responder.evaluate(&e).await;
        h.responder.evaluate(&e).await;
        assert_eq!(h.primary.alerts().await.len(), 2);
    }
}
