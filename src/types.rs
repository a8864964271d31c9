//! Core data model for the classification pipeline
//!
//! All types use camelCase JSON serialization so exported records and
//! published alerts share one wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ordered sensitivity level
///
/// Declaration order is severity order: `High > Medium > Low > None`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensitivityTier {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl SensitivityTier {
    /// Every tier, lowest first
    pub const ALL: [SensitivityTier; 4] = [Self::None, Self::Low, Self::Medium, Self::High];

    /// Tag value written to objects
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for SensitivityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensitivityTier {
    type Err = String;

    /// Case-insensitive, so Macie's `High`/`Medium`/`Low` parse too
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(format!("unknown sensitivity tier '{}'", other)),
        }
    }
}

/// Location of a stored object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Listing entry for a stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    /// Continuation token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Object tags keyed by tag name
pub type TagSet = BTreeMap<String, String>;

/// Detections for one category within one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    /// Category label, e.g. `resident-id-number`
    pub category: String,
    pub tier: SensitivityTier,
    /// Total matches, duplicates included
    pub match_count: u64,
    /// Distinct matched values; zero when the source reports counts only
    pub unique_count: u64,
    /// Up to five distinct matched values
    #[serde(default)]
    pub samples: Vec<String>,
    /// Key of the object the detections came from
    pub key: String,
}

/// Aggregated classification result for one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationVerdict {
    pub key: String,
    pub tier: SensitivityTier,
    /// Ordered highest tier first, then by category name
    pub detections: Vec<DetectionRecord>,
}

impl ClassificationVerdict {
    /// Total matches across every detection
    pub fn total_matches(&self) -> u64 {
        self.detections.iter().map(|d| d.match_count).sum()
    }
}

/// Status of a classification job as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Running,
    Idle,
    Paused,
    UserPaused,
    Complete,
    Cancelled,
    Failed,
}

impl JobStatus {
    /// Terminal status, if this status ends polling
    pub fn terminal(&self) -> Option<TerminalStatus> {
        match self {
            Self::Complete => Some(TerminalStatus::Complete),
            Self::Cancelled => Some(TerminalStatus::Cancelled),
            Self::Failed => Some(TerminalStatus::Failed),
            _ => None,
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" => Ok(Self::Submitted),
            "RUNNING" => Ok(Self::Running),
            "IDLE" => Ok(Self::Idle),
            "PAUSED" => Ok(Self::Paused),
            "USER_PAUSED" => Ok(Self::UserPaused),
            "COMPLETE" => Ok(Self::Complete),
            "CANCELLED" => Ok(Self::Cancelled),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// How a job poll ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Complete,
    Cancelled,
    Failed,
    TimedOut,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "COMPLETE",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Request to register a custom data identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomIdentifierSpec {
    pub name: String,
    pub regex: String,
    pub description: String,
    pub severity: SensitivityTier,
    pub occurrence_threshold: u32,
    #[serde(default)]
    pub tags: TagSet,
}

/// Request to submit a one-time classification job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationJobSpec {
    pub bucket: String,
    pub name: String,
    pub identifier_ids: Vec<String>,
    /// Idempotency token supplied by the client
    pub client_token: String,
}

/// Filter for finding retrieval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    /// Restrict to sensitive-data findings (excludes policy findings)
    #[serde(default)]
    pub sensitive_data_only: bool,
}

/// One page of finding identifiers
#[derive(Debug, Clone, Default)]
pub struct FindingIdPage {
    pub ids: Vec<String>,
    pub next_token: Option<String>,
}

/// One detected data type inside a finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingDetection {
    /// Custom identifier name or managed data type
    pub category: String,
    pub count: u64,
}

/// A finding returned by the classification service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingRecord {
    pub id: String,
    pub bucket: String,
    pub key: String,
    pub severity: SensitivityTier,
    pub detections: Vec<FindingDetection>,
}

/// A data-access event, e.g. a CloudTrail `GetObject` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEvent {
    /// Delivery id assigned by the event source
    pub event_id: String,
    pub principal_arn: String,
    pub event_name: String,
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
}

impl AccessEvent {
    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(&self.bucket, &self.key)
    }
}

/// Kind of alert published by the responder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Principal outside the allow-list touched a HIGH object
    UnauthorizedAccess,
    /// Event could not be evaluated because required fields were missing
    MalformedEvent,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::MalformedEvent => "malformed_event",
        }
    }
}

/// Structured alert message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Unique alert identifier (alert-<uuid>)
    pub id: String,
    pub kind: AlertKind,
    pub subject: String,
    pub reasons: Vec<String>,
    /// Outcome of each response action, in the order attempted
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<SensitivityTier>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Create an alert with auto-generated id and timestamp
    pub fn new(kind: AlertKind, subject: impl Into<String>) -> Self {
        Self {
            id: format!("alert-{}", uuid::Uuid::new_v4()),
            kind,
            subject: subject.into(),
            reasons: Vec::new(),
            actions: Vec::new(),
            event_id: None,
            principal: None,
            event_name: None,
            bucket: None,
            key: None,
            source_ip: None,
            tier: None,
            timestamp: Utc::now(),
        }
    }

    /// Fill the event fields from an access event
    pub fn for_event(mut self, event: &AccessEvent, tier: SensitivityTier) -> Self {
        self.event_id = Some(event.event_id.clone());
        self.principal = Some(event.principal_arn.clone());
        self.event_name = Some(event.event_name.clone());
        self.bucket = Some(event.bucket.clone());
        self.key = Some(event.key.clone());
        self.source_ip = event.source_ip.clone();
        self.tier = Some(tier);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Plain-text body for email and SNS delivery
    pub fn render_text(&self) -> String {
        let mut out = format!("{}\n\nReasons:\n", self.subject);
        for reason in &self.reasons {
            out.push_str(&format!("- {}\n", reason));
        }
        if !self.actions.is_empty() {
            out.push_str("\nActions taken:\n");
            for action in &self.actions {
                out.push_str(&format!("- {}\n", action));
            }
        }
        out.push_str("\nDetails:\n");
        let fields = [
            ("Principal", self.principal.as_deref()),
            ("Event", self.event_name.as_deref()),
            ("Bucket", self.bucket.as_deref()),
            ("Object", self.key.as_deref()),
            ("Source IP", self.source_ip.as_deref()),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                out.push_str(&format!("- {}: {}\n", label, value));
            }
        }
        if let Some(tier) = self.tier {
            out.push_str(&format!("- Sensitivity: {}\n", tier));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(SensitivityTier::High > SensitivityTier::Medium);
        assert!(SensitivityTier::Medium > SensitivityTier::Low);
        assert!(SensitivityTier::Low > SensitivityTier::None);
        assert_eq!(
            SensitivityTier::ALL.iter().max(),
            Some(&SensitivityTier::High)
        );
    }

    #[test]
    fn test_tier_parse_case_insensitive() {
        assert_eq!("High".parse::<SensitivityTier>().unwrap(), SensitivityTier::High);
        assert_eq!("medium".parse::<SensitivityTier>().unwrap(), SensitivityTier::Medium);
        assert_eq!(" LOW ".parse::<SensitivityTier>().unwrap(), SensitivityTier::Low);
        assert!("CRITICAL".parse::<SensitivityTier>().is_err());
    }

    #[test]
    fn test_tier_serialization() {
        let json = serde_json::to_string(&SensitivityTier::Medium).unwrap();
        assert_eq!(json, "\"MEDIUM\"");
        let parsed: SensitivityTier = serde_json::from_str("\"HIGH\"").unwrap();
        assert_eq!(parsed, SensitivityTier::High);
    }

    #[test]
    fn test_job_status_terminal() {
        assert_eq!(JobStatus::Complete.terminal(), Some(TerminalStatus::Complete));
        assert_eq!(JobStatus::Cancelled.terminal(), Some(TerminalStatus::Cancelled));
        assert_eq!(JobStatus::Failed.terminal(), Some(TerminalStatus::Failed));
        assert_eq!(JobStatus::Running.terminal(), None);
        assert_eq!(JobStatus::Idle.terminal(), None);
        assert_eq!("USER_PAUSED".parse::<JobStatus>().unwrap(), JobStatus::UserPaused);
    }

    #[test]
    fn test_detection_record_serialization() {
        let record = DetectionRecord {
            category: "email-address".to_string(),
            tier: SensitivityTier::Medium,
            match_count: 3,
            unique_count: 2,
            samples: vec!["a@b.com".to_string(), "c@d.org".to_string()],
            key: "users.csv".to_string(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"matchCount\":3"));
        assert!(json.contains("\"uniqueCount\":2"));
        assert!(json.contains("\"tier\":\"MEDIUM\""));
    }

    #[test]
    fn test_alert_render_text() {
        let event = AccessEvent {
            event_id: "evt-1".to_string(),
            principal_arn: "arn:aws:iam::123456789012:user/mallory".to_string(),
            event_name: "GetObject".to_string(),
            bucket: "sensitive".to_string(),
            key: "hr/salaries.csv".to_string(),
            source_ip: Some("203.0.113.9".to_string()),
        };
        let alert = Alert::new(AlertKind::UnauthorizedAccess, "Unauthorized access")
            .for_event(&event, SensitivityTier::High)
            .with_reason("principal is not authorized");

        let text = alert.render_text();
        assert!(text.contains("- Principal: arn:aws:iam::123456789012:user/mallory"));
        assert!(text.contains("- Event: GetObject"));
        assert!(text.contains("- Bucket: sensitive"));
        assert!(text.contains("- Object: hr/salaries.csv"));
        assert!(text.contains("- Sensitivity: HIGH"));
        assert!(!text.contains("Actions taken"));
    }

    #[test]
    fn test_alert_serialization_skips_empty_fields() {
        let alert = Alert::new(AlertKind::MalformedEvent, "Malformed event");
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"kind\":\"malformed_event\""));
        assert!(!json.contains("principal"));
        assert!(!json.contains("tier"));
    }
}
