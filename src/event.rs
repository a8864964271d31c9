//! Access event parsing
//!
//! Accepts an EventBridge envelope (`{"id": .., "detail": {..}}`) or a bare
//! CloudTrail record. Required fields that are absent or empty are collected
//! and reported together; nothing is filled in with placeholder values.

use crate::error::{Result, SentinelError};
use crate::types::AccessEvent;
use serde_json::Value;

/// Field paths an access event must carry, relative to the CloudTrail record
pub const REQUIRED_FIELDS: [&str; 4] = [
    "userIdentity.arn",
    "eventName",
    "requestParameters.bucketName",
    "requestParameters.key",
];

/// Fields extracted from an event before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAccessEvent {
    pub event_id: Option<String>,
    pub principal_arn: Option<String>,
    pub event_name: Option<String>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub source_ip: Option<String>,
}

fn string_at(value: &Value, path: &str) -> Option<String> {
    path.split('.')
        .try_fold(value, |v, part| v.get(part))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl RawAccessEvent {
    /// Pull the known fields out of an event payload
    pub fn extract(payload: &Value) -> Self {
        let record = payload.get("detail").unwrap_or(payload);
        Self {
            event_id: string_at(record, "eventID").or_else(|| string_at(payload, "id")),
            principal_arn: string_at(record, "userIdentity.arn"),
            event_name: string_at(record, "eventName"),
            bucket: string_at(record, "requestParameters.bucketName"),
            key: string_at(record, "requestParameters.key"),
            source_ip: string_at(record, "sourceIPAddress"),
        }
    }

    /// Required fields that are missing, in [`REQUIRED_FIELDS`] order
    pub fn missing_fields(&self) -> Vec<String> {
        let present = [
            self.principal_arn.is_some(),
            self.event_name.is_some(),
            self.bucket.is_some(),
            self.key.is_some(),
        ];
        REQUIRED_FIELDS
            .iter()
            .zip(present)
            .filter(|(_, ok)| !ok)
            .map(|(field, _)| field.to_string())
            .collect()
    }

    /// Validate into an [`AccessEvent`]
    ///
    /// Events without an id get a generated one, so they are never treated
    /// as redeliveries of each other.
    pub fn into_event(self) -> Result<AccessEvent> {
        let missing = self.missing_fields();
        match (self.principal_arn, self.event_name, self.bucket, self.key) {
            (Some(principal_arn), Some(event_name), Some(bucket), Some(key)) => Ok(AccessEvent {
                event_id: self
                    .event_id
                    .unwrap_or_else(|| format!("generated-{}", uuid::Uuid::new_v4())),
                principal_arn,
                event_name,
                bucket,
                key,
                source_ip: self.source_ip,
            }),
            _ => Err(SentinelError::MalformedEvent { missing }),
        }
    }
}

/// Parse one access event
pub fn parse_access_event(payload: &Value) -> Result<AccessEvent> {
    RawAccessEvent::extract(payload).into_event()
}

/// Split a payload into individual event payloads
///
/// CloudTrail log files wrap records in `{"Records": [..]}`; anything else
/// is treated as a single event.
pub fn split_records(payload: Value) -> Vec<Value> {
    match payload {
        Value::Object(mut map) if map.get("Records").map_or(false, Value::is_array) => {
            match map.remove("Records") {
                Some(Value::Array(records)) => records,
                _ => Vec::new(),
            }
        }
        Value::Array(items) => items,
        other => vec![other],
    }
}
