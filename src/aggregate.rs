//! Finding aggregation
//!
//! Folds raw detections into per-object verdicts and run summaries. Both
//! local pattern scans and service findings end up in the same
//! [`DetectionMap`] shape before a verdict is taken.

use crate::decoder::DecodedContent;
use crate::patterns::{CategoryHits, DetectionMap, PatternMatcher};
use crate::types::{ClassificationVerdict, FindingRecord, ObjectRef, SensitivityTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category used when a finding carries a severity but no detection list
pub const UNSPECIFIED_CATEGORY: &str = "unspecified";

/// Verdict for one object from its detections
///
/// The tier is the highest tier with a non-empty category, NONE otherwise.
pub fn verdict(key: &str, detections: &DetectionMap) -> ClassificationVerdict {
    ClassificationVerdict {
        key: key.to_string(),
        tier: detections.highest_tier().unwrap_or_default(),
        detections: detections.records(key),
    }
}

/// Verdict for one decoded object
///
/// Excluded and undecodable content short-circuit to their forced tier
/// without consulting the matcher.
pub fn classify_content(
    key: &str,
    content: &DecodedContent,
    matcher: &PatternMatcher,
) -> ClassificationVerdict {
    match (content.forced_tier(), content.text()) {
        (Some(tier), _) => ClassificationVerdict {
            key: key.to_string(),
            tier,
            detections: Vec::new(),
        },
        (None, Some(text)) => verdict(key, &matcher.scan(text)),
        (None, None) => verdict(key, &DetectionMap::new()),
    }
}

/// Group service findings by object
///
/// Each detection's tier comes from the rule table when the category names
/// a known rule, and from the finding's own severity otherwise. Findings
/// for the same object are merged.
pub fn normalize_findings(
    findings: &[FindingRecord],
    matcher: &PatternMatcher,
) -> BTreeMap<ObjectRef, DetectionMap> {
    let mut by_object: BTreeMap<ObjectRef, DetectionMap> = BTreeMap::new();

    for finding in findings {
        let map = by_object
            .entry(ObjectRef::new(&finding.bucket, &finding.key))
            .or_default();

        if finding.detections.is_empty() {
            map.record(
                finding.severity,
                UNSPECIFIED_CATEGORY,
                CategoryHits {
                    count: 1,
                    ..Default::default()
                },
            );
            continue;
        }

        for detection in &finding.detections {
            let tier = matcher
                .tier_of(&detection.category)
                .unwrap_or(finding.severity);
            map.record(
                tier,
                detection.category.clone(),
                CategoryHits {
                    count: detection.count,
                    ..Default::default()
                },
            );
        }
    }

    by_object
}

/// Error recorded against one object during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectError {
    pub key: String,
    pub stage: String,
    pub message: String,
}

/// Summary of one classification run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub bucket: String,
    pub objects_scanned: u64,
    /// Objects classified above NONE
    pub objects_affected: u64,
    pub objects_tagged: u64,
    pub total_detections: u64,
    pub by_tier: BTreeMap<SensitivityTier, u64>,
    /// Detections per category across all objects
    pub by_category: BTreeMap<String, u64>,
    /// Finding count per service severity (service runs only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub severity_distribution: BTreeMap<SensitivityTier, u64>,
    pub verdicts: Vec<ClassificationVerdict>,
    pub errors: Vec<ObjectError>,
}

impl ScanSummary {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Fold one verdict into the counters
    pub fn record_verdict(&mut self, verdict: ClassificationVerdict) {
        self.objects_scanned += 1;
        if verdict.tier > SensitivityTier::None {
            self.objects_affected += 1;
        }
        *self.by_tier.entry(verdict.tier).or_default() += 1;
        for detection in &verdict.detections {
            self.total_detections += detection.match_count;
            *self
                .by_category
                .entry(detection.category.clone())
                .or_default() += detection.match_count;
        }
        self.verdicts.push(verdict);
    }

    pub fn record_tagged(&mut self) {
        self.objects_tagged += 1;
    }

    pub fn record_error(
        &mut self,
        key: impl Into<String>,
        stage: impl Into<String>,
        message: impl ToString,
    ) {
        self.errors.push(ObjectError {
            key: key.into(),
            stage: stage.into(),
            message: message.to_string(),
        });
    }

    /// Count service findings by their reported severity
    pub fn record_findings(&mut self, findings: &[FindingRecord]) {
        for finding in findings {
            *self
                .severity_distribution
                .entry(finding.severity)
                .or_default() += 1;
        }
    }

    pub fn count(&self, tier: SensitivityTier) -> u64 {
        self.by_tier.get(&tier).copied().unwrap_or(0)
    }

    pub fn verdict(&self, key: &str) -> Option<&ClassificationVerdict> {
        self.verdicts.iter().find(|v| v.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::TextEncoding;
    use crate::types::FindingDetection;

    fn text(s: &str) -> DecodedContent {
        DecodedContent::Text {
            encoding: TextEncoding::Utf8,
            text: s.to_string(),
        }
    }

    #[test]
    fn test_highest_tier_wins() {
        let matcher = PatternMatcher::with_defaults().unwrap();
        let v = classify_content(
            "mixed.txt",
            &text("contact a@b.com, rrn 900101-1234567"),
            &matcher,
        );
        assert_eq!(v.tier, SensitivityTier::High);
        assert_eq!(v.detections[0].tier, SensitivityTier::High);
        assert!(v
            .detections
            .iter()
            .any(|d| d.category == "email-address" && d.tier == SensitivityTier::Medium));
    }

    #[test]
    fn test_no_detections_is_none() {
        let matcher = PatternMatcher::with_defaults().unwrap();
        let v = classify_content("plain.txt", &text("nothing to see here"), &matcher);
        assert_eq!(v.tier, SensitivityTier::None);
        assert!(v.detections.is_empty());
    }

    #[test]
    fn test_forced_tiers() {
        let matcher = PatternMatcher::with_defaults().unwrap();
        let excluded = DecodedContent::Excluded {
            extension: "png".to_string(),
        };
        assert_eq!(
            classify_content("a.png", &excluded, &matcher).tier,
            SensitivityTier::None
        );
        assert_eq!(
            classify_content("blob", &DecodedContent::Undecodable, &matcher).tier,
            SensitivityTier::Low
        );
    }

    #[test]
    fn test_normalize_findings_uses_rule_table_then_severity() {
        let matcher = PatternMatcher::with_defaults().unwrap();
        let findings = vec![
            FindingRecord {
                id: "f-1".to_string(),
                bucket: "data".to_string(),
                key: "users.csv".to_string(),
                severity: SensitivityTier::Low,
                detections: vec![
                    FindingDetection {
                        category: "resident-id-number".to_string(),
                        count: 4,
                    },
                    FindingDetection {
                        category: "AWS_CREDENTIALS".to_string(),
                        count: 1,
                    },
                ],
            },
            FindingRecord {
                id: "f-2".to_string(),
                bucket: "data".to_string(),
                key: "users.csv".to_string(),
                severity: SensitivityTier::Medium,
                detections: vec![FindingDetection {
                    category: "resident-id-number".to_string(),
                    count: 2,
                }],
            },
            FindingRecord {
                id: "f-3".to_string(),
                bucket: "data".to_string(),
                key: "other.txt".to_string(),
                severity: SensitivityTier::Medium,
                detections: Vec::new(),
            },
        ];

        let grouped = normalize_findings(&findings, &matcher);
        assert_eq!(grouped.len(), 2);

        let users = &grouped[&ObjectRef::new("data", "users.csv")];
        let high = users.tier(SensitivityTier::High).unwrap();
        assert_eq!(high["resident-id-number"].count, 6);
        let low = users.tier(SensitivityTier::Low).unwrap();
        assert_eq!(low["AWS_CREDENTIALS"].count, 1);
        assert_eq!(verdict("users.csv", users).tier, SensitivityTier::High);

        let other = &grouped[&ObjectRef::new("data", "other.txt")];
        assert_eq!(other.highest_tier(), Some(SensitivityTier::Medium));
    }

    #[test]
    fn test_summary_counts() {
        let matcher = PatternMatcher::with_defaults().unwrap();
        let mut summary = ScanSummary::new("data");
        summary.record_verdict(classify_content(
            "a.txt",
            &text("a@b.com c@d.com"),
            &matcher,
        ));
        summary.record_verdict(classify_content("b.txt", &text("clean"), &matcher));
        summary.record_error("c.txt", "get", "AccessDenied");

        assert_eq!(summary.objects_scanned, 2);
        assert_eq!(summary.objects_affected, 1);
        assert_eq!(summary.count(SensitivityTier::Medium), 1);
        assert_eq!(summary.count(SensitivityTier::None), 1);
        assert_eq!(summary.by_category["email-address"], 2);
        assert_eq!(summary.total_detections, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.verdict("a.txt").unwrap().total_matches(), 2);
    }
}
