//! Sensitivity pattern matching
//!
//! A single table of named regex rules, each bound to a tier. Every rule is
//! applied independently to the decoded text; one object may produce
//! detections in several tiers at once.

use crate::error::{Result, SentinelError};
use crate::types::{CustomIdentifierSpec, DetectionRecord, SensitivityTier, TagSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Maximum distinct sample values kept per category
pub const MAX_SAMPLES: usize = 5;

/// A named detection rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    /// Category label, also used as the custom data identifier name
    pub name: String,
    pub pattern: String,
    pub tier: SensitivityTier,
    #[serde(default)]
    pub description: String,
}

impl PatternRule {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        tier: SensitivityTier,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            tier,
            description: description.into(),
        }
    }

    /// Custom data identifier request carrying this rule
    pub fn identifier_spec(&self, occurrence_threshold: u32) -> CustomIdentifierSpec {
        let mut tags = TagSet::new();
        tags.insert("Sensitivity".to_string(), self.tier.to_string());
        CustomIdentifierSpec {
            name: self.name.clone(),
            regex: self.pattern.clone(),
            description: self.description.clone(),
            severity: self.tier,
            occurrence_threshold,
            tags,
        }
    }
}

/// Built-in rule table
pub fn default_rules() -> Vec<PatternRule> {
    use SensitivityTier::{High, Low, Medium};
    vec![
        PatternRule::new(
            "resident-id-number",
            r"\b\d{6}-\d{7}\b",
            High,
            "Korean resident registration number",
        ),
        PatternRule::new(
            "credit-card-number",
            r"\b\d{4}-\d{4}-\d{4}-\d{4}\b",
            High,
            "16-digit card number in 4-4-4-4 form",
        ),
        PatternRule::new(
            "card-expiry",
            r"\b(0[1-9]|1[0-2])/[2-9][0-9]\b",
            High,
            "Card expiry date MM/YY",
        ),
        PatternRule::new(
            "internal-ip-address",
            r"\b(10\.\d{1,3}\.\d{1,3}\.\d{1,3}|192\.168\.\d{1,3}\.\d{1,3}|172\.(1[6-9]|2[0-9]|3[0-1])\.\d{1,3}\.\d{1,3})\b",
            High,
            "RFC 1918 address recorded in login history",
        ),
        PatternRule::new(
            "email-address",
            r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
            Medium,
            "Email address",
        ),
        PatternRule::new("korean-name", r"[가-힣]{2,4}", Medium, "Korean personal name"),
        PatternRule::new(
            "mobile-phone",
            r"\b010-\d{4}-\d{4}\b",
            Medium,
            "Korean mobile phone number",
        ),
        PatternRule::new(
            "login-timestamp",
            r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}",
            Medium,
            "ISO-8601 login time",
        ),
        PatternRule::new("korean-nickname", r"[가-힣]{5}", Low, "Five-syllable nickname"),
    ]
}

/// Hits for one category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryHits {
    pub count: u64,
    pub unique_count: u64,
    pub samples: Vec<String>,
}

impl CategoryHits {
    /// Fold another set of hits for the same category into this one
    ///
    /// Unique counts cannot be merged exactly without the full value sets,
    /// so the larger of the two is kept.
    pub fn merge(&mut self, other: &CategoryHits) {
        self.count += other.count;
        self.unique_count = self.unique_count.max(other.unique_count);
        for sample in &other.samples {
            if self.samples.len() >= MAX_SAMPLES {
                break;
            }
            if !self.samples.contains(sample) {
                self.samples.push(sample.clone());
            }
        }
    }
}

/// Per-tier detection map: tier → category → hits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionMap {
    tiers: BTreeMap<SensitivityTier, BTreeMap<String, CategoryHits>>,
}

impl DetectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record hits; empty hits (count 0) are ignored
    pub fn record(&mut self, tier: SensitivityTier, category: impl Into<String>, hits: CategoryHits) {
        if hits.count == 0 {
            return;
        }
        self.tiers
            .entry(tier)
            .or_default()
            .entry(category.into())
            .and_modify(|existing| existing.merge(&hits))
            .or_insert(hits);
    }

    /// Fold another map into this one
    pub fn merge(&mut self, other: &DetectionMap) {
        for (tier, categories) in &other.tiers {
            for (category, hits) in categories {
                self.record(*tier, category.clone(), hits.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.values().all(|c| c.is_empty())
    }

    /// Highest tier with at least one non-empty category
    pub fn highest_tier(&self) -> Option<SensitivityTier> {
        self.tiers
            .iter()
            .rev()
            .find(|(_, categories)| categories.values().any(|h| h.count > 0))
            .map(|(tier, _)| *tier)
    }

    /// Total hit count across all tiers
    pub fn total(&self) -> u64 {
        self.tiers
            .values()
            .flat_map(|c| c.values())
            .map(|h| h.count)
            .sum()
    }

    pub fn tier(&self, tier: SensitivityTier) -> Option<&BTreeMap<String, CategoryHits>> {
        self.tiers.get(&tier)
    }

    /// Flatten into records, highest tier first
    pub fn records(&self, key: &str) -> Vec<DetectionRecord> {
        self.tiers
            .iter()
            .rev()
            .flat_map(|(tier, categories)| {
                categories.iter().map(move |(category, hits)| DetectionRecord {
                    category: category.clone(),
                    tier: *tier,
                    match_count: hits.count,
                    unique_count: hits.unique_count,
                    samples: hits.samples.clone(),
                    key: key.to_string(),
                })
            })
            .collect()
    }
}

struct CompiledRule {
    name: String,
    regex: Regex,
    tier: SensitivityTier,
}

/// Compiled, read-only rule table
pub struct PatternMatcher {
    rules: Vec<CompiledRule>,
    source: Vec<PatternRule>,
}

impl PatternMatcher {
    /// Compile a rule table; fails on the first invalid regex
    pub fn new(rules: &[PatternRule]) -> Result<Self> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| SentinelError::InvalidPattern {
                    name: rule.name.clone(),
                    reason: e.to_string(),
                })?;
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    regex,
                    tier: rule.tier,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules: compiled,
            source: rules.to_vec(),
        })
    }

    /// Matcher over the built-in table
    pub fn with_defaults() -> Result<Self> {
        Self::new(&default_rules())
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.source
    }

    /// Tier bound to a rule name
    pub fn tier_of(&self, name: &str) -> Option<SensitivityTier> {
        self.rules.iter().find(|r| r.name == name).map(|r| r.tier)
    }

    /// Apply every rule to `text`
    pub fn scan(&self, text: &str) -> DetectionMap {
        let mut map = DetectionMap::new();

        for rule in &self.rules {
            let mut count = 0u64;
            let mut seen: HashSet<&str> = HashSet::new();
            let mut samples = Vec::new();

            for m in rule.regex.find_iter(text) {
                count += 1;
                if seen.insert(m.as_str()) && samples.len() < MAX_SAMPLES {
                    samples.push(m.as_str().to_string());
                }
            }

            if count > 0 {
                map.record(
                    rule.tier,
                    rule.name.clone(),
                    CategoryHits {
                        count,
                        unique_count: seen.len() as u64,
                        samples,
                    },
                );
            }
        }

        map
    }
}
