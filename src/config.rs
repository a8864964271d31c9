//! Sentinel configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file
//! (or no file) gives a working configuration with the built-in rule table.

use crate::decoder::{default_binary_extensions, default_encodings, TextEncoding};
use crate::error::{Result, SentinelError};
use crate::patterns::{default_rules, PatternMatcher, PatternRule};
use crate::provider::nats::NatsNotifierConfig;
use crate::provider::MAX_FINDINGS_BATCH;
use crate::responder::TrustedNetwork;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub scan: ScanConfig,

    /// Pattern table; empty means the built-in table
    #[serde(default)]
    pub rules: Vec<PatternRule>,

    #[serde(default)]
    pub macie: MacieConfig,

    #[serde(default)]
    pub responder: ResponderConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub aws: AwsConfig,
}

/// Local scan and tagging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Object tag holding the sensitivity tier
    #[serde(default = "default_tag_key")]
    pub tag_key: String,

    /// Encodings tried in order when decoding object content
    #[serde(default = "default_encodings")]
    pub encodings: Vec<TextEncoding>,

    /// Extensions whose objects are never decoded
    #[serde(default = "default_binary_extensions")]
    pub binary_extensions: Vec<String>,

    /// Where to write the JSON detection export, if anywhere
    #[serde(default)]
    pub export_path: Option<PathBuf>,
}

fn default_tag_key() -> String {
    "sensitivity".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tag_key: default_tag_key(),
            encodings: default_encodings(),
            binary_extensions: default_binary_extensions(),
            export_path: None,
        }
    }
}

/// Classification job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacieConfig {
    /// Seconds between job status checks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Give up waiting for the job after this many seconds
    #[serde(default = "default_job_timeout_secs")]
    pub timeout_secs: u64,

    /// Finding ids resolved per request (at most 50)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between finding batches in milliseconds
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Matches required before a custom identifier reports
    #[serde(default = "default_occurrence_threshold")]
    pub occurrence_threshold: u32,

    /// Only findings created within this many hours are retrieved
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,

    #[serde(default = "default_job_name_prefix")]
    pub job_name_prefix: String,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    MAX_FINDINGS_BATCH
}

fn default_batch_delay_ms() -> u64 {
    200
}

fn default_occurrence_threshold() -> u32 {
    1
}

fn default_lookback_hours() -> u32 {
    24
}

fn default_job_name_prefix() -> String {
    "dlp-sentinel".to_string()
}

impl Default for MacieConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_job_timeout_secs(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            occurrence_threshold: default_occurrence_threshold(),
            lookback_hours: default_lookback_hours(),
            job_name_prefix: default_job_name_prefix(),
        }
    }
}

impl MacieConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Access responder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Principal ARNs allowed to read HIGH objects
    #[serde(default)]
    pub authorized_principals: Vec<String>,

    /// CIDR blocks considered trusted source networks
    #[serde(default)]
    pub trusted_networks: Vec<String>,

    /// Disable offending IAM users
    #[serde(default = "default_true")]
    pub disable_principal: bool,

    /// Suppress redelivered events for this many seconds (0 disables)
    #[serde(default)]
    pub dedup_ttl_secs: u64,

    #[serde(default = "default_alert_subject")]
    pub alert_subject: String,

    #[serde(default = "default_malformed_subject")]
    pub malformed_subject: String,
}

fn default_true() -> bool {
    true
}

fn default_alert_subject() -> String {
    "Unauthorized Access to HIGH Sensitivity Object".to_string()
}

fn default_malformed_subject() -> String {
    "Malformed Access Event Received".to_string()
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            authorized_principals: Vec::new(),
            trusted_networks: Vec::new(),
            disable_principal: default_true(),
            dedup_ttl_secs: 0,
            alert_subject: default_alert_subject(),
            malformed_subject: default_malformed_subject(),
        }
    }
}

/// Alert channels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// SNS topic for the primary alert channel
    #[serde(default)]
    pub sns_topic_arn: Option<String>,

    /// Sender address for the email report
    #[serde(default)]
    pub email_sender: Option<String>,

    #[serde(default)]
    pub email_recipients: Vec<String>,

    /// Publish alerts to NATS instead of SNS
    #[serde(default)]
    pub nats: Option<NatsNotifierConfig>,
}

/// AWS client settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub profile: Option<String>,
}

impl SentinelConfig {
    /// Parse TOML text and validate it
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SentinelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Active rule table
    pub fn rules(&self) -> Vec<PatternRule> {
        if self.rules.is_empty() {
            default_rules()
        } else {
            self.rules.clone()
        }
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.scan.tag_key.trim().is_empty() {
            return Err(SentinelError::Config("scan.tag_key must not be empty".into()));
        }
        if self.scan.encodings.is_empty() {
            return Err(SentinelError::Config(
                "scan.encodings must list at least one encoding".into(),
            ));
        }
        if self.macie.poll_interval_secs == 0 {
            return Err(SentinelError::Config(
                "macie.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.macie.timeout_secs < self.macie.poll_interval_secs {
            return Err(SentinelError::Config(format!(
                "macie.timeout_secs ({}) is shorter than one poll interval ({})",
                self.macie.timeout_secs, self.macie.poll_interval_secs
            )));
        }
        if self.macie.batch_size == 0 || self.macie.batch_size > MAX_FINDINGS_BATCH {
            return Err(SentinelError::Config(format!(
                "macie.batch_size must be between 1 and {}, got {}",
                MAX_FINDINGS_BATCH, self.macie.batch_size
            )));
        }
        for cidr in &self.responder.trusted_networks {
            cidr.parse::<TrustedNetwork>().map_err(SentinelError::Config)?;
        }
        if self.notify.email_sender.is_some() && self.notify.email_recipients.is_empty() {
            return Err(SentinelError::Config(
                "notify.email_sender is set but notify.email_recipients is empty".into(),
            ));
        }
        PatternMatcher::new(&self.rules())?;
        Ok(())
    }
}
