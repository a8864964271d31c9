//! # dlp-sentinel
//!
//! Sensitivity classification, object tagging and access response for
//! object-storage data.
//!
//! ## Overview
//!
//! `dlp-sentinel` classifies the objects of a bucket into sensitivity tiers
//! (HIGH, MEDIUM, LOW, NONE), records the tier as an object tag, and reacts
//! to access events against HIGH objects by alerting and optionally
//! disabling the principal. Classification runs either locally with a regex
//! rule table or through a managed classification service.
//!
//! ## Quick Start
//!
//! ```rust
//! use dlp_sentinel::{BucketScanner, SentinelConfig};
//! use dlp_sentinel::provider::memory::MemoryObjectStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> dlp_sentinel::Result<()> {
//! let store = Arc::new(MemoryObjectStore::default());
//! store.insert("records", "users.csv", "990101-1234567,kim@example.com").await;
//!
//! let scanner = BucketScanner::from_config(store, &SentinelConfig::default())?;
//! let summary = scanner.scan_bucket("records").await;
//!
//! println!("{} objects affected", summary.objects_affected);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: In-memory backends for testing, with failure injection
//! - **nats**: Alert publishing over NATS core or JetStream
//! - **aws**: S3, Macie, IAM, SNS and SES backends (feature `aws`)
//!
//! ## Architecture
//!
//! - **ContentDecoder** / **PatternMatcher**: bytes to text to detections
//! - **JobOrchestrator**: classification job lifecycle and finding retrieval
//! - **TagReconciler**: the single writer of the sensitivity tag
//! - **AccessResponder**: event evaluation, principal disable, alert fan-out

pub mod aggregate;
pub mod config;
pub mod decoder;
pub mod dedup;
pub mod error;
pub mod event;
pub mod export;
pub mod orchestrator;
pub mod patterns;
pub mod pipeline;
pub mod provider;
pub mod responder;
pub mod tagging;
pub mod types;

// Re-export core types
pub use aggregate::{ObjectError, ScanSummary};
pub use config::{
    AwsConfig, MacieConfig, NotifyConfig, ResponderConfig, ScanConfig, SentinelConfig,
};
pub use decoder::{ContentDecoder, DecodedContent, TextEncoding};
pub use dedup::EventDeduplicator;
pub use error::{Result, SentinelError};
pub use event::{parse_access_event, split_records};
pub use export::DetectionExport;
pub use orchestrator::{FindingRetrieval, IdentifierBatch, JobOrchestrator, JobOutcome};
pub use patterns::{default_rules, DetectionMap, PatternMatcher, PatternRule};
pub use pipeline::{BucketScanner, MaciePipeline};
pub use provider::{ClassificationService, IdentityService, Notifier, ObjectStore};
pub use responder::{AccessResponder, Decision, IgnoreReason, ResponseReport, TrustedNetwork};
pub use tagging::TagReconciler;
pub use types::{
    AccessEvent, Alert, AlertKind, ClassificationVerdict, DetectionRecord, FindingRecord,
    JobStatus, ObjectRef, SensitivityTier, TerminalStatus,
};

// Re-export providers for convenience
pub use provider::memory::{
    MemoryClassificationService, MemoryIdentityService, MemoryNotifier, MemoryObjectStore,
};
pub use provider::nats::{NatsNotifier, NatsNotifierConfig};
