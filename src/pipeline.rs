//! End-to-end classification runs
//!
//! Two sources feed the same verdict and tagging path:
//! - [`BucketScanner`] decodes and pattern-matches every object locally
//! - [`MaciePipeline`] runs a classification job and normalizes its findings
//!
//! Objects are processed one at a time. A failure on one object is recorded
//! in the summary and the run moves on to the next.

use crate::aggregate::{self, classify_content, ScanSummary};
use crate::config::SentinelConfig;
use crate::decoder::{ContentDecoder, DecodedContent};
use crate::error::{Result, SentinelError};
use crate::export::DetectionExport;
use crate::orchestrator::JobOrchestrator;
use crate::patterns::{PatternMatcher, PatternRule};
use crate::provider::{ClassificationService, ObjectStore};
use crate::tagging::TagReconciler;
use crate::types::{ClassificationVerdict, ObjectRef, TerminalStatus};
use std::sync::Arc;

async fn tag_and_record(
    tags: &TagReconciler,
    summary: &mut ScanSummary,
    object: &ObjectRef,
    verdict: ClassificationVerdict,
    raise_only: bool,
) {
    let written = if raise_only {
        tags.raise_tag(object, verdict.tier).await
    } else {
        tags.apply_tag(object, verdict.tier).await
    };
    match written {
        Ok(_) => summary.record_tagged(),
        Err(e) => {
            tracing::warn!(object = %object, tier = %verdict.tier, error = %e, "Tagging failed");
            summary.record_error(&object.key, "tag", e);
        }
    }
    summary.record_verdict(verdict);
}

fn write_export(export: Option<&DetectionExport>, summary: &mut ScanSummary) {
    let Some(export) = export else {
        return;
    };
    let records: Vec<_> = summary
        .verdicts
        .iter()
        .flat_map(|v| v.detections.iter().cloned())
        .collect();
    if let Err(e) = export.write(&records) {
        tracing::warn!(path = %export.path().display(), error = %e, "Export failed");
        summary.record_error(export.path().display().to_string(), "export", e);
    }
}

/// Local regex classification over a bucket
pub struct BucketScanner {
    store: Arc<dyn ObjectStore>,
    decoder: ContentDecoder,
    matcher: PatternMatcher,
    tags: TagReconciler,
    export: Option<DetectionExport>,
}

impl BucketScanner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        decoder: ContentDecoder,
        matcher: PatternMatcher,
        tags: TagReconciler,
    ) -> Self {
        Self {
            store,
            decoder,
            matcher,
            tags,
            export: None,
        }
    }

    /// Build from configuration: rule table, encodings, tag key, export path
    pub fn from_config(store: Arc<dyn ObjectStore>, config: &SentinelConfig) -> Result<Self> {
        let matcher = PatternMatcher::new(&config.rules())?;
        let decoder = ContentDecoder::new(
            config.scan.encodings.clone(),
            config.scan.binary_extensions.clone(),
        );
        let tags = TagReconciler::new(store.clone(), &config.scan.tag_key);
        let mut scanner = Self::new(store, decoder, matcher, tags);
        if let Some(ref path) = config.scan.export_path {
            scanner = scanner.with_export(DetectionExport::new(path));
        }
        Ok(scanner)
    }

    pub fn with_export(mut self, export: DetectionExport) -> Self {
        self.export = Some(export);
        self
    }

    async fn fetch_content(&self, object: &ObjectRef) -> Result<DecodedContent> {
        let bytes = self.store.get_object(object).await?;
        Ok(self.decoder.decode(&object.key, &bytes))
    }

    /// Fetch, decode and classify one object without tagging it
    pub async fn classify_object(&self, object: &ObjectRef) -> Result<ClassificationVerdict> {
        let content = self.fetch_content(object).await?;
        Ok(self.classify(object, &content))
    }

    fn classify(&self, object: &ObjectRef, content: &DecodedContent) -> ClassificationVerdict {
        let verdict = classify_content(&object.key, content, &self.matcher);
        tracing::debug!(
            object = %object,
            tier = %verdict.tier,
            detections = verdict.detections.len(),
            "Object classified"
        );
        verdict
    }

    /// Classify and tag every object in `bucket`
    ///
    /// Undecodable objects are still tagged LOW and are also listed in the
    /// summary errors under the `decode` stage.
    pub async fn scan_bucket(&self, bucket: &str) -> ScanSummary {
        let mut summary = ScanSummary::new(bucket);
        let mut continuation: Option<String> = None;

        tracing::info!(bucket, store = self.store.name(), "Bucket scan started");

        loop {
            let page = match self
                .store
                .list_objects(bucket, continuation.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(bucket, error = %e, "Listing failed, scan stopped early");
                    summary.record_error("", "list", e);
                    break;
                }
            };

            for entry in &page.objects {
                let object = ObjectRef::new(bucket, &entry.key);
                match self.fetch_content(&object).await {
                    Ok(content) => {
                        if matches!(content, DecodedContent::Undecodable) {
                            let e = SentinelError::ContentDecode {
                                key: entry.key.clone(),
                            };
                            tracing::warn!(object = %object, error = %e, "Content undecodable, tagging LOW");
                            summary.record_error(&entry.key, "decode", e);
                        }
                        let verdict = self.classify(&object, &content);
                        tag_and_record(&self.tags, &mut summary, &object, verdict, false).await
                    }
                    Err(e) => {
                        tracing::warn!(object = %object, error = %e, "Object skipped");
                        summary.record_error(&entry.key, "get", e);
                    }
                }
            }

            continuation = page.next_token;
            if continuation.is_none() {
                break;
            }
        }

        write_export(self.export.as_ref(), &mut summary);
        tracing::info!(
            bucket,
            scanned = summary.objects_scanned,
            affected = summary.objects_affected,
            errors = summary.errors.len(),
            "Bucket scan finished"
        );
        summary
    }
}

/// Classification-service run over a bucket
pub struct MaciePipeline {
    orchestrator: JobOrchestrator,
    rules: Vec<PatternRule>,
    matcher: PatternMatcher,
    tags: TagReconciler,
    export: Option<DetectionExport>,
}

impl MaciePipeline {
    pub fn new(
        orchestrator: JobOrchestrator,
        rules: Vec<PatternRule>,
        tags: TagReconciler,
    ) -> Result<Self> {
        let matcher = PatternMatcher::new(&rules)?;
        Ok(Self {
            orchestrator,
            rules,
            matcher,
            tags,
            export: None,
        })
    }

    pub fn from_config(
        service: Arc<dyn ClassificationService>,
        store: Arc<dyn ObjectStore>,
        config: &SentinelConfig,
    ) -> Result<Self> {
        let orchestrator = JobOrchestrator::new(service, config.macie.clone());
        let tags = TagReconciler::new(store, &config.scan.tag_key);
        let mut pipeline = Self::new(orchestrator, config.rules(), tags)?;
        if let Some(ref path) = config.scan.export_path {
            pipeline.export = Some(DetectionExport::new(path));
        }
        Ok(pipeline)
    }

    pub fn with_export(mut self, export: DetectionExport) -> Self {
        self.export = Some(export);
        self
    }

    /// Register identifiers, run a job over `bucket`, and tag from its findings
    ///
    /// Fails if no identifier could be created, if the job cannot be
    /// submitted, or if it does not complete. Per-object tagging and
    /// per-batch retrieval failures are recorded in the summary instead.
    ///
    /// Identifiers left over from an earlier run are reused by name, so the
    /// same bucket can be run again.
    ///
    /// When retrieval lost a batch, an object's findings may be incomplete.
    /// Tags are then only raised, never lowered.
    ///
    /// Only objects with findings in this job are tagged. An object with no
    /// findings keeps whatever tag an earlier run left on it; run a local
    /// [`BucketScanner`] pass to reset such objects.
    pub async fn run(&self, bucket: &str) -> Result<ScanSummary> {
        let mut summary = ScanSummary::new(bucket);

        let identifiers = self.orchestrator.create_identifiers(&self.rules).await;
        for (name, reason) in &identifiers.failed {
            summary.record_error(name, "identifier", reason);
        }
        if identifiers.created.is_empty() {
            return Err(SentinelError::external(
                "macie2",
                "CreateCustomDataIdentifier",
                "no custom data identifier could be created",
            ));
        }

        let job_id = self
            .orchestrator
            .create_job(bucket, &identifiers.ids())
            .await?;
        let outcome = self.orchestrator.wait(&job_id).await?;

        match outcome.status {
            TerminalStatus::Complete => {}
            TerminalStatus::TimedOut => {
                return Err(SentinelError::JobTimeout {
                    job_id,
                    waited_secs: self.orchestrator.config().timeout_secs,
                })
            }
            status => {
                return Err(SentinelError::JobIncomplete {
                    job_id,
                    status: status.to_string(),
                })
            }
        }

        let criteria = self.orchestrator.criteria_for(&job_id);
        let retrieval = self
            .orchestrator
            .retrieve_findings(&outcome, &criteria)
            .await?;
        for error in &retrieval.errors {
            summary.record_error("", "findings", error);
        }
        let raise_only = retrieval.is_partial();
        if raise_only {
            tracing::warn!(
                job_id = %job_id,
                errors = retrieval.errors.len(),
                "Finding retrieval incomplete; tags will only be raised"
            );
        }

        let findings: Vec<_> = retrieval
            .findings
            .into_iter()
            .filter(|f| f.bucket == bucket)
            .collect();
        summary.record_findings(&findings);

        for (object, detections) in aggregate::normalize_findings(&findings, &self.matcher) {
            let verdict = aggregate::verdict(&object.key, &detections);
            tag_and_record(&self.tags, &mut summary, &object, verdict, raise_only).await;
        }

        write_export(self.export.as_ref(), &mut summary);
        tracing::info!(
            bucket,
            job_id = %job_id,
            findings = findings.len(),
            affected = summary.objects_affected,
            errors = summary.errors.len(),
            "Classification job run finished"
        );
        Ok(summary)
    }
}
