//! Classification job orchestration
//!
//! Registers custom data identifiers, submits a one-time job, polls it to a
//! terminal state under a caller-supplied timeout, and pages through its
//! findings in bounded batches.

use crate::config::MacieConfig;
use crate::error::{Result, SentinelError};
use crate::patterns::PatternRule;
use crate::provider::{ClassificationService, MAX_FINDINGS_BATCH};
use crate::types::{
    ClassificationJobSpec, CustomIdentifierSpec, FindingCriteria, FindingRecord, TerminalStatus,
};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Result of registering a batch of identifiers
#[derive(Debug, Clone, Default)]
pub struct IdentifierBatch {
    /// (name, identifier id) for every identifier created
    pub created: Vec<(String, String)>,
    /// (name, reason) for every identifier the service rejected
    pub failed: Vec<(String, String)>,
}

impl IdentifierBatch {
    pub fn ids(&self) -> Vec<String> {
        self.created.iter().map(|(_, id)| id.clone()).collect()
    }
}

/// How a submitted job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: TerminalStatus,
}

/// Findings gathered for one job
#[derive(Debug, Clone, Default)]
pub struct FindingRetrieval {
    pub findings: Vec<FindingRecord>,
    /// Number of `get_findings` requests issued
    pub batches: usize,
    /// Failures that cut retrieval short or lost a batch
    pub errors: Vec<String>,
}

impl FindingRetrieval {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Drives one classification job against a [`ClassificationService`]
pub struct JobOrchestrator {
    service: Arc<dyn ClassificationService>,
    config: MacieConfig,
}

impl JobOrchestrator {
    pub fn new(service: Arc<dyn ClassificationService>, config: MacieConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &MacieConfig {
        &self.config
    }

    /// Register one custom data identifier
    pub async fn create_identifier(&self, spec: &CustomIdentifierSpec) -> Result<String> {
        let id = self.service.create_custom_data_identifier(spec).await?;
        tracing::info!(name = %spec.name, identifier_id = %id, "Custom data identifier created");
        Ok(id)
    }

    /// Register an identifier per rule
    ///
    /// When creation fails but an identifier with the rule's name is already
    /// registered (a previous run), that identifier is reused. Anything else
    /// rejected is logged and left out; the rest of the batch still goes
    /// through.
    pub async fn create_identifiers(&self, rules: &[PatternRule]) -> IdentifierBatch {
        let mut batch = IdentifierBatch::default();

        for rule in rules {
            let spec = rule.identifier_spec(self.config.occurrence_threshold);
            match self.create_identifier(&spec).await {
                Ok(id) => batch.created.push((rule.name.clone(), id)),
                Err(e) => match self.service.find_custom_data_identifier(&rule.name).await {
                    Ok(Some(id)) => {
                        tracing::info!(name = %rule.name, identifier_id = %id, "Reusing existing custom data identifier");
                        batch.created.push((rule.name.clone(), id));
                    }
                    Ok(None) => {
                        tracing::warn!(name = %rule.name, error = %e, "Custom data identifier not created");
                        batch.failed.push((rule.name.clone(), e.to_string()));
                    }
                    Err(lookup) => {
                        tracing::warn!(name = %rule.name, error = %e, lookup_error = %lookup, "Custom data identifier not created");
                        batch.failed.push((rule.name.clone(), format!("{}; lookup failed: {}", e, lookup)));
                    }
                },
            }
        }

        batch
    }

    /// Submit a one-time job over `bucket`
    pub async fn create_job(&self, bucket: &str, identifier_ids: &[String]) -> Result<String> {
        let spec = ClassificationJobSpec {
            bucket: bucket.to_string(),
            name: format!(
                "{}-{}",
                self.config.job_name_prefix,
                Utc::now().format("%Y%m%d%H%M%S")
            ),
            identifier_ids: identifier_ids.to_vec(),
            client_token: uuid::Uuid::new_v4().to_string(),
        };

        let job_id = self.service.create_classification_job(&spec).await?;
        tracing::info!(
            bucket,
            job_id = %job_id,
            name = %spec.name,
            identifiers = identifier_ids.len(),
            "Classification job created"
        );
        Ok(job_id)
    }

    /// Poll until the job reaches a terminal status or `timeout` elapses
    ///
    /// Sleeps `interval` after every non-terminal status. Running out of
    /// time yields `TimedOut`, never `Complete`. A failed status call ends
    /// polling with the error.
    pub async fn poll_until_terminal(
        &self,
        job_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<TerminalStatus> {
        let poll = async {
            loop {
                let status = self.service.describe_job(job_id).await?;
                if let Some(terminal) = status.terminal() {
                    return Ok::<_, SentinelError>(terminal);
                }
                tracing::debug!(job_id, status = ?status, "Job still running");
                tokio::time::sleep(interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(terminal)) => {
                tracing::info!(job_id, status = %terminal, "Job finished");
                Ok(terminal)
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id, error = %e, "Job status check failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(job_id, timeout_secs = timeout.as_secs(), "Job polling timed out");
                Ok(TerminalStatus::TimedOut)
            }
        }
    }

    /// Poll with the configured interval and timeout
    pub async fn wait(&self, job_id: &str) -> Result<JobOutcome> {
        let status = self
            .poll_until_terminal(job_id, self.config.poll_interval(), self.config.timeout())
            .await?;
        Ok(JobOutcome {
            job_id: job_id.to_string(),
            status,
        })
    }

    /// Criteria for a job's sensitive-data findings inside the lookback window
    pub fn criteria_for(&self, job_id: &str) -> FindingCriteria {
        FindingCriteria {
            job_id: Some(job_id.to_string()),
            created_after: Some(
                Utc::now() - chrono::Duration::hours(i64::from(self.config.lookback_hours)),
            ),
            sensitive_data_only: true,
        }
    }

    /// Fetch every finding matching `criteria` for a completed job
    ///
    /// Ids are deduplicated and resolved in batches of at most
    /// `batch_size`, with a short pause between batches. A failed batch is
    /// recorded and skipped; a failed listing call stops paging. Findings
    /// already fetched are kept in both cases.
    pub async fn retrieve_findings(
        &self,
        job: &JobOutcome,
        criteria: &FindingCriteria,
    ) -> Result<FindingRetrieval> {
        if job.status != TerminalStatus::Complete {
            return Err(SentinelError::JobIncomplete {
                job_id: job.job_id.clone(),
                status: job.status.to_string(),
            });
        }

        let batch_size = self.config.batch_size.clamp(1, MAX_FINDINGS_BATCH);
        let mut retrieval = FindingRetrieval::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pending: VecDeque<String> = VecDeque::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = match self
                .service
                .list_finding_ids(criteria, next_token.as_deref(), batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Finding listing failed");
                    retrieval.errors.push(e.to_string());
                    break;
                }
            };

            pending.extend(page.ids.into_iter().filter(|id| seen.insert(id.clone())));
            while pending.len() >= batch_size {
                let batch: Vec<String> = pending.drain(..batch_size).collect();
                self.fetch_batch(&batch, &mut retrieval).await;
            }

            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        if !pending.is_empty() {
            let batch: Vec<String> = pending.drain(..).collect();
            self.fetch_batch(&batch, &mut retrieval).await;
        }

        tracing::info!(
            job_id = %job.job_id,
            findings = retrieval.findings.len(),
            batches = retrieval.batches,
            errors = retrieval.errors.len(),
            "Findings retrieved"
        );
        Ok(retrieval)
    }

    async fn fetch_batch(&self, ids: &[String], retrieval: &mut FindingRetrieval) {
        if retrieval.batches > 0 {
            tokio::time::sleep(self.config.batch_delay()).await;
        }
        retrieval.batches += 1;

        match self.service.get_findings(ids).await {
            Ok(findings) => {
                tracing::debug!(requested = ids.len(), received = findings.len(), "Finding batch fetched");
                retrieval.findings.extend(findings);
            }
            Err(e) => {
                tracing::warn!(batch = retrieval.batches, size = ids.len(), error = %e, "Finding batch failed");
                retrieval.errors.push(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::default_rules;
    use crate::provider::memory::MemoryClassificationService;
    use crate::types::{FindingDetection, JobStatus, SensitivityTier};

    fn finding(i: usize) -> FindingRecord {
        FindingRecord {
            id: format!("finding-{:03}", i),
            bucket: "data".to_string(),
            key: format!("obj-{}.csv", i % 7),
            severity: SensitivityTier::High,
            detections: vec![FindingDetection {
                category: "resident-id-number".to_string(),
                count: 1,
            }],
        }
    }

    fn orchestrator(svc: Arc<MemoryClassificationService>) -> JobOrchestrator {
        JobOrchestrator::new(svc, MacieConfig::default())
    }

    fn complete(job_id: &str) -> JobOutcome {
        JobOutcome {
            job_id: job_id.to_string(),
            status: TerminalStatus::Complete,
        }
    }

    #[tokio::test]
    async fn test_identifier_failures_are_skipped() {
        let svc = Arc::new(MemoryClassificationService::default());
        svc.reject_identifier("email-address").await;
        let orch = orchestrator(svc.clone());

        let batch = orch.create_identifiers(&default_rules()).await;
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0, "email-address");
        assert_eq!(batch.created.len(), default_rules().len() - 1);
        assert_eq!(svc.identifiers().await.len(), default_rules().len() - 1);
        assert!(svc
            .identifiers()
            .await
            .iter()
            .all(|spec| spec.occurrence_threshold == 1));
    }

    #[tokio::test]
    async fn test_existing_identifiers_are_reused() {
        let svc = Arc::new(MemoryClassificationService::default());
        let orch = orchestrator(svc.clone());

        let first = orch.create_identifiers(&default_rules()).await;
        let second = orch.create_identifiers(&default_rules()).await;

        assert!(second.failed.is_empty());
        assert_eq!(second.ids(), first.ids());
        assert_eq!(svc.identifiers().await.len(), default_rules().len());
    }

    #[tokio::test]
    async fn test_create_job_uses_fresh_token() {
        let svc = Arc::new(MemoryClassificationService::default());
        let orch = orchestrator(svc.clone());
        let a = orch.create_job("data", &["cdi-1".to_string()]).await.unwrap();
        let b = orch.create_job("data", &["cdi-1".to_string()]).await.unwrap();
        assert_ne!(a, b);

        let jobs = svc.jobs().await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.name.starts_with("dlp-sentinel-")));
    }

    #[tokio::test]
    async fn test_job_creation_failure_propagates() {
        let svc = Arc::new(MemoryClassificationService::default());
        svc.fail_job_creation(true);
        let result = orchestrator(svc).create_job("data", &[]).await;
        assert!(matches!(result, Err(SentinelError::ExternalService { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_sleeps_between_checks() {
        let svc = Arc::new(MemoryClassificationService::new(vec![
            JobStatus::Running,
            JobStatus::Running,
            JobStatus::Complete,
        ]));
        let orch = orchestrator(svc.clone());
        let job_id = orch.create_job("data", &[]).await.unwrap();

        let start = tokio::time::Instant::now();
        let status = orch
            .poll_until_terminal(&job_id, Duration::from_secs(30), Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(status, TerminalStatus::Complete);
        assert_eq!(svc.describe_calls(), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out() {
        let svc = Arc::new(MemoryClassificationService::new(vec![JobStatus::Running]));
        let orch = orchestrator(svc.clone());
        let job_id = orch.create_job("data", &[]).await.unwrap();

        let status = orch
            .poll_until_terminal(&job_id, Duration::from_secs(30), Duration::from_secs(95))
            .await
            .unwrap();

        assert_eq!(status, TerminalStatus::TimedOut);
        assert_eq!(svc.describe_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_reports_cancelled() {
        let svc = Arc::new(MemoryClassificationService::new(vec![
            JobStatus::Idle,
            JobStatus::Cancelled,
        ]));
        let orch = orchestrator(svc.clone());
        let job_id = orch.create_job("data", &[]).await.unwrap();
        let outcome = orch.wait(&job_id).await.unwrap();
        assert_eq!(outcome.status, TerminalStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_poll_status_error_propagates() {
        let svc = Arc::new(MemoryClassificationService::default());
        let result = orchestrator(svc)
            .poll_until_terminal("job-missing", Duration::from_secs(1), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(SentinelError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieve_120_findings_in_three_batches() {
        let svc = Arc::new(MemoryClassificationService::default());
        svc.add_findings((0..120).map(finding)).await;
        let orch = orchestrator(svc.clone());

        let criteria = orch.criteria_for("job-1");
        let retrieval = orch
            .retrieve_findings(&complete("job-1"), &criteria)
            .await
            .unwrap();

        assert_eq!(retrieval.batches, 3);
        assert_eq!(svc.batch_sizes().await, vec![50, 50, 20]);
        assert_eq!(retrieval.findings.len(), 120);
        let unique: HashSet<_> = retrieval.findings.iter().map(|f| &f.id).collect();
        assert_eq!(unique.len(), 120);
        assert!(!retrieval.is_partial());

        let seen = svc.criteria_seen().await;
        assert!(seen.iter().all(|c| c.sensitive_data_only));
        assert_eq!(seen[0].job_id.as_deref(), Some("job-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_keeps_earlier_findings() {
        let svc = Arc::new(MemoryClassificationService::default());
        svc.add_findings((0..120).map(finding)).await;
        svc.fail_findings_batch(1).await;
        let orch = orchestrator(svc.clone());

        let retrieval = orch
            .retrieve_findings(&complete("job-1"), &FindingCriteria::default())
            .await
            .unwrap();

        assert_eq!(retrieval.batches, 3);
        assert_eq!(retrieval.findings.len(), 70);
        assert_eq!(retrieval.errors.len(), 1);
        assert!(retrieval.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_fetched_once() {
        let svc = Arc::new(MemoryClassificationService::default());
        svc.add_findings((0..10).map(finding)).await;
        svc.add_findings((0..10).map(finding)).await;
        let orch = orchestrator(svc.clone());

        let retrieval = orch
            .retrieve_findings(&complete("job-1"), &FindingCriteria::default())
            .await
            .unwrap();
        assert_eq!(retrieval.findings.len(), 10);
        assert_eq!(retrieval.batches, 1);
    }

    #[tokio::test]
    async fn test_incomplete_job_has_no_findings() {
        let svc = Arc::new(MemoryClassificationService::default());
        let orch = orchestrator(svc.clone());
        let job = JobOutcome {
            job_id: "job-1".to_string(),
            status: TerminalStatus::TimedOut,
        };

        let result = orch.retrieve_findings(&job, &FindingCriteria::default()).await;
        assert!(matches!(result, Err(SentinelError::JobIncomplete { .. })));
        assert_eq!(svc.get_findings_calls(), 0);
    }
}
