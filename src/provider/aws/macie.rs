//! Macie classification service

use super::sdk_error;
use crate::error::{Result, SentinelError};
use crate::provider::{ClassificationService, MAX_FINDINGS_BATCH};
use crate::types::{
    ClassificationJobSpec, CustomIdentifierSpec, FindingCriteria, FindingDetection,
    FindingIdPage, FindingRecord, JobStatus, SensitivityTier,
};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_macie2::types::{
    CriterionAdditionalProperties, DataIdentifierSeverity, Finding, JobType,
    ManagedDataIdentifierSelector, S3BucketDefinitionForJob, S3JobDefinition, SeverityLevel,
};
use std::collections::HashMap;

/// Macie2-backed classification service
///
/// Jobs are always scoped to buckets of the account the credentials
/// belong to.
pub struct MacieClassifier {
    client: aws_sdk_macie2::Client,
    account_id: String,
}

impl MacieClassifier {
    pub fn new(sdk: &SdkConfig, account_id: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_macie2::Client::new(sdk),
            account_id: account_id.into(),
        }
    }
}

fn macie_severity(tier: SensitivityTier) -> DataIdentifierSeverity {
    match tier {
        SensitivityTier::High => DataIdentifierSeverity::High,
        SensitivityTier::Medium => DataIdentifierSeverity::Medium,
        SensitivityTier::Low | SensitivityTier::None => DataIdentifierSeverity::Low,
    }
}

fn criteria_to_macie(criteria: &FindingCriteria) -> aws_sdk_macie2::types::FindingCriteria {
    let mut builder = aws_sdk_macie2::types::FindingCriteria::builder();

    if criteria.sensitive_data_only {
        builder = builder.criterion(
            "category",
            CriterionAdditionalProperties::builder()
                .eq("CLASSIFICATION")
                .build(),
        );
    }
    if let Some(ref job_id) = criteria.job_id {
        builder = builder.criterion(
            "classificationDetails.jobId",
            CriterionAdditionalProperties::builder().eq(job_id).build(),
        );
    }
    if let Some(after) = criteria.created_after {
        builder = builder.criterion(
            "createdAt",
            CriterionAdditionalProperties::builder()
                .gte(after.timestamp_millis())
                .build(),
        );
    }

    builder.build()
}

/// Normalize a Macie finding; `None` when it does not reference an S3 object
fn to_record(finding: &Finding) -> Option<FindingRecord> {
    let resources = finding.resources_affected()?;
    let bucket = resources.s3_bucket()?.name()?.to_string();
    let key = resources.s3_object()?.key()?.to_string();

    let severity = finding
        .severity()
        .and_then(|s| s.description())
        .and_then(|d| d.as_str().parse::<SensitivityTier>().ok())
        .unwrap_or_default();

    let mut detections = Vec::new();
    if let Some(result) = finding.classification_details().and_then(|c| c.result()) {
        if let Some(custom) = result.custom_data_identifiers() {
            for d in custom.detections() {
                if let Some(name) = d.name() {
                    detections.push(FindingDetection {
                        category: name.to_string(),
                        count: d.count().unwrap_or(0).max(0) as u64,
                    });
                }
            }
        }
        for item in result.sensitive_data() {
            for d in item.detections() {
                if let Some(kind) = d.r#type() {
                    detections.push(FindingDetection {
                        category: kind.to_string(),
                        count: d.count().unwrap_or(0).max(0) as u64,
                    });
                }
            }
        }
    }

    Some(FindingRecord {
        id: finding.id().unwrap_or_default().to_string(),
        bucket,
        key,
        severity,
        detections,
    })
}

#[async_trait]
impl ClassificationService for MacieClassifier {
    async fn create_custom_data_identifier(&self, spec: &CustomIdentifierSpec) -> Result<String> {
        let level = SeverityLevel::builder()
            .occurrences_threshold(i64::from(spec.occurrence_threshold))
            .severity(macie_severity(spec.severity))
            .build()
            .map_err(|e| SentinelError::external("macie2", "CreateCustomDataIdentifier", e))?;
        let tags: HashMap<String, String> = spec.tags.clone().into_iter().collect();

        let resp = self
            .client
            .create_custom_data_identifier()
            .name(&spec.name)
            .regex(&spec.regex)
            .description(&spec.description)
            .severity_levels(level)
            .set_tags(Some(tags))
            .client_token(uuid::Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| sdk_error("macie2", "CreateCustomDataIdentifier", e))?;

        resp.custom_data_identifier_id()
            .map(str::to_string)
            .ok_or_else(|| {
                SentinelError::external(
                    "macie2",
                    "CreateCustomDataIdentifier",
                    "response missing identifier id",
                )
            })
    }

    async fn find_custom_data_identifier(&self, name: &str) -> Result<Option<String>> {
        let mut next_token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_custom_data_identifiers()
                .max_results(500)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| sdk_error("macie2", "ListCustomDataIdentifiers", e))?;

            if let Some(found) = resp.items().iter().find(|item| item.name() == Some(name)) {
                return Ok(found.id().map(str::to_string));
            }

            match resp.next_token().filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn create_classification_job(&self, spec: &ClassificationJobSpec) -> Result<String> {
        let bucket_def = S3BucketDefinitionForJob::builder()
            .account_id(&self.account_id)
            .buckets(&spec.bucket)
            .build()
            .map_err(|e| SentinelError::external("macie2", "CreateClassificationJob", e))?;

        let resp = self
            .client
            .create_classification_job()
            .job_type(JobType::OneTime)
            .name(&spec.name)
            .client_token(&spec.client_token)
            .managed_data_identifier_selector(ManagedDataIdentifierSelector::None)
            .set_custom_data_identifier_ids(Some(spec.identifier_ids.clone()))
            .s3_job_definition(
                S3JobDefinition::builder()
                    .bucket_definitions(bucket_def)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("macie2", "CreateClassificationJob", e))?;

        resp.job_id().map(str::to_string).ok_or_else(|| {
            SentinelError::external(
                "macie2",
                "CreateClassificationJob",
                "response missing job id",
            )
        })
    }

    async fn describe_job(&self, job_id: &str) -> Result<JobStatus> {
        let resp = self
            .client
            .describe_classification_job()
            .job_id(job_id)
            .send()
            .await
            .map_err(|e| sdk_error("macie2", "DescribeClassificationJob", e))?;

        let status = resp.job_status().ok_or_else(|| {
            SentinelError::external(
                "macie2",
                "DescribeClassificationJob",
                "response missing job status",
            )
        })?;
        status
            .as_str()
            .parse::<JobStatus>()
            .map_err(|e| SentinelError::external("macie2", "DescribeClassificationJob", e))
    }

    async fn list_finding_ids(
        &self,
        criteria: &FindingCriteria,
        next_token: Option<&str>,
        max_results: usize,
    ) -> Result<FindingIdPage> {
        let resp = self
            .client
            .list_findings()
            .finding_criteria(criteria_to_macie(criteria))
            .max_results(max_results.min(MAX_FINDINGS_BATCH) as i32)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| sdk_error("macie2", "ListFindings", e))?;

        Ok(FindingIdPage {
            ids: resp.finding_ids().to_vec(),
            next_token: resp
                .next_token()
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        })
    }

    async fn get_findings(&self, ids: &[String]) -> Result<Vec<FindingRecord>> {
        let resp = self
            .client
            .get_findings()
            .set_finding_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("macie2", "GetFindings", e))?;

        Ok(resp.findings().iter().filter_map(to_record).collect())
    }

    fn name(&self) -> &str {
        "macie2"
    }
}
