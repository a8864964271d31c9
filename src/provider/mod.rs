//! Provider traits for the external services the pipeline depends on
//!
//! Every cloud collaborator is reached through one of these traits. The
//! caller builds each provider once and hands it down as `Arc<dyn Trait>`,
//! so tests can swap in the in-memory backends.

use crate::error::Result;
use crate::types::{
    Alert, ClassificationJobSpec, CustomIdentifierSpec, FindingCriteria, FindingIdPage,
    FindingRecord, JobStatus, ObjectPage, ObjectRef, TagSet,
};
use async_trait::async_trait;
use bytes::Bytes;

#[cfg(feature = "aws")]
pub mod aws;
pub mod memory;
pub mod nats;

/// Largest finding batch the classification service accepts
pub const MAX_FINDINGS_BATCH: usize = 50;

/// Object storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of objects, starting after `continuation` if given
    async fn list_objects(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage>;

    /// Fetch the full content of an object
    async fn get_object(&self, object: &ObjectRef) -> Result<Bytes>;

    /// Current tags of an object
    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet>;

    /// Replace the full tag set of an object
    async fn put_tags(&self, object: &ObjectRef, tags: &TagSet) -> Result<()>;

    /// Provider name (e.g., "s3", "memory")
    fn name(&self) -> &str;
}

/// Managed sensitive-data classification service
#[async_trait]
pub trait ClassificationService: Send + Sync {
    /// Register a custom data identifier, returning its id
    async fn create_custom_data_identifier(&self, spec: &CustomIdentifierSpec) -> Result<String>;

    /// Id of an already registered custom data identifier named `name`
    async fn find_custom_data_identifier(&self, name: &str) -> Result<Option<String>>;

    /// Submit a one-time classification job, returning its id
    async fn create_classification_job(&self, spec: &ClassificationJobSpec) -> Result<String>;

    /// Current status of a job
    async fn describe_job(&self, job_id: &str) -> Result<JobStatus>;

    /// One page of finding ids matching `criteria`
    async fn list_finding_ids(
        &self,
        criteria: &FindingCriteria,
        next_token: Option<&str>,
        max_results: usize,
    ) -> Result<FindingIdPage>;

    /// Full finding bodies for at most [`MAX_FINDINGS_BATCH`] ids
    async fn get_findings(&self, ids: &[String]) -> Result<Vec<FindingRecord>>;

    fn name(&self) -> &str;
}

/// Identity service used for response actions
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Disable the principal, returning a description of what was done
    async fn disable_principal(&self, principal_arn: &str) -> Result<String>;
}

/// Alert delivery channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an alert, returning the channel's message id
    async fn publish(&self, alert: &Alert) -> Result<String>;

    /// Channel name (e.g., "sns", "ses", "nats")
    fn name(&self) -> &str;
}

/// Prefix given to IAM users disabled by the responder
pub const DISABLED_PREFIX: &str = "DISABLED_";

/// IAM user name from a principal ARN
///
/// `arn:aws:iam::123456789012:user/ops/alice` yields `alice`. Returns
/// `None` for anything that is not an IAM user ARN (roles, assumed roles).
pub fn iam_user_name(principal_arn: &str) -> Option<&str> {
    let resource = principal_arn
        .strip_prefix("arn:")?
        .splitn(5, ':')
        .nth(4)?;
    let path = resource.strip_prefix("user/")?;
    let name = path.rsplit('/').next()?;
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iam_user_name() {
        assert_eq!(
            iam_user_name("arn:aws:iam::123456789012:user/alice"),
            Some("alice")
        );
        assert_eq!(
            iam_user_name("arn:aws:iam::123456789012:user/ops/team/bob"),
            Some("bob")
        );
        assert_eq!(
            iam_user_name("arn:aws:sts::123456789012:assumed-role/Admin/session"),
            None
        );
        assert_eq!(iam_user_name("alice"), None);
        assert_eq!(iam_user_name("arn:aws:iam::123456789012:user/"), None);
    }
}
