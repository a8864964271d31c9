//! AWS backends
//!
//! S3 for objects and tags, Macie for classification jobs, IAM for
//! response actions, SNS and SES for alert delivery. All clients are
//! built from one shared `SdkConfig` loaded at startup.

mod iam;
mod macie;
mod s3;
mod ses;
mod sns;

pub use iam::IamIdentityService;
pub use macie::MacieClassifier;
pub use s3::S3ObjectStore;
pub use ses::SesEmailNotifier;
pub use sns::SnsNotifier;

use crate::config::AwsConfig;
use crate::error::{Result, SentinelError};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::error::Error as StdError;

/// Load the shared SDK configuration
///
/// Region and profile fall back to the standard AWS environment chain
/// when unset.
pub async fn load_sdk_config(config: &AwsConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(ref region) = config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(ref profile) = config.profile {
        loader = loader.profile_name(profile);
    }

    loader.load().await
}

/// Account id of the calling credentials (STS `GetCallerIdentity`)
pub async fn caller_account_id(sdk: &SdkConfig) -> Result<String> {
    let sts = aws_sdk_sts::Client::new(sdk);
    let identity = sts
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| sdk_error("sts", "GetCallerIdentity", e))?;

    let account = identity
        .account()
        .ok_or_else(|| {
            SentinelError::external("sts", "GetCallerIdentity", "response missing account")
        })?
        .to_string();

    tracing::debug!(account = %account, arn = ?identity.arn(), "Resolved caller identity");
    Ok(account)
}

/// Map an SDK error to `ExternalService`, keeping the full error chain
pub(crate) fn sdk_error<E>(service: &str, operation: &str, err: E) -> SentinelError
where
    E: StdError + Send + Sync + 'static,
{
    SentinelError::external(
        service,
        operation,
        aws_sdk_s3::error::DisplayErrorContext(err),
    )
}

/// Convert an SDK timestamp to chrono
pub(crate) fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}
