//! IAM response actions

use super::sdk_error;
use crate::error::{Result, SentinelError};
use crate::provider::{iam_user_name, IdentityService, DISABLED_PREFIX};
use async_trait::async_trait;
use aws_config::SdkConfig;

/// Disables IAM users by renaming them to `DISABLED_<name>`
pub struct IamIdentityService {
    client: aws_sdk_iam::Client,
}

impl IamIdentityService {
    pub fn new(sdk: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_iam::Client::new(sdk),
        }
    }
}

#[async_trait]
impl IdentityService for IamIdentityService {
    async fn disable_principal(&self, principal_arn: &str) -> Result<String> {
        let user = iam_user_name(principal_arn).ok_or_else(|| {
            SentinelError::external(
                "iam",
                "UpdateUser",
                format!("'{}' is not an IAM user", principal_arn),
            )
        })?;
        let new_name = format!("{}{}", DISABLED_PREFIX, user);

        self.client
            .update_user()
            .user_name(user)
            .new_user_name(&new_name)
            .send()
            .await
            .map_err(|e| sdk_error("iam", "UpdateUser", e))?;

        tracing::info!(user, new_name = %new_name, "IAM user disabled");
        Ok(format!("Renamed IAM user {} to {}", user, new_name))
    }
}
