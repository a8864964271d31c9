//! Object tagging
//!
//! Writes the verdict tier into one tag on the object. The rest of the
//! object's tag set is read first and written back unchanged.
//!
//! The read-modify-write is not guarded: two scans tagging the same object
//! at once race, and whichever `put_tags` lands last wins.

use crate::error::{Result, SentinelError};
use crate::provider::ObjectStore;
use crate::types::{ObjectRef, SensitivityTier};
use std::sync::Arc;

/// Writes sensitivity tags through an [`ObjectStore`]
pub struct TagReconciler {
    store: Arc<dyn ObjectStore>,
    tag_key: String,
}

impl TagReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, tag_key: impl Into<String>) -> Self {
        Self {
            store,
            tag_key: tag_key.into(),
        }
    }

    pub fn tag_key(&self) -> &str {
        &self.tag_key
    }

    /// Set the sensitivity tag of `object` to `tier`
    ///
    /// Returns `true` if the tag changed. An unchanged tag is not rewritten.
    pub async fn apply_tag(&self, object: &ObjectRef, tier: SensitivityTier) -> Result<bool> {
        self.write_tier(object, tier, false).await
    }

    /// Like [`apply_tag`](Self::apply_tag), but never lowers a recorded tier
    ///
    /// An existing tag that does not parse as a tier is overwritten.
    pub async fn raise_tag(&self, object: &ObjectRef, tier: SensitivityTier) -> Result<bool> {
        self.write_tier(object, tier, true).await
    }

    async fn write_tier(
        &self,
        object: &ObjectRef,
        tier: SensitivityTier,
        raise_only: bool,
    ) -> Result<bool> {
        let mut tags = self
            .store
            .get_tags(object)
            .await
            .map_err(|e| tagging_error(object, e))?;

        if raise_only {
            let current = tags
                .get(&self.tag_key)
                .and_then(|v| v.parse::<SensitivityTier>().ok());
            if let Some(current) = current.filter(|current| *current > tier) {
                tracing::debug!(object = %object, tier = %tier, current = %current, "Keeping higher tag");
                return Ok(false);
            }
        }

        let previous = tags.insert(self.tag_key.clone(), tier.to_string());
        if previous.as_deref() == Some(tier.as_str()) {
            tracing::debug!(object = %object, tier = %tier, "Tag already current");
            return Ok(false);
        }

        self.store
            .put_tags(object, &tags)
            .await
            .map_err(|e| tagging_error(object, e))?;

        tracing::info!(
            object = %object,
            tier = %tier,
            previous = previous.as_deref().unwrap_or("-"),
            "Sensitivity tag written"
        );
        Ok(true)
    }

    /// Current tier recorded on `object`
    ///
    /// A missing tag is `None`; an unparsable value is an error.
    pub async fn read_tier(&self, object: &ObjectRef) -> Result<Option<SensitivityTier>> {
        let tags = self.store.get_tags(object).await?;
        tags.get(&self.tag_key)
            .map(|value| {
                value.parse::<SensitivityTier>().map_err(|reason| {
                    SentinelError::Tagging {
                        key: object.key.clone(),
                        reason,
                    }
                })
            })
            .transpose()
    }
}

fn tagging_error(object: &ObjectRef, err: SentinelError) -> SentinelError {
    SentinelError::Tagging {
        key: object.key.clone(),
        reason: err.to_string(),
    }
}
