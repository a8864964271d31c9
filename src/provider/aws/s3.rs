//! S3 object store

use super::{sdk_error, to_chrono};
use crate::error::{Result, SentinelError};
use crate::provider::ObjectStore;
use crate::types::{ObjectPage, ObjectRef, ObjectSummary, TagSet};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::types::{Tag, Tagging};
use bytes::Bytes;

/// S3-backed object store
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(sdk: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(sdk),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation.map(str::to_string))
            .send()
            .await
            .map_err(|e| sdk_error("s3", "ListObjectsV2", e))?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ObjectSummary {
                    key: obj.key()?.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        let next_token = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| sdk_error("s3", "GetObject", e))?;

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| SentinelError::external("s3", "GetObject", e))?;
        Ok(body.into_bytes())
    }

    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet> {
        let resp = self
            .client
            .get_object_tagging()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| sdk_error("s3", "GetObjectTagging", e))?;

        Ok(resp
            .tag_set()
            .iter()
            .map(|t| (t.key().to_string(), t.value().to_string()))
            .collect())
    }

    async fn put_tags(&self, object: &ObjectRef, tags: &TagSet) -> Result<()> {
        let tag_set = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SentinelError::external("s3", "PutObjectTagging", e))?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| SentinelError::external("s3", "PutObjectTagging", e))?;

        self.client
            .put_object_tagging()
            .bucket(&object.bucket)
            .key(&object.key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| sdk_error("s3", "PutObjectTagging", e))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "s3"
    }
}
