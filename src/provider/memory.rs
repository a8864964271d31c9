//! In-memory providers
//!
//! Process-local implementations of every provider trait. State is lost on
//! drop. Each backend supports failure injection so error paths can be
//! exercised without a cloud account.

use super::{
    iam_user_name, ClassificationService, IdentityService, Notifier, ObjectStore,
    DISABLED_PREFIX, MAX_FINDINGS_BATCH,
};
use crate::error::{Result, SentinelError};
use crate::types::{
    Alert, ClassificationJobSpec, CustomIdentifierSpec, FindingCriteria, FindingIdPage,
    FindingRecord, JobStatus, ObjectPage, ObjectRef, ObjectSummary, TagSet,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

/// Object-store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetObject,
    GetTags,
    PutTags,
}

impl StoreOperation {
    fn api_name(&self) -> &'static str {
        match self {
            Self::GetObject => "GetObject",
            Self::GetTags => "GetObjectTagging",
            Self::PutTags => "PutObjectTagging",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    content: Bytes,
    tags: TagSet,
    last_modified: DateTime<Utc>,
}

/// In-memory object store
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectRef, StoredObject>>,
    failures: RwLock<HashSet<(StoreOperation, String)>>,
    page_size: usize,
    put_tags_calls: AtomicUsize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MemoryObjectStore {
    /// Create a store returning at most `page_size` objects per listing page
    pub fn new(page_size: usize) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            failures: RwLock::new(HashSet::new()),
            page_size: page_size.max(1),
            put_tags_calls: AtomicUsize::new(0),
        }
    }

    /// Store an object, replacing content but keeping existing tags
    pub async fn insert(&self, bucket: &str, key: &str, content: impl Into<Bytes>) {
        let mut objects = self.objects.write().await;
        let object = ObjectRef::new(bucket, key);
        let tags = objects
            .remove(&object)
            .map(|existing| existing.tags)
            .unwrap_or_default();
        objects.insert(
            object,
            StoredObject {
                content: content.into(),
                tags,
                last_modified: Utc::now(),
            },
        );
    }

    /// Set one tag directly, bypassing failure injection
    pub async fn set_tag(&self, object: &ObjectRef, key: &str, value: &str) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(object)
            .ok_or_else(|| SentinelError::NotFound(object.to_string()))?;
        stored.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Current tags, bypassing failure injection
    pub async fn tags(&self, object: &ObjectRef) -> Option<TagSet> {
        let objects = self.objects.read().await;
        objects.get(object).map(|o| o.tags.clone())
    }

    /// Make `operation` fail for `key`
    pub async fn inject_failure(&self, operation: StoreOperation, key: &str) {
        let mut failures = self.failures.write().await;
        failures.insert((operation, key.to_string()));
    }

    /// Number of tag writes attempted
    pub fn put_tags_calls(&self) -> usize {
        self.put_tags_calls.load(Ordering::SeqCst)
    }

    async fn check(&self, operation: StoreOperation, object: &ObjectRef) -> Result<()> {
        let failures = self.failures.read().await;
        if failures.contains(&(operation, object.key.clone())) {
            return Err(SentinelError::external(
                "s3",
                operation.api_name(),
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_objects(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        let objects = self.objects.read().await;
        let mut matching = objects
            .iter()
            .filter(|(r, _)| r.bucket == bucket)
            .filter(|(r, _)| continuation.map_or(true, |after| r.key.as_str() > after));

        let page: Vec<ObjectSummary> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(r, o)| ObjectSummary {
                key: r.key.clone(),
                size: o.content.len() as u64,
                last_modified: Some(o.last_modified),
            })
            .collect();

        let next_token = match (matching.next(), page.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };

        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Bytes> {
        self.check(StoreOperation::GetObject, object).await?;
        let objects = self.objects.read().await;
        objects
            .get(object)
            .map(|o| o.content.clone())
            .ok_or_else(|| SentinelError::NotFound(object.to_string()))
    }

    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet> {
        self.check(StoreOperation::GetTags, object).await?;
        let objects = self.objects.read().await;
        objects
            .get(object)
            .map(|o| o.tags.clone())
            .ok_or_else(|| SentinelError::NotFound(object.to_string()))
    }

    async fn put_tags(&self, object: &ObjectRef, tags: &TagSet) -> Result<()> {
        self.put_tags_calls.fetch_add(1, Ordering::SeqCst);
        self.check(StoreOperation::PutTags, object).await?;
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(object)
            .ok_or_else(|| SentinelError::NotFound(object.to_string()))?;
        stored.tags = tags.clone();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// In-memory classification service with a scripted job lifecycle
///
/// `describe_job` replays the scripted statuses in order and then keeps
/// returning the last one. Finding ids are paged by offset.
pub struct MemoryClassificationService {
    statuses: Mutex<VecDeque<JobStatus>>,
    last_status: Mutex<JobStatus>,
    identifiers: RwLock<Vec<(String, CustomIdentifierSpec)>>,
    rejected_identifiers: RwLock<HashSet<String>>,
    jobs: RwLock<HashMap<String, (String, ClassificationJobSpec)>>,
    fail_job_creation: AtomicBool,
    findings: RwLock<Vec<FindingRecord>>,
    failing_batches: RwLock<HashSet<usize>>,
    criteria_seen: RwLock<Vec<FindingCriteria>>,
    describe_calls: AtomicUsize,
    get_findings_calls: AtomicUsize,
    batch_sizes: RwLock<Vec<usize>>,
}

impl Default for MemoryClassificationService {
    fn default() -> Self {
        Self::new(vec![JobStatus::Complete])
    }
}

impl MemoryClassificationService {
    pub fn new(statuses: Vec<JobStatus>) -> Self {
        let last = statuses.last().copied().unwrap_or(JobStatus::Complete);
        Self {
            statuses: Mutex::new(statuses.into()),
            last_status: Mutex::new(last),
            identifiers: RwLock::new(Vec::new()),
            rejected_identifiers: RwLock::new(HashSet::new()),
            jobs: RwLock::new(HashMap::new()),
            fail_job_creation: AtomicBool::new(false),
            findings: RwLock::new(Vec::new()),
            failing_batches: RwLock::new(HashSet::new()),
            criteria_seen: RwLock::new(Vec::new()),
            describe_calls: AtomicUsize::new(0),
            get_findings_calls: AtomicUsize::new(0),
            batch_sizes: RwLock::new(Vec::new()),
        }
    }

    /// Reject identifier creation for `name`
    pub async fn reject_identifier(&self, name: &str) {
        self.rejected_identifiers
            .write()
            .await
            .insert(name.to_string());
    }

    pub fn fail_job_creation(&self, fail: bool) {
        self.fail_job_creation.store(fail, Ordering::SeqCst);
    }

    /// Make the `n`th `get_findings` call (zero-based) fail
    pub async fn fail_findings_batch(&self, n: usize) {
        self.failing_batches.write().await.insert(n);
    }

    pub async fn add_findings(&self, findings: impl IntoIterator<Item = FindingRecord>) {
        self.findings.write().await.extend(findings);
    }

    /// Registered identifier specs, in creation order
    pub async fn identifiers(&self) -> Vec<CustomIdentifierSpec> {
        let identifiers = self.identifiers.read().await;
        identifiers.iter().map(|(_, spec)| spec.clone()).collect()
    }

    pub async fn jobs(&self) -> Vec<ClassificationJobSpec> {
        let jobs = self.jobs.read().await;
        jobs.values().map(|(_, spec)| spec.clone()).collect()
    }

    pub async fn criteria_seen(&self) -> Vec<FindingCriteria> {
        self.criteria_seen.read().await.clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn get_findings_calls(&self) -> usize {
        self.get_findings_calls.load(Ordering::SeqCst)
    }

    /// Size of every `get_findings` request, in call order
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.read().await.clone()
    }
}

#[async_trait]
impl ClassificationService for MemoryClassificationService {
    async fn create_custom_data_identifier(&self, spec: &CustomIdentifierSpec) -> Result<String> {
        if self.rejected_identifiers.read().await.contains(&spec.name) {
            return Err(SentinelError::external(
                "macie2",
                "CreateCustomDataIdentifier",
                format!("ValidationException: rejected '{}'", spec.name),
            ));
        }

        let mut identifiers = self.identifiers.write().await;
        if identifiers.iter().any(|(_, s)| s.name == spec.name) {
            return Err(SentinelError::external(
                "macie2",
                "CreateCustomDataIdentifier",
                format!("ConflictException: '{}' already exists", spec.name),
            ));
        }

        let id = format!("cdi-{}", uuid::Uuid::new_v4().simple());
        identifiers.push((id.clone(), spec.clone()));
        Ok(id)
    }

    async fn find_custom_data_identifier(&self, name: &str) -> Result<Option<String>> {
        let identifiers = self.identifiers.read().await;
        Ok(identifiers
            .iter()
            .find(|(_, spec)| spec.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn create_classification_job(&self, spec: &ClassificationJobSpec) -> Result<String> {
        if self.fail_job_creation.load(Ordering::SeqCst) {
            return Err(SentinelError::external(
                "macie2",
                "CreateClassificationJob",
                "injected failure",
            ));
        }

        let mut jobs = self.jobs.write().await;
        if let Some((id, _)) = jobs.get(&spec.client_token) {
            return Ok(id.clone());
        }
        let id = format!("job-{}", uuid::Uuid::new_v4().simple());
        jobs.insert(spec.client_token.clone(), (id.clone(), spec.clone()));
        Ok(id)
    }

    async fn describe_job(&self, job_id: &str) -> Result<JobStatus> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let known = self.jobs.read().await.values().any(|(id, _)| id == job_id);
        if !known {
            return Err(SentinelError::NotFound(format!("job {}", job_id)));
        }

        let mut statuses = self.statuses.lock().await;
        let mut last = self.last_status.lock().await;
        if let Some(status) = statuses.pop_front() {
            *last = status;
        }
        Ok(*last)
    }

    async fn list_finding_ids(
        &self,
        criteria: &FindingCriteria,
        next_token: Option<&str>,
        max_results: usize,
    ) -> Result<FindingIdPage> {
        self.criteria_seen.write().await.push(criteria.clone());

        let offset = match next_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                SentinelError::external("macie2", "ListFindings", "invalid next token")
            })?,
            None => 0,
        };

        let findings = self.findings.read().await;
        let end = (offset + max_results.max(1)).min(findings.len());
        let ids = findings
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|f| f.id.clone())
            .collect();
        let next_token = (end < findings.len()).then(|| end.to_string());

        Ok(FindingIdPage { ids, next_token })
    }

    async fn get_findings(&self, ids: &[String]) -> Result<Vec<FindingRecord>> {
        let call = self.get_findings_calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.write().await.push(ids.len());

        if ids.len() > MAX_FINDINGS_BATCH {
            return Err(SentinelError::external(
                "macie2",
                "GetFindings",
                format!("at most {} ids per request", MAX_FINDINGS_BATCH),
            ));
        }
        if self.failing_batches.read().await.contains(&call) {
            return Err(SentinelError::external(
                "macie2",
                "GetFindings",
                "injected failure",
            ));
        }

        let findings = self.findings.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| findings.iter().find(|f| &f.id == id).cloned())
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// In-memory identity service that records disabled principals
#[derive(Default)]
pub struct MemoryIdentityService {
    disabled: RwLock<Vec<String>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryIdentityService {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Principals successfully disabled
    pub async fn disabled(&self) -> Vec<String> {
        self.disabled.read().await.clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityService for MemoryIdentityService {
    async fn disable_principal(&self, principal_arn: &str) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SentinelError::external("iam", "UpdateUser", "injected failure"));
        }
        let user = iam_user_name(principal_arn).ok_or_else(|| {
            SentinelError::external(
                "iam",
                "UpdateUser",
                format!("'{}' is not an IAM user", principal_arn),
            )
        })?;

        self.disabled.write().await.push(principal_arn.to_string());
        Ok(format!(
            "Renamed IAM user {} to {}{}",
            user, DISABLED_PREFIX, user
        ))
    }
}

/// In-memory notifier that keeps every alert it receives
pub struct MemoryNotifier {
    name: String,
    alerts: RwLock<Vec<Alert>>,
    fail: AtomicBool,
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alerts: RwLock::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, alert: &Alert) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SentinelError::external(&self.name, "Publish", "injected failure"));
        }
        let mut alerts = self.alerts.write().await;
        alerts.push(alert.clone());
        Ok(format!("{}-msg-{}", self.name, alerts.len()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertKind;

    #[tokio::test]
    async fn test_store_listing_pages() {
        let store = MemoryObjectStore::new(2);
        for key in ["a", "b", "c", "d", "e"] {
            store.insert("bkt", key, key.as_bytes().to_vec()).await;
        }
        store.insert("other", "z", b"z".to_vec()).await;

        let first = store.list_objects("bkt", None).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("b"));

        let second = store.list_objects("bkt", Some("b")).await.unwrap();
        assert_eq!(second.objects[0].key, "c");

        let last = store.list_objects("bkt", Some("d")).await.unwrap();
        assert_eq!(last.objects.len(), 1);
        assert!(last.next_token.is_none());
    }

    #[tokio::test]
    async fn test_store_tags_and_failures() {
        let store = MemoryObjectStore::default();
        store.insert("bkt", "k", b"data".to_vec()).await;
        let obj = ObjectRef::new("bkt", "k");

        let mut tags = TagSet::new();
        tags.insert("sensitivity".to_string(), "HIGH".to_string());
        store.put_tags(&obj, &tags).await.unwrap();
        assert_eq!(store.get_tags(&obj).await.unwrap(), tags);

        store.inject_failure(StoreOperation::GetTags, "k").await;
        assert!(matches!(
            store.get_tags(&obj).await,
            Err(SentinelError::ExternalService { .. })
        ));
        assert_eq!(store.put_tags_calls(), 1);
    }

    #[tokio::test]
    async fn test_reinsert_keeps_tags() {
        let store = MemoryObjectStore::default();
        let obj = ObjectRef::new("bkt", "k");
        store.insert("bkt", "k", b"v1".to_vec()).await;
        store.set_tag(&obj, "owner", "hr").await.unwrap();
        store.insert("bkt", "k", b"v2".to_vec()).await;

        assert_eq!(store.tags(&obj).await.unwrap()["owner"], "hr");
        assert_eq!(store.get_object(&obj).await.unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_scripted_job_statuses() {
        let svc = MemoryClassificationService::new(vec![JobStatus::Running, JobStatus::Complete]);
        let spec = ClassificationJobSpec {
            bucket: "bkt".to_string(),
            name: "job".to_string(),
            identifier_ids: Vec::new(),
            client_token: "token-1".to_string(),
        };
        let id = svc.create_classification_job(&spec).await.unwrap();
        assert_eq!(svc.create_classification_job(&spec).await.unwrap(), id);

        assert_eq!(svc.describe_job(&id).await.unwrap(), JobStatus::Running);
        assert_eq!(svc.describe_job(&id).await.unwrap(), JobStatus::Complete);
        assert_eq!(svc.describe_job(&id).await.unwrap(), JobStatus::Complete);
        assert!(svc.describe_job("job-unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_identifier_rejected() {
        let svc = MemoryClassificationService::default();
        let spec = crate::patterns::default_rules()[0].identifier_spec(1);
        let id = svc.create_custom_data_identifier(&spec).await.unwrap();
        assert!(svc.create_custom_data_identifier(&spec).await.is_err());

        assert_eq!(
            svc.find_custom_data_identifier(&spec.name).await.unwrap(),
            Some(id)
        );
        assert_eq!(svc.find_custom_data_identifier("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_identity_disable() {
        let iam = MemoryIdentityService::default();
        let action = iam
            .disable_principal("arn:aws:iam::123456789012:user/mallory")
            .await
            .unwrap();
        assert_eq!(action, "Renamed IAM user mallory to DISABLED_mallory");
        assert!(iam
            .disable_principal("arn:aws:sts::123456789012:assumed-role/R/s")
            .await
            .is_err());
        assert_eq!(iam.attempts(), 2);
        assert_eq!(iam.disabled().await.len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_records_alerts() {
        let notifier = MemoryNotifier::new("sns");
        let alert = Alert::new(AlertKind::UnauthorizedAccess, "subject");
        assert_eq!(notifier.publish(&alert).await.unwrap(), "sns-msg-1");

        notifier.fail(true);
        assert!(notifier.publish(&alert).await.is_err());
        assert_eq!(notifier.alerts().await.len(), 1);
    }
}
