use crate::domain::model::{JobRecord, RuleResult};
use crate::domain::ports::{ResultProvider, Storage};
use crate::utils::error::{Result, ValidatorError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use uuid::Uuid;

const INDEX_FILE: &str = "jobs/index.json";

/// 以 JSON 檔案保存 job 與結果：
/// `jobs/index.json`、`jobs/<id>/job.json`、`jobs/<id>/results.json`
#[derive(Debug)]
pub struct FileResultProvider<S: Storage> {
    storage: S,
    // 序列化 read-modify-write，避免並行 worker 互相覆蓋
    write_lock: Mutex<()>,
}

impl<S: Storage> FileResultProvider<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    fn job_path(id: Uuid) -> String {
        format!("jobs/{}/job.json", id)
    }

    fn results_path(id: Uuid) -> String {
        format!("jobs/{}/results.json", id)
    }

    async fn read_json<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        if !self.storage.exists(path).await {
            return Ok(T::default());
        }
        let data = self.storage.read_file(path).await?;
        serde_json::from_slice(&data).map_err(|e| ValidatorError::StorageError {
            message: format!("{} is corrupted: {}", path, e),
        })
    }

    async fn write_json<T: serde::Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.storage.write_file(path, &data).await
    }

    async fn index(&self) -> Result<Vec<Uuid>> {
        self.read_json(INDEX_FILE).await
    }
}

#[async_trait]
impl<S: Storage> ResultProvider for FileResultProvider<S> {
    async fn save_job(&self, job: &JobRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.write_json(&Self::job_path(job.id), job).await?;

        let mut index = self.index().await?;
        if !index.contains(&job.id) {
            index.push(job.id);
            self.write_json(INDEX_FILE, &index).await?;
        }
        Ok(())
    }

    async fn job(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let path = Self::job_path(id);
        if !self.storage.exists(&path).await {
            return Ok(None);
        }
        let data = self.storage.read_file(&path).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    async fn jobs(&self) -> Result<Vec<JobRecord>> {
        let mut jobs = Vec::new();
        for id in self.index().await? {
            match self.job(id).await? {
                Some(job) => jobs.push(job),
                None => tracing::warn!("⚠️ Job {} is listed in the index but has no record", id),
            }
        }
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(jobs)
    }

    async fn record(&self, job_id: Uuid, result: RuleResult) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let path = Self::results_path(job_id);
        let mut results: Vec<RuleResult> = self.read_json(&path).await?;
        results.push(result);
        self.write_json(&path, &results).await
    }

    async fn results(&self, job_id: Uuid) -> Result<Vec<RuleResult>> {
        self.read_json(&Self::results_path(job_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{
        JobOutcome, JobStatus, JobSummary, ODataVersion, Outcome, PayloadType, RequirementLevel,
        RuleCategory, ValidationRequest,
    };
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                ValidatorError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn exists(&self, path: &str) -> bool {
            self.files.lock().await.contains_key(path)
        }
    }

    fn result(name: &str, outcome: Outcome) -> RuleResult {
        RuleResult {
            rule_name: name.to_string(),
            spec_section: "OData JSON Format 12".to_string(),
            requirement_level: RequirementLevel::Must,
            category: RuleCategory::Core,
            outcome,
            description: "test".to_string(),
            details: Vec::new(),
            target_uri: "http://host/svc/Products".to_string(),
            duration_ms: 3,
        }
    }

    #[tokio::test]
    async fn test_job_lifecycle_is_persisted() {
        let storage = MockStorage::default();
        let provider = FileResultProvider::new(storage.clone());

        let mut job = JobRecord::queued(ValidationRequest::new("http://host/svc/Products"));
        provider.save_job(&job).await.unwrap();

        provider.record(job.id, result("Feed.Core.2001", Outcome::Success)).await.unwrap();
        provider.record(job.id, result("Feed.Core.2003", Outcome::Error)).await.unwrap();

        job.mark_running();
        job.mark_complete(JobOutcome {
            payload_type: PayloadType::Feed,
            version: ODataVersion::V4,
            summary: JobSummary::from_results(&provider.results(job.id).await.unwrap()),
        });
        provider.save_job(&job).await.unwrap();

        let reloaded = FileResultProvider::new(storage.clone());
        let stored = reloaded.job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Complete);
        assert_eq!(stored.summary.as_ref().map(|s| s.error), Some(1));

        let results = reloaded.results(job.id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].rule_name, "Feed.Core.2003");

        let jobs = reloaded.jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(storage.files.lock().await.contains_key(INDEX_FILE));
    }

    #[tokio::test]
    async fn test_corrupted_results_file() {
        let storage = MockStorage::default();
        let provider = FileResultProvider::new(storage.clone());
        let id = Uuid::new_v4();
        storage
            .write_file(&format!("jobs/{}/results.json", id), b"{oops")
            .await
            .unwrap();

        let err = provider.results(id).await.unwrap_err();
        assert!(matches!(err, ValidatorError::StorageError { .. }));
    }
}
