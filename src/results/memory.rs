use crate::domain::model::{JobRecord, RuleResult};
use crate::domain::ports::ResultProvider;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 不落地的結果儲存，server 未設定 results_path 時使用
#[derive(Debug, Default)]
pub struct InMemoryResultProvider {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    results: RwLock<HashMap<Uuid, Vec<RuleResult>>>,
}

impl InMemoryResultProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultProvider for InMemoryResultProvider {
    async fn save_job(&self, job: &JobRecord) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn job(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn jobs(&self) -> Result<Vec<JobRecord>> {
        let mut jobs: Vec<JobRecord> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(jobs)
    }

    async fn record(&self, job_id: Uuid, result: RuleResult) -> Result<()> {
        self.results
            .write()
            .await
            .entry(job_id)
            .or_default()
            .push(result);
        Ok(())
    }

    async fn results(&self, job_id: Uuid) -> Result<Vec<RuleResult>> {
        Ok(self
            .results
            .read()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{JobStatus, ValidationRequest};

    #[tokio::test]
    async fn test_jobs_are_listed_newest_first() {
        let provider = InMemoryResultProvider::new();

        let older = JobRecord::queued(ValidationRequest::new("http://host/a/"));
        let mut newer = JobRecord::queued(ValidationRequest::new("http://host/b/"));
        newer.submitted_at = older.submitted_at + chrono::Duration::seconds(5);

        provider.save_job(&older).await.unwrap();
        provider.save_job(&newer).await.unwrap();

        let jobs = provider.jobs().await.unwrap();
        assert_eq!(jobs[0].id, newer.id);
        assert_eq!(jobs[1].id, older.id);

        let mut running = older.clone();
        running.mark_running();
        provider.save_job(&running).await.unwrap();
        let stored = provider.job(older.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_job_has_no_results() {
        let provider = InMemoryResultProvider::new();
        let id = Uuid::new_v4();
        assert!(provider.job(id).await.unwrap().is_none());
        assert!(provider.results(id).await.unwrap().is_empty());
    }
}
