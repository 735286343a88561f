use crate::core::catalog::RuleSelection;
use crate::core::http::HttpConfig;
use crate::domain::model::{JobOutcome, JobRecord, RuleResult, ValidationRequest};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn http_config(&self) -> HttpConfig;
    fn rule_selection(&self) -> RuleSelection;
    fn rule_timeout(&self) -> Duration;
}

/// 驗證結果的儲存介面，engine 每產生一筆結果就寫入
#[async_trait]
pub trait ResultProvider: Send + Sync {
    async fn save_job(&self, job: &JobRecord) -> Result<()>;
    async fn job(&self, id: Uuid) -> Result<Option<JobRecord>>;
    async fn jobs(&self) -> Result<Vec<JobRecord>>;
    async fn record(&self, job_id: Uuid, result: RuleResult) -> Result<()>;
    async fn results(&self, job_id: Uuid) -> Result<Vec<RuleResult>>;
}

/// A job pulled off the queue, ready to run.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub request: ValidationRequest,
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &QueuedJob) -> Result<JobOutcome>;
}
