use crate::core::catalog::RuleCatalog;
use crate::domain::model::{JobRecord, Outcome, RuleResult, ValidationRequest};
use crate::domain::ports::{QueuedJob, ResultProvider};
use crate::jobs::queue::JobQueue;
use crate::results::report::build_report_archive;
use crate::rules::RuleInfo;
use crate::utils::error::{Result, ValidatorError};
use crate::utils::validation::{validate_header_name, validate_non_empty_string, validate_url};
use std::sync::Arc;
use uuid::Uuid;

/// Web API 背後的服務：提交、查詢 job 與匯出報告
pub struct ValidationService {
    queue: JobQueue,
    results: Arc<dyn ResultProvider>,
    catalog: Arc<RuleCatalog>,
    workers: usize,
}

impl ValidationService {
    pub fn new(
        queue: JobQueue,
        results: Arc<dyn ResultProvider>,
        catalog: Arc<RuleCatalog>,
        workers: usize,
    ) -> Self {
        Self {
            queue,
            results,
            catalog,
            workers,
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.pending()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 驗證請求、保留佇列位置後才寫入 job，佇列滿時不留下任何紀錄
    pub async fn submit(&self, request: ValidationRequest) -> Result<JobRecord> {
        validate_request(&request)?;

        let slot = self.queue.reserve()?;
        let record = JobRecord::queued(request);
        self.results.save_job(&record).await?;

        slot.send(QueuedJob {
            id: record.id,
            request: record.request.clone(),
        });
        tracing::info!(job_id = %record.id, uri = %record.request.uri, "📥 Job queued");
        Ok(record)
    }

    pub async fn job(&self, id: Uuid) -> Result<JobRecord> {
        self.results
            .job(id)
            .await?
            .ok_or_else(|| ValidatorError::JobNotFound { id: id.to_string() })
    }

    pub async fn jobs(&self) -> Result<Vec<JobRecord>> {
        self.results.jobs().await
    }

    pub async fn results(&self, id: Uuid, outcome: Option<Outcome>) -> Result<Vec<RuleResult>> {
        self.job(id).await?;
        let results = self.results.results(id).await?;
        Ok(match outcome {
            Some(outcome) => results.into_iter().filter(|r| r.outcome == outcome).collect(),
            None => results,
        })
    }

    pub async fn report(&self, id: Uuid) -> Result<Vec<u8>> {
        let job = self.job(id).await?;
        if !job.status.is_finished() {
            return Err(ValidatorError::JobNotFinished { id: id.to_string() });
        }
        let results = self.results.results(id).await?;
        build_report_archive(&job, &results)
    }

    pub fn rules(&self) -> Vec<&'static RuleInfo> {
        self.catalog.descriptors()
    }
}

pub fn validate_request(request: &ValidationRequest) -> Result<()> {
    let invalid = |e: ValidatorError| ValidatorError::InvalidRequest {
        message: e.to_string(),
    };

    validate_url("uri", &request.uri).map_err(invalid)?;
    for name in request.headers.keys() {
        validate_header_name("headers", name).map_err(invalid)?;
    }
    for prefix in &request.rules {
        validate_non_empty_string("rules", prefix).map_err(invalid)?;
    }
    Ok(())
}
