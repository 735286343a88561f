use crate::core::context::ServiceContext;
use crate::core::engine::RuleEngine;
use crate::core::http::{HttpClient, HttpConfig};
use crate::domain::model::JobOutcome;
use crate::domain::ports::{JobExecutor, QueuedJob, ResultProvider};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// 建立 service context 並執行規則，結果直接寫入 result provider
pub struct ValidationExecutor {
    engine: RuleEngine,
    http_config: HttpConfig,
    results: Arc<dyn ResultProvider>,
}

impl ValidationExecutor {
    pub fn new(engine: RuleEngine, http_config: HttpConfig, results: Arc<dyn ResultProvider>) -> Self {
        Self {
            engine,
            http_config,
            results,
        }
    }
}

#[async_trait]
impl JobExecutor for ValidationExecutor {
    async fn execute(&self, job: &QueuedJob) -> Result<JobOutcome> {
        let headers = job
            .request
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let http = HttpClient::new(self.http_config.clone(), headers)?;

        let ctx = ServiceContext::build(&http, &job.request).await?;
        let engine = self
            .engine
            .with_selection(self.engine.selection().restricted_to(&job.request.rules));
        let summary = engine.validate(job.id, &ctx, &http, self.results.as_ref()).await?;

        Ok(JobOutcome {
            payload_type: ctx.payload_type,
            version: ctx.version,
            summary,
        })
    }
}
