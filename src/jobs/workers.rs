use crate::domain::model::JobRecord;
use crate::domain::ports::{JobExecutor, QueuedJob, ResultProvider};
use crate::jobs::queue::JobReceiver;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// 固定數量的 worker：dispatcher 先取得 semaphore permit 才從佇列取 job
#[derive(Debug)]
pub struct JobWorkers {
    shutdown_tx: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    workers: usize,
}

impl JobWorkers {
    pub fn start(
        receiver: JobReceiver,
        workers: usize,
        executor: Arc<dyn JobExecutor>,
        results: Arc<dyn ResultProvider>,
    ) -> Self {
        let workers = workers.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(workers, "🚀 Job workers starting");
        let dispatcher = tokio::spawn(dispatch(receiver, workers, executor, results, shutdown_rx));

        Self {
            shutdown_tx,
            dispatcher,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 關閉佇列，執行完已排入與進行中的 job 後返回
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "job dispatcher panicked");
        }
        tracing::info!("🛑 Job workers stopped");
    }
}

async fn dispatch(
    mut receiver: JobReceiver,
    workers: usize,
    executor: Arc<dyn JobExecutor>,
    results: Arc<dyn ResultProvider>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut in_flight = JoinSet::new();
    let mut closing = false;

    loop {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let job = tokio::select! {
            job = receiver.recv() => job,
            changed = shutdown_rx.changed(), if !closing => {
                closing = true;
                if changed.is_ok() {
                    tracing::info!("job queue closing, draining queued jobs");
                }
                receiver.close();
                continue;
            }
        };

        let Some(job) = job else {
            break;
        };

        let executor = Arc::clone(&executor);
        let results = Arc::clone(&results);
        in_flight.spawn(async move {
            run_job(job, executor.as_ref(), results.as_ref()).await;
            drop(permit);
        });

        // 回收已完成的 task
        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                tracing::error!(error = %e, "job task panicked");
            }
        }
    }

    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            tracing::error!(error = %e, "job task panicked during shutdown");
        }
    }
}

async fn run_job(job: QueuedJob, executor: &dyn JobExecutor, results: &dyn ResultProvider) {
    let mut record = match results.job(job.id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            let mut record = JobRecord::queued(job.request.clone());
            record.id = job.id;
            record
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, "❌ Could not load job record: {}", e);
            return;
        }
    };

    record.mark_running();
    if let Err(e) = results.save_job(&record).await {
        tracing::error!(job_id = %job.id, "❌ Could not mark job running: {}", e);
    }
    tracing::info!(job_id = %job.id, uri = %job.request.uri, "▶️ Job started");

    match executor.execute(&job).await {
        Ok(outcome) => {
            tracing::info!(
                job_id = %job.id,
                total = outcome.summary.total,
                errors = outcome.summary.error,
                "✅ Job complete"
            );
            record.mark_complete(outcome);
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, "❌ Job failed: {}", e.user_friendly_message());
            record.mark_failed(e.to_string());
        }
    }

    if let Err(e) = results.save_job(&record).await {
        tracing::error!(job_id = %job.id, "❌ Could not save job result: {}", e);
    }
}
