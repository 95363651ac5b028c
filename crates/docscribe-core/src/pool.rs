//! Worker pool for generating several documents concurrently.
//!
//! Jobs go through an async-channel queue shared by `num_workers` tasks;
//! each job's result comes back on its own oneshot channel, so callers
//! can keep results in submission order no matter which worker finishes first.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::llm::LlmBackend;
use crate::pipeline::{GenerationOutcome, generate_document};
use crate::{Config, CoreError, ExtractedText, GenerationOptions, ProgressEvent};

pub type JobResult = Result<GenerationOutcome, CoreError>;

/// One source document and the options to generate it with.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub source: ExtractedText,
    pub options: GenerationOptions,
}

struct QueuedJob {
    job: GenerationJob,
    result_tx: oneshot::Sender<JobResult>,
}

/// A pool of worker tasks processing generation jobs.
///
/// Dropping the pool without calling [`GenerationPool::shutdown`] cancels
/// queued and in-flight jobs.
pub struct GenerationPool {
    job_tx: async_channel::Sender<QueuedJob>,
    pool_handle: JoinHandle<()>,
    cancel_on_drop: DropGuard,
}

impl GenerationPool {
    /// Spawn `config.num_workers` workers sharing one HTTP client.
    pub fn new(
        config: Arc<Config>,
        backend: Arc<dyn LlmBackend>,
        progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
        cancel: CancellationToken,
    ) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<QueuedJob>();
        let client = crate::http_client();
        let num_workers = config.num_workers.max(1);
        let cancel = cancel.child_token();
        let cancel_on_drop = cancel.clone().drop_guard();

        let pool_handle = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(num_workers);
            for _ in 0..num_workers {
                handles.push(tokio::spawn(worker_loop(
                    job_rx.clone(),
                    config.clone(),
                    backend.clone(),
                    client.clone(),
                    progress.clone(),
                    cancel.clone(),
                )));
            }
            // Workers are now the only receivers; they exit once job_tx closes.
            drop(job_rx);
            for h in handles {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            pool_handle,
            cancel_on_drop,
        }
    }

    /// Queue a job. The returned receiver yields its result.
    pub async fn submit(&self, job: GenerationJob) -> oneshot::Receiver<JobResult> {
        let (result_tx, result_rx) = oneshot::channel();
        let _ = self.job_tx.send(QueuedJob { job, result_tx }).await;
        result_rx
    }

    /// Stop accepting jobs and wait for the queue to drain.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.pool_handle.await;
        let _ = self.cancel_on_drop.disarm();
    }
}

async fn worker_loop(
    rx: async_channel::Receiver<QueuedJob>,
    config: Arc<Config>,
    backend: Arc<dyn LlmBackend>,
    client: reqwest::Client,
    progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
    cancel: CancellationToken,
) {
    while let Ok(QueuedJob { job, result_tx }) = rx.recv().await {
        let filename = job.source.filename.clone();

        let result = if cancel.is_cancelled() {
            tracing::debug!(file = %filename, "skipping: cancelled");
            Err(CoreError::Cancelled)
        } else {
            generate_document(
                &job.source,
                &job.options,
                &config,
                backend.as_ref(),
                &client,
                progress.as_ref(),
                &cancel,
            )
            .await
        };

        if let Err(ref e) = result
            && !matches!(e, CoreError::Cancelled)
        {
            tracing::warn!(file = %filename, error = %e, "generation failed");
            progress(ProgressEvent::Failed {
                filename,
                message: e.to_string(),
            });
        }

        let _ = result_tx.send(result);
    }
}

/// Generate every job, returning results in the order the jobs were given.
/// A failing job does not stop the others.
pub async fn generate_batch(
    jobs: Vec<GenerationJob>,
    config: Arc<Config>,
    backend: Arc<dyn LlmBackend>,
    progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
    cancel: CancellationToken,
) -> Vec<JobResult> {
    let pool = GenerationPool::new(config, backend, progress, cancel);

    let mut receivers = Vec::with_capacity(jobs.len());
    for job in jobs {
        receivers.push(pool.submit(job).await);
    }

    let mut results = Vec::with_capacity(receivers.len());
    for rx in receivers {
        // A dropped sender means the worker died mid-job.
        results.push(rx.await.unwrap_or(Err(CoreError::Cancelled)));
    }

    pool.shutdown().await;
    results
}
