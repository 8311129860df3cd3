//! Fixed-size pool of analysis workers fed by a bounded queue

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::orchestrator::AnalysisService;
use crate::model::{AnalysisRequest, AnalysisResponse, ErrorKind};

type Job = (AnalysisRequest, oneshot::Sender<AnalysisResponse>);

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Worker pool is shut down")]
    Closed,

    #[error("Worker queue is full")]
    QueueFull,
}

/// Pending result of a submitted request
pub struct ResponseHandle {
    receiver: oneshot::Receiver<AnalysisResponse>,
}

impl ResponseHandle {
    /// Wait for the worker to finish the request
    pub async fn wait(self) -> AnalysisResponse {
        self.receiver.await.unwrap_or_else(|_| {
            AnalysisResponse::failure(ErrorKind::Internal, "worker dropped the request")
        })
    }
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers sharing a queue of `queue_depth` pending jobs
    pub fn start(service: Arc<AnalysisService>, size: usize, queue_depth: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|worker| {
                let service = Arc::clone(&service);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some((request, reply)) = job else {
                            break;
                        };
                        let response = service.process_with_retry(&request).await;
                        if reply.send(response).is_err() {
                            tracing::debug!(worker, "Submitter went away before the response was ready");
                        }
                    }
                    tracing::debug!(worker, "Worker stopped");
                })
            })
            .collect();

        tracing::info!(workers = size, queue_depth, "Worker pool started");

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a request, waiting for capacity when the queue is full
    pub async fn submit(&self, request: AnalysisRequest) -> Result<ResponseHandle, SubmitError> {
        let sender = self.sender.lock().await.clone().ok_or(SubmitError::Closed)?;
        let (reply, receiver) = oneshot::channel();
        sender
            .send((request, reply))
            .await
            .map_err(|_| SubmitError::Closed)?;
        Ok(ResponseHandle { receiver })
    }

    /// Queue a request only if there is room right now
    pub async fn try_submit(&self, request: AnalysisRequest) -> Result<ResponseHandle, SubmitError> {
        let guard = self.sender.lock().await;
        let sender = guard.as_ref().ok_or(SubmitError::Closed)?;
        let (reply, receiver) = oneshot::channel();
        sender.try_send((request, reply)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })?;
        Ok(ResponseHandle { receiver })
    }

    /// Stop accepting work, let queued jobs drain and wait for the workers
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Worker terminated abnormally");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::model::TaskKind;
    use crate::service::orchestrator::tests::{ScriptedAdapter, service_with, test_config};

    fn request(n: u32) -> AnalysisRequest {
        AnalysisRequest::new(TaskKind::ScanOptimization, json!({"n": n}))
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let service = Arc::new(service_with(&test_config(), adapter));
        let pool = WorkerPool::start(service, 2, 4);

        let handles = futures::future::join_all((0..6).map(|n| pool.submit(request(n)))).await;
        for (n, handle) in handles.into_iter().enumerate() {
            let response = handle.unwrap().wait().await;
            assert_eq!(response.content(), Some(format!("echo {}", n).as_str()));
        }

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_try_submit_reports_full_queue() {
        let adapter = Arc::new(ScriptedAdapter {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let service = Arc::new(service_with(&test_config(), adapter));
        let pool = WorkerPool::start(service, 1, 1);

        let first = pool.try_submit(request(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _second = pool.try_submit(request(2)).await.unwrap();
        assert!(matches!(
            pool.try_submit(request(3)).await,
            Err(SubmitError::QueueFull)
        ));

        assert!(first.wait().await.success);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let service = Arc::new(service_with(&test_config(), adapter));
        let pool = WorkerPool::start(service, 1, 1);
        pool.shutdown().await;

        assert!(matches!(pool.submit(request(1)).await, Err(SubmitError::Closed)));
    }
}
