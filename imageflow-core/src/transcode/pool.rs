//! Bounded worker pool for transcode jobs.
//!
//! A fixed number of workers consume from a queue holding at most twice
//! that many jobs; a full queue blocks submitters. This is the single
//! admission-control point for the native encoders: it caps their peak
//! memory use and keeps their internal threads busy without oversubscribing
//! the host.

use crate::error::{ImageFlowError, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Job = Box<dyn FnOnce() -> Result<Vec<u8>> + Send + 'static>;
type JobEnvelope = (Job, oneshot::Sender<Result<Vec<u8>>>);

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<JobEnvelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("size", &self.size).finish()
    }
}

impl WorkerPool {
    /// Spawn `size` workers over a queue of capacity `2 * size`.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "worker pool needs at least one worker");
        let (sender, receiver) = mpsc::channel::<JobEnvelope>(size * 2);
        let receiver = std::sync::Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..size)
            .map(|worker| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only for the dequeue; the
                        // job itself runs with the queue free.
                        let envelope = receiver.lock().await.recv().await;
                        let Some((job, reply)) = envelope else {
                            debug!(worker, "worker pool queue closed, exiting");
                            break;
                        };
                        let result = tokio::task::spawn_blocking(job).await.unwrap_or_else(|e| {
                            Err(ImageFlowError::Internal(format!("transcode task panicked: {e}")))
                        });
                        // The submitter may have gone away; nothing to do.
                        let _ = reply.send(result);
                    }
                })
            })
            .collect();

        info!(size, queue_capacity = size * 2, "worker pool started");
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `job` on a worker and wait for its result. Blocks (at the
    /// `send`) while the queue is full — the pool's back-pressure.
    pub async fn process<F>(&self, job: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| ImageFlowError::Internal("worker pool is shut down".to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send((Box::new(job), reply_tx))
            .await
            .map_err(|_| ImageFlowError::Internal("worker pool is shut down".to_string()))?;
        reply_rx
            .await
            .map_err(|_| ImageFlowError::Internal("worker dropped the job reply".to_string()))?
    }

    /// Cooperative shutdown: close the queue, let the workers drain it,
    /// join them.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        info!("worker pool drained and stopped");
    }
}
