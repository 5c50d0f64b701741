//! Background validation queue.
//!
//! Submission enqueues a [`ValidationTask`] through a [`QueueHandle`]; a fixed pool of async
//! workers drains the [`PendingQueue`] and hands each task to a [`TaskHandler`]. Delivery is
//! at-least-once: a task whose handler fails is put back on the queue until it has been tried
//! `max_attempts` times. A task that runs out of attempts, or is still queued when the pool shuts
//! down, is passed to [`TaskHandler::abandon`] so the handler can settle it.

use crate::error::{SubmissionError, SubmissionResult};
use async_trait::async_trait;
use ssv_callback_id::CallbackId;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTask {
    pub callback_id: CallbackId,
    /// 1 on first delivery.
    pub attempt: u32,
}

impl ValidationTask {
    pub fn new(callback_id: CallbackId) -> Self {
        Self {
            callback_id,
            attempt: 1,
        }
    }

    fn redelivery(&self) -> Self {
        Self {
            callback_id: self.callback_id.clone(),
            attempt: self.attempt + 1,
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Runs one task. An error requests redelivery.
    async fn handle(&self, task: &ValidationTask, cancel: &CancellationToken)
        -> SubmissionResult<()>;

    /// Called once for a task that will not be delivered again.
    async fn abandon(&self, _task: &ValidationTask) {}
}

/// Creates a connected queue handle and pending queue.
pub fn channel() -> (QueueHandle, PendingQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueHandle { tx: tx.clone() }, PendingQueue { tx, rx })
}

/// Producer side, held by the submission service.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: UnboundedSender<ValidationTask>,
}

impl QueueHandle {
    /// # Errors
    ///
    /// Returns [`SubmissionError::QueueClosed`] once the worker side has been dropped.
    pub fn enqueue(&self, callback_id: CallbackId) -> SubmissionResult<()> {
        self.tx
            .send(ValidationTask::new(callback_id))
            .map_err(|_| SubmissionError::QueueClosed)
    }
}

/// Consumer side. Tasks accumulate here until workers are spawned.
#[derive(Debug)]
pub struct PendingQueue {
    tx: UnboundedSender<ValidationTask>,
    rx: UnboundedReceiver<ValidationTask>,
}

impl PendingQueue {
    /// Takes the next task without waiting. Used by callers that run tasks inline.
    pub fn try_next(&mut self) -> Option<ValidationTask> {
        self.rx.try_recv().ok()
    }

    /// Starts `workers` tasks on the current runtime.
    pub fn spawn_workers(
        self,
        handler: Arc<dyn TaskHandler>,
        workers: usize,
        max_attempts: u32,
        cancel: CancellationToken,
    ) -> WorkerPool {
        let rx = Arc::new(Mutex::new(self.rx));
        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    rx.clone(),
                    self.tx.clone(),
                    handler.clone(),
                    max_attempts,
                    cancel.clone(),
                ))
            })
            .collect();
        tracing::info!("started {} validation worker(s)", workers.max(1));
        WorkerPool {
            handles,
            cancel,
            rx,
            handler,
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<UnboundedReceiver<ValidationTask>>>,
    tx: UnboundedSender<ValidationTask>,
    handler: Arc<dyn TaskHandler>,
    max_attempts: u32,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = next else {
            break;
        };

        tracing::debug!(
            "worker {} picked up batch {} (attempt {})",
            worker,
            task.callback_id,
            task.attempt
        );
        let Err(e) = handler.handle(&task, &cancel).await else {
            continue;
        };

        if task.attempt < max_attempts && !cancel.is_cancelled() {
            tracing::warn!(
                "validation of batch {} failed on attempt {}/{}, requeueing: {:?}",
                task.callback_id,
                task.attempt,
                max_attempts,
                e
            );
            if tx.send(task.redelivery()).is_err() {
                tracing::error!("queue closed, abandoning batch {}", task.callback_id);
                handler.abandon(&task).await;
            }
        } else {
            tracing::error!(
                "validation of batch {} abandoned after {} attempt(s): {:?}",
                task.callback_id,
                task.attempt,
                e
            );
            handler.abandon(&task).await;
        }
    }
    tracing::debug!("worker {} stopped", worker);
}

/// Running workers. Dropping the pool leaves the workers running; call [`WorkerPool::shutdown`].
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    rx: Arc<Mutex<UnboundedReceiver<ValidationTask>>>,
    handler: Arc<dyn TaskHandler>,
}

impl WorkerPool {
    /// Cancels in-flight polls, waits for every worker to stop, then closes the queue and
    /// abandons whatever was still waiting in it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("validation worker panicked: {:?}", e);
            }
        }

        let mut rx = self.rx.lock().await;
        rx.close();
        let mut abandoned = 0usize;
        while let Ok(task) = rx.try_recv() {
            self.handler.abandon(&task).await;
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::warn!("abandoned {} queued batch(es) at shutdown", abandoned);
        }
        tracing::info!("validation workers stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
