//! Single-threaded background I/O queue.
//!
//! One dedicated thread drains a FIFO channel of jobs, so disk mutations and
//! housekeeping run strictly in submission order and never race each other
//! on the same path.

use crate::error::{CacheError, Result};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct IoQueue {
    sender: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl IoQueue {
    /// Spawn the worker thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("Background I/O worker started");
                while let Some(job) = receiver.blocking_recv() {
                    if let Err(panic) =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(job))
                    {
                        error!(?panic, "Background I/O job panicked");
                    }
                }
                debug!("Background I/O worker stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    /// Enqueue a job behind everything already submitted.
    ///
    /// The worker only stops once the queue is dropped, so a failed send is
    /// not expected; if it happens the job runs on the calling thread rather
    /// than being lost.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        let Some(sender) = self.sender.as_ref() else {
            job();
            return;
        };
        if let Err(mpsc::error::SendError(job)) = sender.send(job) {
            error!("Background I/O worker is gone, running job inline");
            job();
        }
    }

    /// Whether the caller is the worker thread itself, e.g. inside a completion callback.
    pub fn on_worker(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Run `job` on the worker and block the calling thread for its result.
    ///
    /// Called from the worker itself, `job` runs inline: everything submitted
    /// earlier is either done or waiting behind the current job.
    pub fn run_blocking<T: Send + 'static>(
        &self,
        job: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T> {
        if self.on_worker() {
            return Ok(job());
        }
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.submit(move || {
            let _ = tx.send(job());
        });
        rx.recv().map_err(|_| CacheError::QueueClosed)
    }

    /// Wait until every job submitted before this call has run.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(move || {
            let _ = tx.send(());
        });
        rx.await.map_err(|_| CacheError::QueueClosed)
    }

    /// Blocking form of [`IoQueue::flush`].
    pub fn flush_blocking(&self) -> Result<()> {
        self.run_blocking(|| ())
    }
}

impl Drop for IoQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if !self.on_worker() {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = IoQueue::spawn("test-io").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            queue.submit(move || seen.lock().push(i));
        }
        queue.flush_blocking().unwrap();

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_run_blocking_returns_value() {
        let queue = IoQueue::spawn("test-io").unwrap();
        let name = queue
            .run_blocking(|| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-io"));
    }

    #[test]
    fn test_panicking_job_does_not_stop_worker() {
        let queue = IoQueue::spawn("test-io").unwrap();
        queue.submit(|| panic!("boom"));
        assert_eq!(queue.run_blocking(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_drop_drains_queue() {
        let seen = Arc::new(Mutex::new(0));
        {
            let queue = IoQueue::spawn("test-io").unwrap();
            for _ in 0..10 {
                let seen = Arc::clone(&seen);
                queue.submit(move || *seen.lock() += 1);
            }
        }
        assert_eq!(*seen.lock(), 10);
    }

    #[test]
    fn test_run_blocking_from_worker_runs_inline() {
        let queue = Arc::new(IoQueue::spawn("test-io").unwrap());
        let (tx, rx) = std_mpsc::channel();
        {
            let inner = Arc::clone(&queue);
            queue.submit(move || {
                let value = inner.run_blocking(|| 42);
                let flushed = inner.flush_blocking();
                let _ = tx.send((value.ok(), flushed.is_ok()));
            });
        }

        let (value, flushed) = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(value, Some(42));
        assert!(flushed);
        // The worker is still serving jobs afterwards
        assert_eq!(queue.run_blocking(|| 7).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_async_flush() {
        let queue = IoQueue::spawn("test-io").unwrap();
        let seen = Arc::new(Mutex::new(false));
        {
            let seen = Arc::clone(&seen);
            queue.submit(move || *seen.lock() = true);
        }
        queue.flush().await.unwrap();
        assert!(*seen.lock());
    }
}
