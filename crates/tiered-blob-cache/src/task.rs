//! Cancelable handles for asynchronous disk queries.
//!
//! A query moves `Created -> Running -> {Completed, Canceled}`. The final
//! transition is a single compare-and-swap, so a cancel racing with completion
//! resolves to exactly one winner: either the callback fires or the handle is
//! observed as canceled, never both and never neither.

use crate::types::CacheType;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Completed,
    Canceled,
}

/// Handle returned by `BlobCache::query_disk_async`.
///
/// Cloning shares the same underlying query.
#[derive(Clone)]
pub struct QueryHandle {
    state: Arc<AtomicU8>,
}

impl QueryHandle {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(CREATED)),
        }
    }

    pub(crate) fn completed() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(COMPLETED)),
        }
    }

    /// Stop the completion callback from firing.
    ///
    /// Returns `true` if this call canceled the query, `false` if it had
    /// already completed or been canceled. In-flight file I/O still runs to
    /// the end; only its result is discarded.
    pub fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        while current == CREATED || current == RUNNING {
            match self.state.compare_exchange(
                current,
                CANCELED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Completed | TaskState::Canceled)
    }

    pub fn state(&self) -> TaskState {
        match self.state.load(Ordering::Acquire) {
            CREATED => TaskState::Created,
            RUNNING => TaskState::Running,
            COMPLETED => TaskState::Completed,
            _ => TaskState::Canceled,
        }
    }

    /// Created -> Running. Fails if the query was canceled first.
    pub(crate) fn start(&self) -> bool {
        self.state
            .compare_exchange(CREATED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the right to complete. Fails if the query was canceled.
    pub(crate) fn finish(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        while current == CREATED || current == RUNNING {
            match self.state.compare_exchange(
                current,
                COMPLETED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

impl fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Cancels the wrapped query when dropped; a no-op once it has completed.
pub(crate) struct CancelOnDrop(pub(crate) QueryHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

type Callback<R> = Box<dyn FnOnce(Option<Arc<R>>, CacheType) + Send + 'static>;

/// Completion side of a query, owned by the background job.
///
/// If dropped without completing (the worker went away, or the job panicked),
/// it reports a miss so the caller's callback still fires exactly once.
pub(crate) struct PendingQuery<R> {
    handle: QueryHandle,
    callback: Option<Callback<R>>,
}

impl<R> PendingQuery<R> {
    pub(crate) fn new(
        handle: QueryHandle,
        callback: impl FnOnce(Option<Arc<R>>, CacheType) + Send + 'static,
    ) -> Self {
        Self {
            handle,
            callback: Some(Box::new(callback)),
        }
    }

    /// Created -> Running. Fails if the caller canceled before the job started.
    pub(crate) fn start(&self) -> bool {
        self.handle.start()
    }

    /// Fire the callback if the query has not been canceled.
    ///
    /// `before_fire` runs only when this completion wins, ahead of the
    /// callback; it is where a disk hit gets promoted into memory.
    pub(crate) fn complete(
        mut self,
        resource: Option<Arc<R>>,
        cache_type: CacheType,
        before_fire: impl FnOnce(&Option<Arc<R>>),
    ) -> bool {
        let Some(callback) = self.callback.take() else {
            return false;
        };
        if !self.handle.finish() {
            return false;
        }
        before_fire(&resource);
        callback(resource, cache_type);
        true
    }
}

impl<R> Drop for PendingQuery<R> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            if self.handle.finish() {
                callback(None, CacheType::None);
            }
        }
    }
}
