//! Owned handles for spawned background tasks.

use crate::error::EnvError;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle to a task spawned through an [`ArenaContext`](crate::ArenaContext).
///
/// Dropping the handle aborts the task, so a timer can never outlive the
/// engine that owns its handle.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    inner: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Wraps a tokio join handle.
    pub fn from_tokio(name: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            inner: Some(handle),
        }
    }

    /// Returns the task's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests cancellation. The task stops at its next suspension point.
    pub fn abort(&self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }

    /// Returns true once the task has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Releases the task so it keeps running after the handle is gone.
    pub fn detach(mut self) {
        self.inner.take();
    }

    /// Waits for the task to finish. Cancellation counts as a clean exit.
    pub async fn join(mut self) -> Result<(), EnvError> {
        let Some(handle) = self.inner.take() else {
            return Ok(());
        };

        match handle.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(EnvError::task(&self.name, err)),
        }
    }

    /// Waits for the task with an upper bound.
    pub async fn join_timeout(self, limit: Duration) -> Result<(), EnvError> {
        let name = self.name.clone();
        match tokio::time::timeout(limit, self.join()).await {
            Ok(result) => result,
            Err(_) => Err(EnvError::task(
                name,
                EnvError::Timeout(limit.as_millis() as u64),
            )),
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.take() {
            handle.abort();
        }
    }
}
