//! One-shot timers on a dedicated thread

use crate::error::NetworkResult;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

/// Runs delayed tasks on a single worker thread owned by this queue
pub(crate) struct TimerQueue {
    runtime: Mutex<Option<Runtime>>,
}

impl TimerQueue {
    /// Start the timer thread
    pub(crate) fn new(thread_name: &str) -> NetworkResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(thread_name)
            .enable_time()
            .build()?;
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Run `task` once after `delay`. Dropped silently after shutdown.
    pub(crate) fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.runtime.lock().as_ref() {
            Some(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    task();
                });
            }
            None => debug!("Timer queue is shut down, task dropped"),
        }
    }

    /// Cancel pending timers and wait at most `timeout` for the thread to stop
    pub(crate) fn shutdown(&self, timeout: Duration) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        // Blocking waits are not allowed inside an async context
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(timeout);
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.runtime.lock().is_none()
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}
