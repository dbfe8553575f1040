//! Cancellable background task with a bounded join.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct TaskHandle<T> {
    name: &'static str,
    cancel_token: CancellationToken,
    join: JoinHandle<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Spawn `fut`, which must exit promptly once `cancel_token` fires.
    pub fn spawn<F>(name: &'static str, cancel_token: CancellationToken, fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            name,
            cancel_token,
            join: tokio::spawn(fut),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Cancel and wait up to `timeout`.
    ///
    /// A task still running after the timeout is logged and left detached.
    pub async fn stop(self, timeout: Duration) -> Option<T> {
        let Self {
            name,
            cancel_token,
            join,
        } = self;
        cancel_token.cancel();

        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(output)) => {
                debug!(task = name, "Task stopped");
                Some(output)
            }
            Ok(Err(e)) => {
                warn!(task = name, error = %e, "Task ended abnormally");
                None
            }
            Err(_) => {
                warn!(
                    task = name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Task did not stop in time, detaching"
                );
                None
            }
        }
    }
}
