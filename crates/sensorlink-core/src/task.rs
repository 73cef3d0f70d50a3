// ── Background task handles ──
//
// Every periodic loop in the core is spawned with its own child
// cancellation token so it can be stopped alone or together with the
// session that owns it. Shutdown always cancels first, then awaits.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub(crate) struct SupervisedTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SupervisedTask {
    /// Spawn `body` with a child of `parent`. Cancelling `parent` stops
    /// the task too.
    pub(crate) fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let handle = tokio::spawn(body(cancel.clone()));
        Self {
            name,
            cancel,
            handle,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the task without waiting for it.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to exit.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!(task = self.name, "background task panicked");
            }
        }
    }
}

/// Cancel and await a batch of tasks concurrently.
pub(crate) async fn shutdown_all(tasks: Vec<SupervisedTask>) {
    futures_util::future::join_all(tasks.into_iter().map(SupervisedTask::shutdown)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn cancelling_parent_stops_child() {
        let parent = CancellationToken::new();
        let task = SupervisedTask::spawn("ticker", &parent, |cancel| async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        });
        assert!(task.is_running());

        parent.cancel();
        task.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_survives_panicking_task() {
        let parent = CancellationToken::new();
        let task = SupervisedTask::spawn("faulty", &parent, |_cancel| async {
            let healthy = false;
            assert!(healthy, "loop bug");
        });
        task.shutdown().await;
    }
}
