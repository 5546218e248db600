use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle to a long-lived streaming or polling task.
///
/// Lifecycle contract:
/// - Prefer [`stop`](StreamHandle::stop) to request a graceful shutdown and
///   await completion.
/// - [`abort`](StreamHandle::abort) force-cancels without waiting.
/// - If dropped without an explicit shutdown, a best-effort stop signal is
///   sent (when available) and the task is then aborted; the task may not
///   observe the signal before the abort.
#[derive(Debug)]
pub struct StreamHandle {
    inner: Option<JoinHandle<()>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl StreamHandle {
    /// Wrap a spawned task together with its graceful-stop channel.
    #[must_use]
    pub const fn new(inner: JoinHandle<()>, stop_tx: oneshot::Sender<()>) -> Self {
        Self {
            inner: Some(inner),
            stop_tx: Some(stop_tx),
        }
    }

    /// Wrap a task that supports no cooperative shutdown; stopping it always
    /// aborts.
    #[must_use]
    pub const fn new_abort_only(inner: JoinHandle<()>) -> Self {
        Self {
            inner: Some(inner),
            stop_tx: None,
        }
    }

    /// Whether the underlying task has already completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Request a graceful stop and await task completion. Task errors are
    /// ignored.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(inner) = self.inner.take() {
            let _ = inner.await;
        }
    }

    /// Force-cancel the task without waiting for completion.
    pub fn abort(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.abort();
        }
    }

    /// Disown the task: drop the handle without signalling or aborting.
    /// For the rare case where the task behind the handle is the caller
    /// performing its own terminal cleanup.
    pub fn detach(mut self) {
        self.stop_tx.take();
        self.inner.take();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(inner) = self.inner.take()
            && !inner.is_finished()
        {
            inner.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn stop_delivers_the_signal() {
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        let (tx, rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            let _ = rx.await;
            flag.store(true, Ordering::SeqCst);
        });
        StreamHandle::new(join, tx).stop().await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_aborts_a_running_task() {
        let (tx, rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            // Never observes the stop signal.
            let _keep = rx;
            std::future::pending::<()>().await;
        });
        let handle = StreamHandle::new(join, tx);
        drop(handle);
        tokio::task::yield_now().await;
    }
}
