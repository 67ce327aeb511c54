//! Cooperative cancellation
//!
//! A contest ending or a withdrawn submission must stop judging promptly:
//! the sandboxed process group is killed mid-case, and the remaining test
//! cases of that run are abandoned rather than salvaged. Cancellation is a
//! watch channel so every stage can both poll it between steps and await it
//! inside a select.

use tokio::sync::watch;

/// Create a connected cancellation handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx, _keep: None })
}

/// The requesting side: signals cancellation to every token clone
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Receivers having gone away just means there is nothing to cancel
        let _ = self.tx.send(true);
    }
}

/// The observing side: cheap to clone, shared by workers and stages
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    // Keeps the channel alive for tokens that can never fire
    _keep: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// A token that never fires, for one-shot judging without a supervisor
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keep: Some(std::sync::Arc::new(tx)),
        }
    }

    /// Check for cancellation without blocking
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, this pends forever;
    /// callers race it against the work being supervised.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
