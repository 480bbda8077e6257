use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;

/// Cooperative cancellation shared between a caller and the requests it starts.
/// Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Request tasks bound to one [`CancelToken`]. Shutting the set down signals
/// cancellation and then waits for every task to unwind on its own.
#[derive(Debug)]
pub struct TaskSet<T> {
    cancel: CancelToken,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> TaskSet<T> {
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.tasks.spawn(task(self.cancel.clone()));
    }

    /// Wait for every task without cancelling them.
    pub async fn join_all(mut self) -> Vec<T> {
        self.drain().await
    }

    pub async fn shutdown(mut self) -> Vec<T> {
        self.cancel.cancel();
        self.drain().await
    }

    async fn drain(&mut self) -> Vec<T> {
        let mut outputs = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(output) => outputs.push(output),
                Err(err) => tracing::warn!(error = %err, "client task did not complete"),
            }
        }
        outputs
    }
}

impl<T: Send + 'static> Default for TaskSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
