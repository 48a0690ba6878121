//! Manages the lifecycle of all spawned tasks in the application.
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A centralized manager for all spawned tasks.
///
/// Owns the root cancellation token. Every request context is a child of it,
/// so cancelling the root reaches in-flight deliveries and pending retries.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
    root: CancellationToken,
}

impl TaskManager {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            root,
        }
    }

    /// Spawns a new task and adds its handle to the manager.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((name, handle));
    }

    /// Waits up to `grace` for all tasks to finish on their own, then cancels
    /// the root token and waits for the rest.
    pub async fn shutdown(self, grace: Duration) {
        let handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect::<Vec<_>>();
        info!(
            "TaskManager shutting down. Waiting for {} tasks to complete...",
            handles.len()
        );

        let task_names: Vec<&'static str> = handles.iter().map(|(name, _)| *name).collect();
        debug!(tasks = ?task_names, "Awaiting all tasks.");

        let all = join_all(handles.into_iter().map(|(_, handle)| handle));
        tokio::pin!(all);
        let results = match tokio::time::timeout(grace, all.as_mut()).await {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    grace_seconds = grace.as_secs_f64(),
                    "Tasks still running after the grace period, cancelling in-flight work."
                );
                self.root.cancel();
                all.await
            }
        };
        self.root.cancel();

        let mut panics = Vec::new();
        for (task_name, result) in task_names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name, "Task panicked during shutdown.");
                    panics.push((task_name, e));
                }
            }
        }

        if !panics.is_empty() {
            error!(
                "{} tasks panicked during shutdown: {:?}",
                panics.len(),
                panics
            );
        } else {
            info!("All tasks shut down gracefully.");
        }
    }
}
