use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Background handlers that must get a chance to finish before the process exits.
#[derive(Default)]
pub struct TaskGroup {
	tasks: Mutex<JoinSet<()>>,
}

impl TaskGroup {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn spawn<F>(&self, task: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let mut tasks = self.tasks.lock().await;
		// Reap finished handlers so the set only holds running ones.
		while let Some(result) = tasks.try_join_next() {
			if let Err(error) = result {
				warn!(%error, "background task failed");
			}
		}
		tasks.spawn(task);
	}

	#[cfg(test)]
	pub async fn len(&self) -> usize {
		self.tasks.lock().await.len()
	}

	/// Waits up to `timeout` for running tasks, then aborts the rest.
	///
	/// Returns how many tasks had to be aborted.
	pub async fn shutdown(&self, timeout: Duration) -> usize {
		let mut tasks = self.tasks.lock().await;
		debug!(running = tasks.len(), "draining background tasks");

		let drained = tokio::time::timeout(timeout, async {
			while let Some(result) = tasks.join_next().await {
				if let Err(error) = result {
					warn!(%error, "background task failed");
				}
			}
		})
		.await;
		if drained.is_ok() {
			return 0;
		}

		let remaining = tasks.len();
		warn!(remaining, "shutdown timeout reached, aborting background tasks");
		tasks.shutdown().await;
		remaining
	}
}
