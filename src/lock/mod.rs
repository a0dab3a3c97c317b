//! Mutual exclusion across bot instances, built on leases over named objects.
//!
//! The lease store is the only source of truth for who holds a resource. The handles cached
//! here only let this process renew and release what it acquired. Within one process,
//! [`ResourceLock::run_exclusive`] also admits a single operation per resource, since the
//! cached handle would otherwise let a second task in on the same lease.

mod memory;
mod postgres;

pub use memory::MemoryLeaseService;
pub use postgres::PostgresLeaseService;

use crate::telemetry::{Severity, Telemetry};
use miette::Diagnostic;
use serenity::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Client-proposed identifier of a lease.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeaseId(String);

impl LeaseId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn generate() -> Self {
		Self(cuid2::create_id())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for LeaseId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Diagnostic, Error)]
pub enum LockError {
	#[error("resource {resource} was never locked")]
	NeverLocked { resource: String },
	#[error("this process holds no lease on resource {resource}")]
	NoLocalHandle { resource: String },
	#[error("no lock object exists for resource {resource}")]
	ObjectNotFound { resource: String },
	#[error("resource {resource} is leased by another holder")]
	LeaseAlreadyPresent { resource: String },
	#[error("resource {resource} is not leased")]
	LeaseNotPresent { resource: String },
	#[error("lease {lease} does not match the lease held on resource {resource}")]
	LeaseMismatch { resource: String, lease: LeaseId },
	#[error(transparent)]
	Database(#[from] diesel::result::Error),
}

/// Lease-capable object store primitive.
///
/// Acquiring with the id of the lease currently held renews it; an expired lease is free.
#[async_trait]
pub trait LeaseService: Send + Sync {
	async fn object_exists(&self, name: &str) -> Result<bool, LockError>;

	/// Creates an empty object. Returns `true` when it did not exist before.
	async fn create_object_if_not_exists(&self, name: &str) -> Result<bool, LockError>;

	async fn acquire_lease(&self, name: &str, proposed: &LeaseId, duration: Duration) -> Result<LeaseId, LockError>;

	async fn release_lease(&self, name: &str, lease: &LeaseId) -> Result<(), LockError>;
}

#[derive(Clone, Debug)]
struct LeaseHandle {
	lease_id: LeaseId,
	expires_at: Instant,
}

pub struct ResourceLock {
	service: Arc<dyn LeaseService>,
	leases: Mutex<HashMap<String, LeaseHandle>>,
	in_flight: SyncMutex<HashSet<String>>,
	telemetry: Arc<dyn Telemetry>,
}

/// A running `run_exclusive` operation. Dropping it stops the renewal ticker and frees the
/// resource for the next operation of this process.
struct ExclusiveClaim<'a> {
	lock: &'a ResourceLock,
	resource_id: String,
	renewal: Option<JoinHandle<()>>,
}

impl Drop for ExclusiveClaim<'_> {
	fn drop(&mut self) {
		if let Some(renewal) = self.renewal.take() {
			renewal.abort();
		}
		self.lock
			.in_flight
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(&self.resource_id);
	}
}

impl ResourceLock {
	pub fn new(service: Arc<dyn LeaseService>, telemetry: Arc<dyn Telemetry>) -> Self {
		Self {
			service,
			leases: Mutex::new(HashMap::new()),
			in_flight: SyncMutex::new(HashSet::new()),
			telemetry,
		}
	}

	async fn cached_lease(&self, resource_id: &str) -> Option<LeaseId> {
		self.leases
			.lock()
			.await
			.get(resource_id)
			.map(|handle| handle.lease_id.clone())
	}

	async fn try_acquire(&self, resource_id: &str, duration: Duration) -> Result<LeaseHandle, LockError> {
		self.service.create_object_if_not_exists(resource_id).await?;

		let proposed = match self.cached_lease(resource_id).await {
			Some(lease_id) => lease_id,
			None => LeaseId::generate(),
		};
		let requested_at = Instant::now();
		let lease_id = self.service.acquire_lease(resource_id, &proposed, duration).await?;
		Ok(LeaseHandle {
			lease_id,
			expires_at: requested_at + duration,
		})
	}

	/// Tries to take (or renew) the lease on `resource_id`.
	///
	/// `false` means another holder may be processing the resource; callers must leave it alone.
	pub async fn acquire(&self, resource_id: &str, duration: Duration) -> bool {
		match self.try_acquire(resource_id, duration).await {
			Ok(handle) => {
				debug!(resource_id, lease = %handle.lease_id, "lease acquired");
				self.leases.lock().await.insert(resource_id.to_string(), handle);
				true
			}
			Err(error) => {
				self.leases.lock().await.remove(resource_id);
				self.telemetry.track_exception(&error);
				false
			}
		}
	}

	pub async fn release(&self, resource_id: &str) -> Result<(), LockError> {
		if !self.service.object_exists(resource_id).await? {
			return Err(LockError::NeverLocked {
				resource: resource_id.to_string(),
			});
		}
		let Some(lease_id) = self.cached_lease(resource_id).await else {
			return Err(LockError::NoLocalHandle {
				resource: resource_id.to_string(),
			});
		};

		self.service.release_lease(resource_id, &lease_id).await?;
		self.leases.lock().await.remove(resource_id);
		debug!(resource_id, lease = %lease_id, "lease released");
		Ok(())
	}

	/// Whether this process believes it holds an unexpired lease on `resource_id`.
	#[cfg(test)]
	pub async fn holds(&self, resource_id: &str) -> bool {
		self.leases
			.lock()
			.await
			.get(resource_id)
			.is_some_and(|handle| handle.expires_at > Instant::now())
	}

	fn claim(&self, resource_id: &str) -> Option<ExclusiveClaim<'_>> {
		let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
		if !in_flight.insert(resource_id.to_string()) {
			return None;
		}
		Some(ExclusiveClaim {
			lock: self,
			resource_id: resource_id.to_string(),
			renewal: None,
		})
	}

	fn track_lock_failure(&self, resource_id: &str) {
		self.telemetry.track_trace(
			&format!("Lock failed on resource {}", resource_id),
			Severity::Information,
		);
	}

	/// Runs `operation` while holding `resource_id`, renewing the lease until it completes.
	///
	/// Returns `None` without running anything when the lease is held elsewhere, or when
	/// another operation of this process is already running on `resource_id`.
	pub async fn run_exclusive<F, T>(self: &Arc<Self>, resource_id: &str, duration: Duration, operation: F) -> Option<T>
	where
		F: Future<Output = T>,
	{
		let Some(mut claim) = self.claim(resource_id) else {
			info!(resource_id, "resource is busy in this process, dropping work");
			self.track_lock_failure(resource_id);
			return None;
		};
		if !self.acquire(resource_id, duration).await {
			info!(resource_id, "resource is locked elsewhere, dropping work");
			self.track_lock_failure(resource_id);
			return None;
		}

		claim.renewal = Some(tokio::spawn(renew_until_stopped(
			Arc::clone(self),
			resource_id.to_string(),
			duration,
		)));
		let output = operation.await;
		if let Some(renewal) = claim.renewal.take() {
			renewal.abort();
			// A renewal still in flight would otherwise land after the release.
			let _ = renewal.await;
		}

		if let Err(error) = self.release(resource_id).await {
			warn!(resource_id, %error, "failed to release lease");
			self.telemetry.track_exception(&error);
		}
		drop(claim);
		Some(output)
	}
}

async fn renew_until_stopped(lock: Arc<ResourceLock>, resource_id: String, duration: Duration) {
	let period = (duration / 2).max(Duration::from_millis(1));
	let mut ticker = interval(period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// The first tick completes immediately.
	ticker.tick().await;
	loop {
		ticker.tick().await;
		if !lock.acquire(&resource_id, duration).await {
			warn!(resource_id, "lease renewal failed, another instance may take over the resource");
			lock.telemetry.track_trace(
				&format!("Lease renewal failed on resource {}", resource_id),
				Severity::Warning,
			);
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::telemetry::testing::RecordingTelemetry;
	use std::sync::atomic::{AtomicBool, Ordering};

	const LEASE: Duration = Duration::from_secs(60);

	fn holder(service: &Arc<MemoryLeaseService>) -> Arc<ResourceLock> {
		Arc::new(ResourceLock::new(
			service.clone(),
			Arc::new(RecordingTelemetry::default()),
		))
	}

	#[tokio::test(start_paused = true)]
	async fn only_one_holder_at_a_time() {
		let service = Arc::new(MemoryLeaseService::default());
		let first = holder(&service);
		let second = holder(&service);

		let (a, b) = tokio::join!(first.acquire("channel-1", LEASE), second.acquire("channel-1", LEASE));
		assert!(a ^ b, "exactly one concurrent acquisition succeeds");

		let (winner, loser) = if a { (first, second) } else { (second, first) };
		assert!(!loser.acquire("channel-1", LEASE).await);
		assert!(!loser.holds("channel-1").await);

		winner.release("channel-1").await.unwrap();
		assert!(loser.acquire("channel-1", LEASE).await);
	}

	#[tokio::test(start_paused = true)]
	async fn expired_leases_can_be_taken_over() {
		let service = Arc::new(MemoryLeaseService::default());
		let first = holder(&service);
		let second = holder(&service);

		assert!(first.acquire("user-1", LEASE).await);
		tokio::time::advance(LEASE - Duration::from_secs(1)).await;
		assert!(!second.acquire("user-1", LEASE).await);

		tokio::time::advance(Duration::from_secs(2)).await;
		assert!(!first.holds("user-1").await);
		assert!(second.acquire("user-1", LEASE).await);
		assert!(!first.acquire("user-1", LEASE).await);
	}

	#[tokio::test(start_paused = true)]
	async fn holder_renews_with_its_cached_lease() {
		let service = Arc::new(MemoryLeaseService::default());
		let first = holder(&service);
		let second = holder(&service);

		assert!(first.acquire("user-1", LEASE).await);
		tokio::time::advance(Duration::from_secs(45)).await;
		assert!(first.acquire("user-1", LEASE).await);

		tokio::time::advance(Duration::from_secs(45)).await;
		assert!(first.holds("user-1").await);
		assert!(!second.acquire("user-1", LEASE).await);
	}

	#[tokio::test]
	async fn release_requires_an_acquired_lease() {
		let service = Arc::new(MemoryLeaseService::default());
		let first = holder(&service);
		let second = holder(&service);

		assert!(matches!(
			first.release("never").await,
			Err(LockError::NeverLocked { .. })
		));

		assert!(first.acquire("channel-1", LEASE).await);
		assert!(matches!(
			second.release("channel-1").await,
			Err(LockError::NoLocalHandle { .. })
		));

		first.release("channel-1").await.unwrap();
		assert!(matches!(
			first.release("channel-1").await,
			Err(LockError::NoLocalHandle { .. })
		));
	}

	#[tokio::test]
	async fn failed_acquisition_drops_the_cached_handle() {
		let service = Arc::new(MemoryLeaseService::default());
		let telemetry = Arc::new(RecordingTelemetry::default());
		let first = holder(&service);
		let second = Arc::new(ResourceLock::new(service.clone(), telemetry.clone()));

		assert!(first.acquire("channel-1", LEASE).await);
		assert!(!second.acquire("channel-1", LEASE).await);
		assert!(!second.holds("channel-1").await);
		assert_eq!(telemetry.exceptions().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn run_exclusive_renews_long_operations() {
		let service = Arc::new(MemoryLeaseService::default());
		let first = holder(&service);
		let second = holder(&service);
		let short = Duration::from_secs(10);

		let finished = Arc::new(AtomicBool::new(false));
		let task = {
			let first = first.clone();
			let finished = finished.clone();
			tokio::spawn(async move {
				first
					.run_exclusive("user-1", short, async {
						tokio::time::sleep(Duration::from_secs(35)).await;
						finished.store(true, Ordering::SeqCst);
						"done"
					})
					.await
			})
		};

		tokio::time::sleep(Duration::from_secs(30)).await;
		assert!(!finished.load(Ordering::SeqCst));
		assert!(!second.acquire("user-1", short).await, "lease outlives its duration while renewed");

		assert_eq!(task.await.unwrap(), Some("done"));
		assert!(second.acquire("user-1", short).await, "lease is released afterwards");
	}

	#[tokio::test(start_paused = true)]
	async fn one_operation_per_resource_within_a_process() {
		let service = Arc::new(MemoryLeaseService::default());
		let first = holder(&service);
		let other_instance = holder(&service);

		let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
		let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();
		let slow = {
			let first = first.clone();
			tokio::spawn(async move {
				first
					.run_exclusive("channel-1", LEASE, async move {
						let _ = entered_tx.send(());
						let _ = finish_rx.await;
						"slow"
					})
					.await
			})
		};
		entered_rx.await.unwrap();

		assert_eq!(first.run_exclusive("channel-1", LEASE, async { "quick" }).await, None);
		assert!(
			!other_instance.acquire("channel-1", LEASE).await,
			"lease stays with the running operation"
		);

		finish_tx.send(()).unwrap();
		assert_eq!(slow.await.unwrap(), Some("slow"));
		assert_eq!(first.run_exclusive("channel-1", LEASE, async { "again" }).await, Some("again"));
		assert!(other_instance.acquire("channel-1", LEASE).await);
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_operations_free_the_resource() {
		let service = Arc::new(MemoryLeaseService::default());
		let first = holder(&service);

		let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
		let task = {
			let first = first.clone();
			tokio::spawn(async move {
				first
					.run_exclusive("user-1", LEASE, async move {
						let _ = entered_tx.send(());
						std::future::pending::<()>().await
					})
					.await
			})
		};
		entered_rx.await.unwrap();
		task.abort();
		assert!(task.await.unwrap_err().is_cancelled());

		assert_eq!(first.run_exclusive("user-1", LEASE, async { 1 }).await, Some(1));
	}

	#[tokio::test(start_paused = true)]
	async fn run_exclusive_skips_work_when_locked_elsewhere() {
		let service = Arc::new(MemoryLeaseService::default());
		let first = holder(&service);
		let second = holder(&service);

		assert!(first.acquire("channel-1", LEASE).await);
		let ran = second.run_exclusive("channel-1", LEASE, async { true }).await;
		assert_eq!(ran, None);
	}
}
