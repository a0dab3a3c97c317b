use super::{LeaseId, LeaseService, LockError};
use serenity::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Default)]
struct LeasedObject {
	lease: Option<(LeaseId, Instant)>,
}

impl LeasedObject {
	fn active_lease(&self) -> Option<&LeaseId> {
		match &self.lease {
			Some((lease_id, expires_at)) if *expires_at > Instant::now() => Some(lease_id),
			_ => None,
		}
	}
}

/// Lease store shared by every [`ResourceLock`](super::ResourceLock) of one process.
///
/// Expiry follows tokio's clock, so paused-time tests can advance past a lease.
#[derive(Default)]
pub struct MemoryLeaseService {
	objects: Mutex<HashMap<String, LeasedObject>>,
}

fn not_found(name: &str) -> LockError {
	LockError::ObjectNotFound {
		resource: name.to_string(),
	}
}

#[async_trait]
impl LeaseService for MemoryLeaseService {
	async fn object_exists(&self, name: &str) -> Result<bool, LockError> {
		Ok(self.objects.lock().await.contains_key(name))
	}

	async fn create_object_if_not_exists(&self, name: &str) -> Result<bool, LockError> {
		let mut objects = self.objects.lock().await;
		if objects.contains_key(name) {
			return Ok(false);
		}
		objects.insert(name.to_string(), LeasedObject::default());
		Ok(true)
	}

	async fn acquire_lease(&self, name: &str, proposed: &LeaseId, duration: Duration) -> Result<LeaseId, LockError> {
		let mut objects = self.objects.lock().await;
		let object = objects.get_mut(name).ok_or_else(|| not_found(name))?;
		if object.active_lease().is_some_and(|held| held != proposed) {
			return Err(LockError::LeaseAlreadyPresent {
				resource: name.to_string(),
			});
		}
		object.lease = Some((proposed.clone(), Instant::now() + duration));
		Ok(proposed.clone())
	}

	async fn release_lease(&self, name: &str, lease: &LeaseId) -> Result<(), LockError> {
		let mut objects = self.objects.lock().await;
		let object = objects.get_mut(name).ok_or_else(|| not_found(name))?;
		match &object.lease {
			None => Err(LockError::LeaseNotPresent {
				resource: name.to_string(),
			}),
			Some((held, _)) if held != lease => Err(LockError::LeaseMismatch {
				resource: name.to_string(),
				lease: lease.clone(),
			}),
			Some(_) => {
				object.lease = None;
				Ok(())
			}
		}
	}
}
