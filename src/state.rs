use crate::bindings::RoleBindings;
use crate::config::ConfigDocument;
use crate::events::ActivityTracker;
use crate::lock::ResourceLock;
use crate::models::{Guild, RoleAssignation, UserAssignableRoles};
use crate::store::{EntityStore, StoreError};
use crate::tasks::TaskGroup;
use crate::telemetry::Telemetry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How work on one resource is serialized across instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockSettings {
	pub enabled: bool,
	pub lease_duration: Duration,
}

/// Everything the handlers share, built once at startup.
pub struct BotState {
	pub store: EntityStore,
	pub lock: Arc<ResourceLock>,
	pub bindings: RoleBindings,
	pub telemetry: Arc<dyn Telemetry>,
	pub tasks: TaskGroup,
	pub activities: ActivityTracker,
	pub lock_settings: LockSettings,
}

impl BotState {
	pub fn new(
		store: EntityStore,
		lock: Arc<ResourceLock>,
		telemetry: Arc<dyn Telemetry>,
		lock_settings: LockSettings,
	) -> Self {
		Self {
			bindings: RoleBindings::new(store.clone(), Arc::clone(&telemetry)),
			store,
			lock,
			telemetry,
			tasks: TaskGroup::new(),
			activities: ActivityTracker::default(),
			lock_settings,
		}
	}

	pub fn lock_settings_from(config: &ConfigDocument) -> LockSettings {
		LockSettings {
			enabled: config.locks.enabled,
			lease_duration: config.locks.lease_duration(),
		}
	}

	/// Creates the bot's tables up front.
	pub async fn prepare_collections(&self) -> Result<(), StoreError> {
		let created = [
			self.store.get_or_create_collection::<Guild>().await?,
			self.store.get_or_create_collection::<RoleAssignation>().await?,
			self.store.get_or_create_collection::<UserAssignableRoles>().await?,
		];
		info!(created = created.iter().filter(|created| **created).count(), "collections ready");
		Ok(())
	}

	/// Runs `operation` while holding `resource_id`, or right away when locking is disabled.
	///
	/// `None` means another instance holds the resource and the work was dropped.
	pub async fn exclusive<F, T>(&self, resource_id: &str, operation: F) -> Option<T>
	where
		F: Future<Output = T>,
	{
		if !self.lock_settings.enabled {
			return Some(operation.await);
		}
		self.lock
			.run_exclusive(resource_id, self.lock_settings.lease_duration, operation)
			.await
	}
}
