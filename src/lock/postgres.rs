use super::{LeaseId, LeaseService, LockError};
use crate::schema::resource_leases;
use diesel::prelude::*;
use serenity::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

fn now_millis() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
		.unwrap_or_default()
}

/// Whether a lease row blocks `proposed` at `now`. Expired and released leases block nobody.
fn held_by_other(held: Option<&str>, expires_at: Option<i64>, proposed: &LeaseId, now: i64) -> bool {
	let active = expires_at.is_some_and(|expires_at| expires_at > now);
	active && held.is_some_and(|held| held != proposed.as_str())
}

fn expiry_after(now: i64, duration: Duration) -> i64 {
	let duration_millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
	now.saturating_add(duration_millis)
}

/// Lease store keeping one row per lock object, all in one container.
///
/// Expiry is wall-clock milliseconds, so every instance sharing the database must keep its clock in sync.
pub struct PostgresLeaseService {
	db_connection: Arc<Mutex<PgConnection>>,
	container: String,
}

impl PostgresLeaseService {
	pub fn new(db_connection: Arc<Mutex<PgConnection>>, container: impl Into<String>) -> Self {
		Self {
			db_connection,
			container: container.into(),
		}
	}

	fn not_found(name: &str) -> LockError {
		LockError::ObjectNotFound {
			resource: name.to_string(),
		}
	}
}

type LeaseColumns = (Option<String>, Option<i64>);

#[async_trait]
impl LeaseService for PostgresLeaseService {
	async fn object_exists(&self, name: &str) -> Result<bool, LockError> {
		let mut db_connection = self.db_connection.lock().await;
		let count: i64 = resource_leases::table
			.find((&self.container, name))
			.count()
			.get_result(&mut *db_connection)?;
		Ok(count > 0)
	}

	async fn create_object_if_not_exists(&self, name: &str) -> Result<bool, LockError> {
		let mut db_connection = self.db_connection.lock().await;
		let inserted = diesel::insert_into(resource_leases::table)
			.values((
				resource_leases::container.eq(&self.container),
				resource_leases::resource_id.eq(name),
			))
			.on_conflict_do_nothing()
			.execute(&mut *db_connection)?;
		Ok(inserted == 1)
	}

	async fn acquire_lease(&self, name: &str, proposed: &LeaseId, duration: Duration) -> Result<LeaseId, LockError> {
		let mut db_connection = self.db_connection.lock().await;
		db_connection.transaction(|db_connection| {
			let current: Option<LeaseColumns> = resource_leases::table
				.find((&self.container, name))
				.select((resource_leases::lease_id, resource_leases::lease_expires_at))
				.for_update()
				.get_result(db_connection)
				.optional()?;
			let Some((held, expires_at)) = current else {
				return Err(Self::not_found(name));
			};

			let now = now_millis();
			if held_by_other(held.as_deref(), expires_at, proposed, now) {
				return Err(LockError::LeaseAlreadyPresent {
					resource: name.to_string(),
				});
			}

			diesel::update(resource_leases::table.find((&self.container, name)))
				.set((
					resource_leases::lease_id.eq(proposed.as_str()),
					resource_leases::lease_expires_at.eq(expiry_after(now, duration)),
				))
				.execute(db_connection)?;
			Ok(proposed.clone())
		})
	}

	async fn release_lease(&self, name: &str, lease: &LeaseId) -> Result<(), LockError> {
		let mut db_connection = self.db_connection.lock().await;
		db_connection.transaction(|db_connection| {
			let current: Option<Option<String>> = resource_leases::table
				.find((&self.container, name))
				.select(resource_leases::lease_id)
				.for_update()
				.get_result(db_connection)
				.optional()?;
			match current {
				None => Err(Self::not_found(name)),
				Some(None) => Err(LockError::LeaseNotPresent {
					resource: name.to_string(),
				}),
				Some(Some(held)) if held != lease.as_str() => Err(LockError::LeaseMismatch {
					resource: name.to_string(),
					lease: lease.clone(),
				}),
				Some(Some(_)) => {
					diesel::update(resource_leases::table.find((&self.container, name)))
						.set((
							resource_leases::lease_id.eq(None::<String>),
							resource_leases::lease_expires_at.eq(None::<i64>),
						))
						.execute(db_connection)?;
					Ok(())
				}
			}
		})
	}
}
