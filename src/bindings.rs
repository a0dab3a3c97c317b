//! Rules binding roles to games, and self-service role grants.

use crate::models::{role_to_storage, Guild, RoleAssignation, UserAssignableRoles};
use crate::platform::{Platform, PlatformError};
use crate::store::{Batch, EntityStore, Filter, StoreError, MAX_BATCH_OPERATIONS};
use crate::telemetry::{Severity, Telemetry};
use miette::Diagnostic;
use serenity::model::id::{GuildId, RoleId, UserId};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Diagnostic, Error)]
pub enum BindingError {
	#[error(transparent)]
	#[diagnostic(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Platform(#[from] PlatformError),
	#[error("members holding role {from} are already allowed to assign role {target}")]
	AlreadyAuthorized { from: RoleId, target: RoleId },
	#[error("members holding role {from} are not allowed to assign role {target}")]
	NoAuthorizations { from: RoleId, target: RoleId },
	#[error("role {role} is not managed by this bot")]
	RoleNotManaged { role: RoleId },
}

/// A member's activity moving from one game to another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceChange {
	pub guild: GuildId,
	pub member: UserId,
	pub previous_activity: Option<String>,
	pub current_activity: Option<String>,
}

impl PresenceChange {
	/// The new activity name, when it differs from the previous one and is not empty.
	pub fn changed_activity(&self) -> Option<&str> {
		let current = self.current_activity.as_deref().filter(|name| !name.is_empty())?;
		if self.previous_activity.as_deref() == Some(current) {
			return None;
		}
		Some(current)
	}
}

/// Bindings of one role, ordered by evaluation priority.
#[derive(Clone, Debug, PartialEq)]
pub struct RoleBindingGroup {
	pub role: RoleId,
	pub bindings: Vec<RoleAssignation>,
}

#[derive(Clone)]
pub struct RoleBindings {
	store: EntityStore,
	telemetry: Arc<dyn Telemetry>,
}

impl RoleBindings {
	pub fn new(store: EntityStore, telemetry: Arc<dyn Telemetry>) -> Self {
		Self { store, telemetry }
	}

	pub async fn find_guild(&self, guild_id: GuildId) -> Result<Option<Guild>, BindingError> {
		self.store.get_or_create_collection::<Guild>().await?;
		let guild = self
			.store
			.query::<Guild>(
				Filter::partition_key()
					.eq(crate::models::GUILD_PARTITION)
					.and(Filter::row_key().eq(Guild::row_key(guild_id))),
			)?
			.first()
			.await?;
		Ok(guild)
	}

	/// Finds the guild, registering it first when it is unknown. The flag tells whether it was just registered.
	pub async fn ensure_guild(&self, platform: &dyn Platform, guild_id: GuildId) -> Result<(Guild, bool), BindingError> {
		if let Some(guild) = self.find_guild(guild_id).await? {
			return Ok((guild, false));
		}

		let name = platform.guild_name(guild_id).await?;
		let guild = Guild::new(guild_id, name);
		self.store.insert_or_merge(&guild).await?;
		info!(guild = %guild_id, name = %guild.name, "registered guild");
		Ok((guild, true))
	}

	async fn load_role_assignations(&self, guild: &mut Guild) -> Result<(), BindingError> {
		self.store
			.load_children(guild, |guild| &mut guild.role_assignations)
			.await?;
		Ok(())
	}

	/// Adds a binding evaluated after every existing one.
	#[instrument(skip(self, platform))]
	pub async fn bind(
		&self,
		platform: &dyn Platform,
		guild_id: GuildId,
		role: RoleId,
		game_name: &str,
		is_regexp: bool,
	) -> Result<RoleAssignation, BindingError> {
		let (mut guild, _) = self.ensure_guild(platform, guild_id).await?;
		self.load_role_assignations(&mut guild).await?;

		let next_order = guild
			.role_assignations
			.iter()
			.flatten()
			.map(|binding| binding.order)
			.max()
			.map_or(0, |last| last + 1);

		let binding = RoleAssignation::new(&guild, role, game_name, is_regexp, next_order);
		self.store.insert(&binding).await?;
		Ok(binding)
	}

	/// Removes the bindings of `role`, or only the one at `order`, then consolidates orders.
	///
	/// Returns how many bindings were removed.
	#[instrument(skip(self, platform))]
	pub async fn unbind(
		&self,
		platform: &dyn Platform,
		guild_id: GuildId,
		role: RoleId,
		order: Option<i64>,
	) -> Result<usize, BindingError> {
		let (mut guild, created) = self.ensure_guild(platform, guild_id).await?;
		if created {
			return Ok(0);
		}

		let role_filter = Filter::partition_key()
			.eq(Guild::row_key(guild_id))
			.and(Filter::property("RoleStorage").eq(role_to_storage(role)));
		let removed = match order {
			None => self.store.delete_where::<RoleAssignation>(role_filter).await?,
			Some(order) => {
				self.store.get_or_create_collection::<RoleAssignation>().await?;
				let binding = self
					.store
					.query::<RoleAssignation>(role_filter.and(Filter::property("Order").eq(order)))?
					.first()
					.await?;
				match binding {
					Some(binding) => {
						self.store.delete(&binding).await?;
						1
					}
					None => 0,
				}
			}
		};

		self.consolidate(&mut guild).await?;
		Ok(removed)
	}

	/// Renumbers the guild's binding orders to 0, 1, 2… keeping their relative order.
	///
	/// Returns how many bindings changed.
	#[instrument(skip(self, guild), fields(guild = %guild.id))]
	pub async fn consolidate(&self, guild: &mut Guild) -> Result<usize, BindingError> {
		if guild.role_assignations.as_ref().map_or(true, Vec::is_empty) {
			self.load_role_assignations(guild).await?;
		}
		let bindings = guild.role_assignations.get_or_insert_with(Vec::new);
		if bindings.is_empty() {
			self.telemetry.track_event("No roles to reorder, finishing");
			return Ok(0);
		}

		bindings.sort_by_key(|binding| binding.order);
		let mut changed = Vec::new();
		for (position, binding) in bindings.iter_mut().enumerate() {
			let order = position as i64;
			if binding.order != order {
				binding.order = order;
				changed.push(binding.clone());
			}
		}

		for chunk in changed.chunks(MAX_BATCH_OPERATIONS) {
			let mut batch = Batch::new();
			for binding in chunk {
				batch.merge(binding);
			}
			self.store.batch_mutate(batch).await?;
		}
		debug!(changed = changed.len(), "consolidated binding orders");
		Ok(changed.len())
	}

	/// Consolidates a known guild; unknown guilds are left alone.
	pub async fn consolidate_guild(&self, guild_id: GuildId) -> Result<Option<usize>, BindingError> {
		let Some(mut guild) = self.find_guild(guild_id).await? else {
			self.telemetry
				.track_event(&format!("Guild {} unknown, doing nothing", guild_id));
			return Ok(None);
		};
		Ok(Some(self.consolidate(&mut guild).await?))
	}

	/// Bindings grouped by role, optionally only those of `role`.
	pub async fn list(&self, guild_id: GuildId, role: Option<RoleId>) -> Result<Vec<RoleBindingGroup>, BindingError> {
		self.telemetry
			.track_event(&format!("Binding list requested for Guild {}", guild_id));
		let Some(mut guild) = self.find_guild(guild_id).await? else {
			return Ok(Vec::new());
		};
		self.load_role_assignations(&mut guild).await?;

		let mut groups: BTreeMap<RoleId, Vec<RoleAssignation>> = BTreeMap::new();
		for binding in guild.role_assignations.unwrap_or_default() {
			if role.map_or(true, |role| role == binding.role_id) {
				groups.entry(binding.role_id).or_default().push(binding);
			}
		}

		Ok(groups
			.into_iter()
			.map(|(role, mut bindings)| {
				bindings.sort_by_key(|binding| binding.order);
				RoleBindingGroup { role, bindings }
			})
			.collect())
	}

	/// Grants the role of the first binding matching the member's new activity.
	///
	/// Returns the granted role. Unchanged or empty activities are ignored without touching the store.
	#[instrument(skip(self, platform, change), fields(guild = %change.guild, member = %change.member))]
	pub async fn evaluate_presence(
		&self,
		platform: &dyn Platform,
		change: &PresenceChange,
	) -> Result<Option<RoleId>, BindingError> {
		let Some(activity) = change.changed_activity() else {
			return Ok(None);
		};

		let (mut guild, created) = self.ensure_guild(platform, change.guild).await?;
		if created {
			// A guild seen for the first time has no bindings yet.
			return Ok(None);
		}
		self.load_role_assignations(&mut guild).await?;

		let mut bindings = guild.role_assignations.unwrap_or_default();
		bindings.sort_by_key(|binding| binding.order);

		for binding in &bindings {
			match binding.matches(activity) {
				Ok(true) => {}
				Ok(false) => continue,
				Err(error) => {
					self.telemetry.track_exception(&error);
					continue;
				}
			}

			let reason = format!("Playing {}", activity);
			match platform
				.grant_role(change.guild, change.member, binding.role_id, &reason)
				.await
			{
				Ok(()) => {
					info!(role = %binding.role_id, activity, "granted role for activity");
					return Ok(Some(binding.role_id));
				}
				Err(error) => {
					self.telemetry.track_exception(&error);
					continue;
				}
			}
		}
		Ok(None)
	}

	/// Lets members holding `from` assign `target`.
	pub async fn allow_assign(
		&self,
		platform: &dyn Platform,
		guild_id: GuildId,
		from: RoleId,
		target: RoleId,
	) -> Result<UserAssignableRoles, BindingError> {
		let (mut guild, _) = self.ensure_guild(platform, guild_id).await?;
		self.store
			.load_children(&mut guild, |guild| &mut guild.assignable_roles)
			.await?;

		let exists = guild
			.assignable_roles
			.iter()
			.flatten()
			.any(|rule| rule.from_role_id == from && rule.target_role_id == target);
		if exists {
			let error = BindingError::AlreadyAuthorized { from, target };
			self.telemetry.track_event(&error.to_string());
			return Err(error);
		}

		let rule = UserAssignableRoles::new(&guild, target, from);
		self.store.insert(&rule).await?;
		Ok(rule)
	}

	/// Grants `target` to `member` when the caller holds a role allowed to assign it.
	///
	/// Returns whether the role was granted; an unauthorized caller is not an error.
	pub async fn assign(
		&self,
		platform: &dyn Platform,
		guild_id: GuildId,
		caller_roles: &[RoleId],
		target: RoleId,
		member: UserId,
	) -> Result<bool, BindingError> {
		self.store.get_or_create_collection::<UserAssignableRoles>().await?;
		let rules = self
			.store
			.query::<UserAssignableRoles>(
				Filter::partition_key()
					.eq(Guild::row_key(guild_id))
					.and(Filter::property("TargetRoleStorage").eq(role_to_storage(target))),
			)?
			.collect_all()
			.await?;

		if rules.is_empty() {
			self.telemetry
				.track_event(&format!("No existing role assignations for guild {}", guild_id));
			return Ok(false);
		}

		if !rules.iter().any(|rule| caller_roles.contains(&rule.from_role_id)) {
			self.telemetry.track_trace(
				&format!("Role {} cannot be assigned by the caller, missing role", target),
				Severity::Information,
			);
			return Ok(false);
		}

		platform
			.grant_role(guild_id, member, target, "Assigned by an authorized member")
			.await?;
		Ok(true)
	}

	/// Withdraws every authorization for members holding `from` to assign `target`.
	pub async fn remove_assign(&self, guild_id: GuildId, from: RoleId, target: RoleId) -> Result<usize, BindingError> {
		let removed = self
			.store
			.delete_where::<UserAssignableRoles>(
				Filter::partition_key()
					.eq(Guild::row_key(guild_id))
					.and(Filter::property("FromRoleStorage").eq(role_to_storage(from)))
					.and(Filter::property("TargetRoleStorage").eq(role_to_storage(target))),
			)
			.await?;
		if removed == 0 {
			return Err(BindingError::NoAuthorizations { from, target });
		}
		Ok(removed)
	}

	/// Takes a role granted by the bot off the member who asks for it.
	pub async fn remove_role(
		&self,
		platform: &dyn Platform,
		guild_id: GuildId,
		member: UserId,
		role: RoleId,
	) -> Result<(), BindingError> {
		let (_, created) = self.ensure_guild(platform, guild_id).await?;
		if created {
			return Err(BindingError::RoleNotManaged { role });
		}

		self.store.get_or_create_collection::<RoleAssignation>().await?;
		let managed = self
			.store
			.query::<RoleAssignation>(
				Filter::partition_key()
					.eq(Guild::row_key(guild_id))
					.and(Filter::property("RoleStorage").eq(role_to_storage(role))),
			)?
			.first()
			.await?;
		if managed.is_none() {
			let error = BindingError::RoleNotManaged { role };
			self.telemetry.track_trace(&error.to_string(), Severity::Information);
			return Err(error);
		}

		platform
			.revoke_role(guild_id, member, role, "Requested by the member")
			.await?;
		Ok(())
	}
}
