use crate::bindings::PresenceChange;
use crate::platform::Platform;
use crate::state::BotState;
use serenity::model::id::{GuildId, RoleId, UserId};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Last activity seen per guild member, since the gateway only sends the new presence.
#[derive(Default)]
pub struct ActivityTracker {
	last_activity: Mutex<HashMap<(GuildId, UserId), String>>,
}

impl ActivityTracker {
	/// Records `current` as the member's activity and returns the transition.
	pub fn observe(&self, guild: GuildId, member: UserId, current: Option<String>) -> PresenceChange {
		let mut last_activity = match self.last_activity.lock() {
			Ok(last_activity) => last_activity,
			Err(poisoned) => poisoned.into_inner(),
		};
		let previous_activity = match &current {
			Some(activity) => last_activity.insert((guild, member), activity.clone()),
			None => last_activity.remove(&(guild, member)),
		};
		PresenceChange {
			guild,
			member,
			previous_activity,
			current_activity: current,
		}
	}
}

pub fn presence_resource_id(guild: GuildId, member: UserId) -> String {
	format!("{}-{}", guild, member)
}

/// Grants the role bound to the member's new activity, if any.
pub async fn presence_changed(state: &BotState, platform: &dyn Platform, change: PresenceChange) -> Option<RoleId> {
	if change.changed_activity().is_none() {
		return None;
	}

	let resource_id = presence_resource_id(change.guild, change.member);
	let evaluated = state
		.exclusive(&resource_id, state.bindings.evaluate_presence(platform, &change))
		.await;
	match evaluated {
		None => {
			debug!(resource_id, "presence change handled elsewhere");
			None
		}
		Some(Ok(granted)) => {
			if let Some(role) = granted {
				info!(guild = %change.guild, member = %change.member, role = %role, "role granted from presence");
			}
			granted
		}
		Some(Err(error)) => {
			warn!(resource_id, %error, "failed to evaluate presence change");
			state.telemetry.track_exception(&error);
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::platform::testing::{Call, RecordingPlatform};
	use crate::lock::{LeaseService, ResourceLock};
	use crate::state::testing::test_state;
	use std::time::Duration;

	const GUILD: GuildId = GuildId::new(10);
	const MEMBER: UserId = UserId::new(20);
	const ROLE: RoleId = RoleId::new(30);

	#[test]
	fn tracker_reports_the_previous_activity() {
		let tracker = ActivityTracker::default();
		let first = tracker.observe(GUILD, MEMBER, Some("Doom".to_string()));
		assert_eq!(first.previous_activity, None);
		assert_eq!(first.changed_activity(), Some("Doom"));

		let repeated = tracker.observe(GUILD, MEMBER, Some("Doom".to_string()));
		assert_eq!(repeated.changed_activity(), None);

		let stopped = tracker.observe(GUILD, MEMBER, None);
		assert_eq!(stopped.previous_activity.as_deref(), Some("Doom"));
		assert_eq!(stopped.changed_activity(), None);

		let other_guild = tracker.observe(GuildId::new(11), MEMBER, Some("Doom".to_string()));
		assert_eq!(other_guild.previous_activity, None);
	}

	#[tokio::test(start_paused = true)]
	async fn presence_grants_the_bound_role_and_releases_the_lock() {
		let test = test_state();
		let platform = RecordingPlatform::default();
		test.state
			.bindings
			.bind(&platform, GUILD, ROLE, "Doom", false)
			.await
			.unwrap();

		let change = test.state.activities.observe(GUILD, MEMBER, Some("DOOM Eternal".to_string()));
		assert_eq!(presence_changed(&test.state, &platform, change).await, Some(ROLE));
		assert_eq!(platform.calls(), [Call::Grant(GUILD, MEMBER, ROLE)]);
		assert!(!test.state.lock.holds(&presence_resource_id(GUILD, MEMBER)).await);
	}

	#[tokio::test(start_paused = true)]
	async fn presence_is_dropped_while_another_instance_holds_the_member() {
		let test = test_state();
		let platform = RecordingPlatform::default();
		test.state
			.bindings
			.bind(&platform, GUILD, ROLE, "Doom", false)
			.await
			.unwrap();

		let other = ResourceLock::new(test.leases.clone(), test.telemetry.clone());
		assert!(other.acquire(&presence_resource_id(GUILD, MEMBER), Duration::from_secs(60)).await);

		let change = test.state.activities.observe(GUILD, MEMBER, Some("Doom".to_string()));
		assert_eq!(presence_changed(&test.state, &platform, change).await, None);
		assert!(platform.calls().is_empty());
	}

	#[tokio::test]
	async fn unchanged_presence_takes_no_lock() {
		let test = test_state();
		let platform = RecordingPlatform::default();
		let change = PresenceChange {
			guild: GUILD,
			member: MEMBER,
			previous_activity: Some("Doom".to_string()),
			current_activity: Some("Doom".to_string()),
		};

		assert_eq!(presence_changed(&test.state, &platform, change).await, None);
		let lock_object = test.leases.object_exists(&presence_resource_id(GUILD, MEMBER)).await;
		assert!(!lock_object.unwrap());
		assert_eq!(test.tables.call_counts(), Default::default());
	}
}
