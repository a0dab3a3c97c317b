use crate::store::{ChildOf, Entity, EntityKey, ParentRef, Properties, PropertyReader, PropertyValue, StoreError};
use regex::RegexBuilder;
use serenity::model::id::{GuildId, RoleId};

/// Every guild lives in this one partition.
pub const GUILD_PARTITION: &str = "Guild";

pub fn role_to_storage(role: RoleId) -> i64 {
	role.get() as i64
}

fn guild_partition(guild: GuildId) -> String {
	guild.get().to_string()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Guild {
	pub id: GuildId,
	pub name: String,
	pub role_assignations: Option<Vec<RoleAssignation>>,
	pub assignable_roles: Option<Vec<UserAssignableRoles>>,
}

impl Guild {
	pub fn new(id: GuildId, name: impl Into<String>) -> Self {
		Self {
			id,
			name: name.into(),
			role_assignations: None,
			assignable_roles: None,
		}
	}

	pub fn row_key(id: GuildId) -> String {
		id.get().to_string()
	}
}

impl Entity for Guild {
	const TABLE: &'static str = "Guild";

	fn key(&self) -> EntityKey {
		EntityKey::new(GUILD_PARTITION, Self::row_key(self.id))
	}

	fn to_properties(&self) -> Properties {
		let mut properties = Properties::new();
		properties.insert("Name".to_string(), PropertyValue::from(self.name.as_str()));
		properties
	}

	fn from_row(key: EntityKey, properties: PropertyReader<'_>) -> Result<Self, StoreError> {
		let id = properties.key_id("RowKey", &key.row_key)?;
		let name = properties.optional_string("Name")?.unwrap_or_default();
		Ok(Self::new(GuildId::new(id), name))
	}
}

/// Binds a role to a game name, or to a pattern matched against game names.
#[derive(Clone, Debug, PartialEq)]
pub struct RoleAssignation {
	pub id: String,
	pub guild_id: GuildId,
	pub game_name: String,
	pub is_regexp: bool,
	pub role_id: RoleId,
	/// Evaluation priority, lowest first.
	pub order: i64,
	pub guild: Option<ParentRef<Guild>>,
}

impl RoleAssignation {
	pub fn new(guild: &Guild, role_id: RoleId, game_name: impl Into<String>, is_regexp: bool, order: i64) -> Self {
		Self {
			id: cuid2::create_id(),
			guild_id: guild.id,
			game_name: game_name.into(),
			is_regexp,
			role_id,
			order,
			guild: Some(ParentRef::to(guild)),
		}
	}

	/// Tests the binding against an activity name, ignoring case.
	pub fn matches(&self, activity: &str) -> Result<bool, regex::Error> {
		if self.is_regexp {
			let pattern = RegexBuilder::new(&self.game_name).case_insensitive(true).build()?;
			Ok(pattern.is_match(activity))
		} else {
			Ok(activity.to_lowercase().contains(&self.game_name.to_lowercase()))
		}
	}

	pub fn describe(&self) -> String {
		if self.is_regexp {
			format!("{}: {} as a RegExp", self.order, self.game_name)
		} else {
			format!("{}: {}", self.order, self.game_name)
		}
	}
}

impl Entity for RoleAssignation {
	const TABLE: &'static str = "RoleAssignation";

	fn key(&self) -> EntityKey {
		EntityKey::new(guild_partition(self.guild_id), self.id.as_str())
	}

	fn to_properties(&self) -> Properties {
		let mut properties = Properties::new();
		properties.insert("GameName".to_string(), PropertyValue::from(self.game_name.as_str()));
		properties.insert("IsRegExp".to_string(), PropertyValue::from(self.is_regexp));
		properties.insert("RoleStorage".to_string(), PropertyValue::from(role_to_storage(self.role_id)));
		properties.insert("Order".to_string(), PropertyValue::from(self.order));
		properties
	}

	fn from_row(key: EntityKey, properties: PropertyReader<'_>) -> Result<Self, StoreError> {
		let guild_id = properties.key_id("PartitionKey", &key.partition_key)?;
		Ok(Self {
			id: key.row_key,
			guild_id: GuildId::new(guild_id),
			game_name: properties.string("GameName")?,
			is_regexp: properties.bool("IsRegExp")?,
			role_id: RoleId::new(properties.id("RoleStorage")?),
			order: properties.int64("Order")?,
			guild: None,
		})
	}
}

impl ChildOf<Guild> for RoleAssignation {
	fn link_parent(&mut self, parent: &Guild) {
		self.guild = Some(ParentRef::to(parent));
	}
}

/// Lets members holding `from_role_id` hand out `target_role_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct UserAssignableRoles {
	pub id: String,
	pub guild_id: GuildId,
	pub target_role_id: RoleId,
	pub from_role_id: RoleId,
	pub guild: Option<ParentRef<Guild>>,
}

impl UserAssignableRoles {
	pub fn new(guild: &Guild, target_role_id: RoleId, from_role_id: RoleId) -> Self {
		Self {
			id: cuid2::create_id(),
			guild_id: guild.id,
			target_role_id,
			from_role_id,
			guild: Some(ParentRef::to(guild)),
		}
	}
}

impl Entity for UserAssignableRoles {
	const TABLE: &'static str = "UserAssignableRoles";

	fn key(&self) -> EntityKey {
		EntityKey::new(guild_partition(self.guild_id), self.id.as_str())
	}

	fn to_properties(&self) -> Properties {
		let mut properties = Properties::new();
		properties.insert(
			"TargetRoleStorage".to_string(),
			PropertyValue::from(role_to_storage(self.target_role_id)),
		);
		properties.insert(
			"FromRoleStorage".to_string(),
			PropertyValue::from(role_to_storage(self.from_role_id)),
		);
		properties
	}

	fn from_row(key: EntityKey, properties: PropertyReader<'_>) -> Result<Self, StoreError> {
		let guild_id = properties.key_id("PartitionKey", &key.partition_key)?;
		Ok(Self {
			id: key.row_key,
			guild_id: GuildId::new(guild_id),
			target_role_id: RoleId::new(properties.id("TargetRoleStorage")?),
			from_role_id: RoleId::new(properties.id("FromRoleStorage")?),
			guild: None,
		})
	}
}

impl ChildOf<Guild> for UserAssignableRoles {
	fn link_parent(&mut self, parent: &Guild) {
		self.guild = Some(ParentRef::to(parent));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn binding(game_name: &str, is_regexp: bool) -> RoleAssignation {
		let guild = Guild::new(GuildId::new(1), "Test");
		RoleAssignation::new(&guild, RoleId::new(2), game_name, is_regexp, 0)
	}

	#[test]
	fn literal_bindings_match_substrings_ignoring_case() {
		let binding = binding("minecraft", false);
		assert!(binding.matches("Playing MINECRAFT Classic").unwrap());
		assert!(!binding.matches("Terraria").unwrap());
	}

	#[test]
	fn pattern_bindings_ignore_case() {
		let binding = binding("^Call of Duty.*", true);
		assert!(binding.matches("Call of Duty: Warzone").unwrap());
		assert!(binding.matches("call of duty").unwrap());
		assert!(!binding.matches("Need for Speed").unwrap());
	}

	#[test]
	fn invalid_patterns_are_errors() {
		assert!(binding("(unclosed", true).matches("anything").is_err());
		assert!(binding("(unclosed", false).matches("(unclosed group").unwrap());
	}

	#[test]
	fn children_are_partitioned_by_guild() {
		let binding = binding("Minecraft", false);
		let key = binding.key();
		assert_eq!(key.partition_key, "1");
		assert_eq!(key.row_key, binding.id);
		assert_eq!(Guild::new(GuildId::new(1), "Test").key(), EntityKey::new("Guild", "1"));
	}

	#[test]
	fn describes_bindings() {
		assert_eq!(binding("Minecraft", false).describe(), "0: Minecraft");
		assert_eq!(binding("^Doom", true).describe(), "0: ^Doom as a RegExp");
	}
}
