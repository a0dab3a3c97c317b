use miette::Diagnostic;
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::id::{GuildId, RoleId, UserId};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum PlatformError {
	#[error(transparent)]
	Serenity(#[from] serenity::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuildRole {
	pub id: RoleId,
	pub name: String,
}

/// Calls the bot makes on the chat platform.
#[async_trait]
pub trait Platform: Send + Sync {
	async fn grant_role(&self, guild: GuildId, member: UserId, role: RoleId, reason: &str) -> Result<(), PlatformError>;

	async fn revoke_role(&self, guild: GuildId, member: UserId, role: RoleId, reason: &str) -> Result<(), PlatformError>;

	async fn member_roles(&self, guild: GuildId, member: UserId) -> Result<Vec<RoleId>, PlatformError>;

	async fn guild_roles(&self, guild: GuildId) -> Result<Vec<GuildRole>, PlatformError>;

	async fn guild_name(&self, guild: GuildId) -> Result<String, PlatformError>;
}

/// Discord through serenity's HTTP client.
pub struct SerenityPlatform {
	http: Arc<Http>,
}

impl SerenityPlatform {
	pub fn new(http: Arc<Http>) -> Self {
		Self { http }
	}
}

#[async_trait]
impl Platform for SerenityPlatform {
	async fn grant_role(&self, guild: GuildId, member: UserId, role: RoleId, reason: &str) -> Result<(), PlatformError> {
		self.http.add_member_role(guild, member, role, Some(reason)).await?;
		Ok(())
	}

	async fn revoke_role(&self, guild: GuildId, member: UserId, role: RoleId, reason: &str) -> Result<(), PlatformError> {
		self.http.remove_member_role(guild, member, role, Some(reason)).await?;
		Ok(())
	}

	async fn member_roles(&self, guild: GuildId, member: UserId) -> Result<Vec<RoleId>, PlatformError> {
		let member = self.http.get_member(guild, member).await?;
		Ok(member.roles)
	}

	async fn guild_roles(&self, guild: GuildId) -> Result<Vec<GuildRole>, PlatformError> {
		let roles = self.http.get_guild_roles(guild).await?;
		Ok(roles
			.into_iter()
			.map(|role| GuildRole {
				id: role.id,
				name: role.name,
			})
			.collect())
	}

	async fn guild_name(&self, guild: GuildId) -> Result<String, PlatformError> {
		let guild = self.http.get_guild(guild).await?;
		Ok(guild.name)
	}
}

#[cfg(test)]
pub mod testing {
	use super::{GuildRole, Platform, PlatformError};
	use serenity::async_trait;
	use serenity::model::id::{GuildId, RoleId, UserId};
	use std::collections::HashMap;
	use std::sync::Mutex;

	#[derive(Clone, Debug, PartialEq, Eq)]
	pub enum Call {
		Grant(GuildId, UserId, RoleId),
		Revoke(GuildId, UserId, RoleId),
	}

	/// Platform double remembering role mutations.
	#[derive(Default)]
	pub struct RecordingPlatform {
		pub member_roles: HashMap<UserId, Vec<RoleId>>,
		pub roles: Vec<GuildRole>,
		calls: Mutex<Vec<Call>>,
	}

	impl RecordingPlatform {
		pub fn calls(&self) -> Vec<Call> {
			self.calls.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl Platform for RecordingPlatform {
		async fn grant_role(&self, guild: GuildId, member: UserId, role: RoleId, _reason: &str) -> Result<(), PlatformError> {
			self.calls.lock().unwrap().push(Call::Grant(guild, member, role));
			Ok(())
		}

		async fn revoke_role(&self, guild: GuildId, member: UserId, role: RoleId, _reason: &str) -> Result<(), PlatformError> {
			self.calls.lock().unwrap().push(Call::Revoke(guild, member, role));
			Ok(())
		}

		async fn member_roles(&self, _guild: GuildId, member: UserId) -> Result<Vec<RoleId>, PlatformError> {
			Ok(self.member_roles.get(&member).cloned().unwrap_or_default())
		}

		async fn guild_roles(&self, _guild: GuildId) -> Result<Vec<GuildRole>, PlatformError> {
			Ok(self.roles.clone())
		}

		async fn guild_name(&self, guild: GuildId) -> Result<String, PlatformError> {
			Ok(format!("Guild {}", guild))
		}
	}
}
