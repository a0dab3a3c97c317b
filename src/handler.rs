use crate::events::presence_changed;
use crate::platform::SerenityPlatform;
use crate::state::BotState;
use serenity::async_trait;
use serenity::model::application::{Command, Interaction};
use serenity::model::gateway::{ActivityType, Presence, Ready};
use serenity::prelude::*;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct Handler {
	pub state: Arc<BotState>,
}

#[async_trait]
impl EventHandler for Handler {
	async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
		if let Interaction::Command(command) = interaction {
			if let Err(error) = crate::commands::execute(&self.state, &ctx, &command).await {
				error!(command = %command.data.name, error = ?error, "command error");
			}
		}
	}

	async fn presence_update(&self, ctx: Context, new_data: Presence) {
		let Some(guild) = new_data.guild_id else {
			return;
		};
		if new_data.user.bot == Some(true) {
			return;
		}

		let activity = new_data
			.activities
			.iter()
			.find(|activity| activity.kind != ActivityType::Custom)
			.map(|activity| activity.name.clone());
		let change = self.state.activities.observe(guild, new_data.user.id, activity);
		if change.changed_activity().is_none() {
			return;
		}
		debug!(guild = %guild, member = %change.member, activity = ?change.current_activity, "activity changed");

		let state = Arc::clone(&self.state);
		let http = Arc::clone(&ctx.http);
		self.state
			.tasks
			.spawn(async move {
				let platform = SerenityPlatform::new(http);
				presence_changed(&state, &platform, change).await;
			})
			.await;
	}

	async fn ready(&self, ctx: Context, data_about_bot: Ready) {
		info!(
			user = %data_about_bot.user.name,
			guilds = data_about_bot.guilds.len(),
			"connected to Discord"
		);
		if let Err(error) = Command::set_global_commands(&ctx.http, crate::commands::definitions()).await {
			error!(%error, "failed to register commands");
		}
	}
}
