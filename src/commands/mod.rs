use crate::bindings::BindingError;
use crate::command_types::{Caller, CommandErrorValue, CommandInvocation, CommandResult, OptionValues, RoleCommand};
use crate::platform::{Platform, SerenityPlatform};
use crate::state::BotState;
use miette::IntoDiagnostic;
use serenity::builder::{CreateCommand, CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage};
use serenity::client::Context;
use serenity::model::application::{CommandInteraction, ResolvedOption, ResolvedValue};
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{info, warn};

pub mod binding;
pub mod role;

/// Discord refuses embeds with more fields than this.
const EMBED_FIELD_LIMIT: usize = 25;

pub fn definitions() -> Vec<CreateCommand> {
	vec![binding::definition(), role::definition()]
}

pub fn parse(command: &str, subcommand: &str, options: &OptionValues) -> Result<RoleCommand, CommandErrorValue> {
	match command {
		"binding" => binding::parse(subcommand, options),
		"role" => role::parse(subcommand, options),
		_ => Err(CommandErrorValue::UnknownCommand {
			command: command.to_string(),
			subcommand: subcommand.to_string(),
		}),
	}
}

fn parse_resolved(command: &str, options: &[ResolvedOption<'_>]) -> Result<RoleCommand, CommandErrorValue> {
	let Some(subcommand) = options.first() else {
		return Err(CommandErrorValue::SubcommandExpected {
			command: command.to_string(),
		});
	};
	let ResolvedValue::SubCommand(subcommand_options) = &subcommand.value else {
		return Err(CommandErrorValue::SubcommandExpected {
			command: command.to_string(),
		});
	};
	parse(command, subcommand.name, &OptionValues::from_resolved(subcommand_options))
}

/// Runs the invocation while holding its channel.
///
/// `None` means the channel is locked by another instance and the invocation was dropped.
pub async fn handle(state: &BotState, platform: &dyn Platform, invocation: &CommandInvocation) -> Option<CommandResult> {
	let resource_id = invocation.channel.to_string();
	let result = state.exclusive(&resource_id, run(state, platform, invocation)).await;
	if result.is_none() {
		info!(resource_id, command = ?invocation.command, "channel is busy, dropping command");
	}
	result
}

pub async fn run(state: &BotState, platform: &dyn Platform, invocation: &CommandInvocation) -> CommandResult {
	let outcome = match binding::run(&state.bindings, platform, invocation.guild, &invocation.command).await {
		Some(outcome) => outcome,
		None => match role::run(
			&state.bindings,
			platform,
			invocation.guild,
			&invocation.caller,
			&invocation.command,
		)
		.await
		{
			Some(outcome) => outcome,
			None => return CommandResult::failure("This command is not supported."),
		},
	};

	match outcome {
		Ok(result) => result,
		Err(error) => {
			warn!(guild = %invocation.guild, command = ?invocation.command, %error, "command failed");
			if matches!(error, BindingError::Store(_) | BindingError::Platform(_)) {
				state.telemetry.track_exception(&error);
			}
			CommandResult::failure(error.to_string())
		}
	}
}

fn build_invocation(
	command: &str,
	options: &[ResolvedOption<'_>],
	guild: Option<GuildId>,
	channel: ChannelId,
	caller: Caller,
) -> Result<CommandInvocation, CommandErrorValue> {
	let Some(guild) = guild else {
		return Err(CommandErrorValue::GuildExpected);
	};
	Ok(CommandInvocation {
		command: parse_resolved(command, options)?,
		caller,
		guild,
		channel,
	})
}

pub async fn execute(state: &BotState, ctx: &Context, command: &CommandInteraction) -> miette::Result<()> {
	let caller = Caller {
		user: command.user.id,
		roles: command
			.member
			.as_ref()
			.map(|member| member.roles.clone())
			.unwrap_or_default(),
	};
	let invocation = build_invocation(
		&command.data.name,
		&command.data.options(),
		command.guild_id,
		command.channel_id,
		caller,
	)?;

	let platform = SerenityPlatform::new(Arc::clone(&ctx.http));
	let Some(result) = handle(state, &platform, &invocation).await else {
		return Ok(());
	};
	respond(ctx, command, &result).await
}

async fn respond(ctx: &Context, command: &CommandInteraction, result: &CommandResult) -> miette::Result<()> {
	let embeds: Vec<CreateEmbed> = result
		.sections
		.chunks(EMBED_FIELD_LIMIT)
		.map(|sections| {
			CreateEmbed::new().fields(
				sections
					.iter()
					.map(|section| (section.title.clone(), section.lines.join("\n"), false)),
			)
		})
		.collect();

	let message = CreateInteractionResponseMessage::new()
		.ephemeral(!result.success)
		.content(result.reply_content())
		.embeds(embeds);
	command
		.create_response(&ctx.http, CreateInteractionResponse::Message(message))
		.await
		.into_diagnostic()?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::command_types::OptionValue;
	use crate::lock::ResourceLock;
	use crate::platform::testing::{Call, RecordingPlatform};
	use crate::platform::GuildRole;
	use crate::state::testing::test_state;
	use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
	use std::time::Duration;

	const GUILD: GuildId = GuildId::new(1);
	const CHANNEL: ChannelId = ChannelId::new(2);
	const ADMIN: UserId = UserId::new(3);
	const GAMER: RoleId = RoleId::new(4);

	fn invocation(command: RoleCommand) -> CommandInvocation {
		CommandInvocation {
			command,
			caller: Caller {
				user: ADMIN,
				roles: Vec::new(),
			},
			guild: GUILD,
			channel: CHANNEL,
		}
	}

	#[test]
	fn parses_subcommands() {
		let options = OptionValues::default()
			.with("role", OptionValue::Role(GAMER))
			.with("order", OptionValue::Integer(2));
		assert_eq!(
			parse("binding", "unbind", &options),
			Ok(RoleCommand::Unbind {
				role: GAMER,
				order: Some(2)
			})
		);
		assert_eq!(
			parse("role", "list", &OptionValues::default()),
			Ok(RoleCommand::List { role: None })
		);
		assert_eq!(
			parse("binding", "bind", &options),
			Err(CommandErrorValue::MissingOption { option: "game" })
		);
		assert!(matches!(
			parse("binding", "dance", &options),
			Err(CommandErrorValue::UnknownCommand { .. })
		));
	}

	#[test]
	fn commands_need_a_guild() {
		let caller = Caller {
			user: ADMIN,
			roles: Vec::new(),
		};
		assert!(matches!(
			build_invocation("role", &[], None, CHANNEL, caller.clone()),
			Err(CommandErrorValue::GuildExpected)
		));
		assert!(matches!(
			build_invocation("role", &[], Some(GUILD), CHANNEL, caller),
			Err(CommandErrorValue::SubcommandExpected { .. })
		));
	}

	#[tokio::test(start_paused = true)]
	async fn bind_then_list() {
		let test = test_state();
		let mut platform = RecordingPlatform::default();
		platform.roles.push(GuildRole {
			id: GAMER,
			name: "Gamers".to_string(),
		});

		for command in [
			RoleCommand::Bind {
				role: GAMER,
				game_name: "Minecraft".to_string(),
			},
			RoleCommand::BindPattern {
				role: GAMER,
				pattern: "^Terraria".to_string(),
			},
		] {
			let result = handle(&test.state, &platform, &invocation(command)).await.unwrap();
			assert!(result.success, "{}", result.message);
		}

		let listed = handle(&test.state, &platform, &invocation(RoleCommand::List { role: None }))
			.await
			.unwrap();
		assert!(listed.success);
		assert_eq!(listed.sections.len(), 1);
		assert_eq!(listed.sections[0].title, "Gamers");
		assert_eq!(listed.sections[0].lines, ["0: Minecraft", "1: ^Terraria as a RegExp"]);
		assert!(!test.state.lock.holds(&CHANNEL.to_string()).await);
	}

	#[tokio::test(start_paused = true)]
	async fn invalid_patterns_are_refused() {
		let test = test_state();
		let platform = RecordingPlatform::default();
		let result = run(
			&test.state,
			&platform,
			&invocation(RoleCommand::BindPattern {
				role: GAMER,
				pattern: "(".to_string(),
			}),
		)
		.await;
		assert!(!result.success);
		assert!(test.state.bindings.list(GUILD, None).await.unwrap().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn domain_failures_are_replies_not_exceptions() {
		let test = test_state();
		let platform = RecordingPlatform::default();
		let from = RoleId::new(10);
		let allow = RoleCommand::AllowAssign { from, target: GAMER };

		assert!(run(&test.state, &platform, &invocation(allow.clone())).await.success);
		let duplicate = run(&test.state, &platform, &invocation(allow)).await;
		assert!(!duplicate.success);
		assert_eq!(duplicate.reply_content(), format!("❌ members holding role {} are already allowed to assign role {}", from, GAMER));
		assert!(test.telemetry.exceptions().is_empty());

		let assign = RoleCommand::Assign {
			role: GAMER,
			member: UserId::new(99),
		};
		let denied = run(&test.state, &platform, &invocation(assign.clone())).await;
		assert!(!denied.success);
		assert!(platform.calls().is_empty());

		let mut authorized = invocation(assign);
		authorized.caller.roles.push(from);
		assert!(run(&test.state, &platform, &authorized).await.success);
		assert_eq!(platform.calls(), [Call::Grant(GUILD, UserId::new(99), GAMER)]);
	}

	#[tokio::test(start_paused = true)]
	async fn members_only_remove_roles_they_hold() {
		let test = test_state();
		let mut platform = RecordingPlatform::default();
		platform.member_roles.insert(ADMIN, vec![GAMER]);
		test.state
			.bindings
			.bind(&platform, GUILD, GAMER, "Doom", false)
			.await
			.unwrap();

		let other_role = run(&test.state, &platform, &invocation(RoleCommand::RemoveRole { role: RoleId::new(5) })).await;
		assert!(!other_role.success);

		let removed = run(&test.state, &platform, &invocation(RoleCommand::RemoveRole { role: GAMER })).await;
		assert!(removed.success);
		assert_eq!(platform.calls(), [Call::Revoke(GUILD, ADMIN, GAMER)]);
	}

	#[tokio::test(start_paused = true)]
	async fn busy_channels_drop_commands() {
		let test = test_state();
		let platform = RecordingPlatform::default();
		let other = ResourceLock::new(test.leases.clone(), test.telemetry.clone());
		assert!(other.acquire(&CHANNEL.to_string(), Duration::from_secs(60)).await);

		let result = handle(&test.state, &platform, &invocation(RoleCommand::Consolidate)).await;
		assert_eq!(result, None);
	}
}
