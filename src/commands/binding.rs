use crate::bindings::{BindingError, RoleBindings};
use crate::command_types::{CommandErrorValue, CommandResult, OptionValues, RoleCommand};
use crate::platform::Platform;
use serenity::builder::{CreateCommand, CreateCommandOption};
use serenity::model::application::{CommandOptionType, CommandType};
use serenity::model::id::{GuildId, RoleId};
use serenity::model::permissions::Permissions;

fn role_option(name: &str, description: &str) -> CreateCommandOption {
	CreateCommandOption::new(CommandOptionType::Role, name, description).required(true)
}

pub fn definition() -> CreateCommand {
	let bind_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"bind",
		"Grants a role to members playing a game whose name contains the given text",
	)
	.add_sub_option(role_option("role", "The role to grant"))
	.add_sub_option(
		CreateCommandOption::new(CommandOptionType::String, "game", "Text the game name must contain").required(true),
	);
	let bindr_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"bindr",
		"Grants a role to members playing a game whose name matches a regular expression",
	)
	.add_sub_option(role_option("role", "The role to grant"))
	.add_sub_option(
		CreateCommandOption::new(CommandOptionType::String, "pattern", "Case-insensitive regular expression")
			.required(true),
	);
	let unbind_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"unbind",
		"Removes the bindings of a role, or only the one at the given position",
	)
	.add_sub_option(role_option("role", "The role to unbind"))
	.add_sub_option(
		CreateCommandOption::new(CommandOptionType::Integer, "order", "Position of the binding, as shown by /role list")
			.min_int_value(0),
	);
	let consolidate_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"consolidate",
		"Renumbers binding positions without gaps",
	);
	let allow_assign_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"allow_assign",
		"Lets members holding one role give another role to anyone",
	)
	.add_sub_option(role_option("from_role", "Role allowed to assign"))
	.add_sub_option(role_option("target_role", "Role that can be assigned"));
	let remove_assign_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"remove_assign",
		"Withdraws a permission given with allow_assign",
	)
	.add_sub_option(role_option("from_role", "Role allowed to assign"))
	.add_sub_option(role_option("target_role", "Role that can be assigned"));

	CreateCommand::new("binding")
		.kind(CommandType::ChatInput)
		.default_member_permissions(Permissions::MANAGE_ROLES)
		.dm_permission(false)
		.description("Manage which games grant which roles")
		.add_option(bind_subcommand)
		.add_option(bindr_subcommand)
		.add_option(unbind_subcommand)
		.add_option(consolidate_subcommand)
		.add_option(allow_assign_subcommand)
		.add_option(remove_assign_subcommand)
}

pub fn parse(subcommand: &str, options: &OptionValues) -> Result<RoleCommand, CommandErrorValue> {
	let command = match subcommand {
		"bind" => RoleCommand::Bind {
			role: options.role("role")?,
			game_name: options.text("game")?,
		},
		"bindr" => RoleCommand::BindPattern {
			role: options.role("role")?,
			pattern: options.text("pattern")?,
		},
		"unbind" => RoleCommand::Unbind {
			role: options.role("role")?,
			order: options.optional_integer("order")?,
		},
		"consolidate" => RoleCommand::Consolidate,
		"allow_assign" => RoleCommand::AllowAssign {
			from: options.role("from_role")?,
			target: options.role("target_role")?,
		},
		"remove_assign" => RoleCommand::RemoveAssign {
			from: options.role("from_role")?,
			target: options.role("target_role")?,
		},
		_ => {
			return Err(CommandErrorValue::UnknownCommand {
				command: "binding".to_string(),
				subcommand: subcommand.to_string(),
			})
		}
	};
	Ok(command)
}

/// Runs one of the administrative commands; `None` when `command` belongs elsewhere.
pub async fn run(
	bindings: &RoleBindings,
	platform: &dyn Platform,
	guild: GuildId,
	command: &RoleCommand,
) -> Option<Result<CommandResult, BindingError>> {
	let result = match command {
		RoleCommand::Bind { role, game_name } => bind(bindings, platform, guild, *role, game_name, false).await,
		RoleCommand::BindPattern { role, pattern } => bind(bindings, platform, guild, *role, pattern, true).await,
		RoleCommand::Unbind { role, order } => bindings
			.unbind(platform, guild, *role, *order)
			.await
			.map(|removed| match (removed, order) {
				(0, Some(order)) => CommandResult::failure(format!("<@&{}> has no binding at position {}.", role, order)),
				(0, None) => CommandResult::failure(format!("<@&{}> has no bindings.", role)),
				(1, _) => CommandResult::success(format!("Removed 1 binding of <@&{}>.", role)),
				(removed, _) => CommandResult::success(format!("Removed {} bindings of <@&{}>.", removed, role)),
			}),
		RoleCommand::Consolidate => bindings.consolidate_guild(guild).await.map(|changed| match changed {
			None => CommandResult::failure("This server has no bindings yet."),
			Some(changed) => CommandResult::success(format!("Renumbered {} bindings.", changed)),
		}),
		RoleCommand::AllowAssign { from, target } => bindings
			.allow_assign(platform, guild, *from, *target)
			.await
			.map(|_| CommandResult::success(format!("Members with <@&{}> can now assign <@&{}>.", from, target))),
		RoleCommand::RemoveAssign { from, target } => bindings
			.remove_assign(guild, *from, *target)
			.await
			.map(|_| CommandResult::success(format!("Members with <@&{}> can no longer assign <@&{}>.", from, target))),
		_ => return None,
	};
	Some(result)
}

async fn bind(
	bindings: &RoleBindings,
	platform: &dyn Platform,
	guild: GuildId,
	role: RoleId,
	text: &str,
	is_regexp: bool,
) -> Result<CommandResult, BindingError> {
	if is_regexp {
		if let Err(error) = regex::Regex::new(text) {
			return Ok(CommandResult::failure(format!("`{}` is not a valid pattern: {}", text, error)));
		}
	}
	let binding = bindings.bind(platform, guild, role, text, is_regexp).await?;
	Ok(CommandResult::success(format!("Bound <@&{}> as binding {}", role, binding.describe())))
}
