use crate::bindings::{BindingError, RoleBindings};
use crate::command_types::{Caller, CommandErrorValue, CommandResult, OptionValues, ResultSection, RoleCommand};
use crate::models::RoleAssignation;
use crate::platform::Platform;
use serenity::builder::{CreateCommand, CreateCommandOption};
use serenity::model::application::{CommandOptionType, CommandType};
use serenity::model::id::{GuildId, RoleId, UserId};

pub fn definition() -> CreateCommand {
	let list_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"list",
		"Shows which games grant which roles",
	)
	.add_sub_option(CreateCommandOption::new(
		CommandOptionType::Role,
		"role",
		"Only show the bindings of this role",
	));
	let assign_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"assign",
		"Gives a role to a member, if one of your roles allows it",
	)
	.add_sub_option(
		CreateCommandOption::new(CommandOptionType::Role, "role", "The role to give").required(true),
	)
	.add_sub_option(
		CreateCommandOption::new(CommandOptionType::User, "member", "The member receiving the role").required(true),
	);
	let remove_subcommand = CreateCommandOption::new(
		CommandOptionType::SubCommand,
		"remove",
		"Removes a role the bot granted you",
	)
	.add_sub_option(
		CreateCommandOption::new(CommandOptionType::Role, "role", "The role to remove").required(true),
	);

	CreateCommand::new("role")
		.kind(CommandType::ChatInput)
		.dm_permission(false)
		.description("Game roles")
		.add_option(list_subcommand)
		.add_option(assign_subcommand)
		.add_option(remove_subcommand)
}

pub fn parse(subcommand: &str, options: &OptionValues) -> Result<RoleCommand, CommandErrorValue> {
	let command = match subcommand {
		"list" => RoleCommand::List {
			role: options.optional_role("role")?,
		},
		"assign" => RoleCommand::Assign {
			role: options.role("role")?,
			member: options.user("member")?,
		},
		"remove" => RoleCommand::RemoveRole {
			role: options.role("role")?,
		},
		_ => {
			return Err(CommandErrorValue::UnknownCommand {
				command: "role".to_string(),
				subcommand: subcommand.to_string(),
			})
		}
	};
	Ok(command)
}

/// Runs one of the member commands; `None` when `command` belongs elsewhere.
pub async fn run(
	bindings: &RoleBindings,
	platform: &dyn Platform,
	guild: GuildId,
	caller: &Caller,
	command: &RoleCommand,
) -> Option<Result<CommandResult, BindingError>> {
	let result = match command {
		RoleCommand::List { role } => list(bindings, platform, guild, *role).await,
		RoleCommand::Assign { role, member } => assign(bindings, platform, guild, caller, *role, *member).await,
		RoleCommand::RemoveRole { role } => remove(bindings, platform, guild, caller, *role).await,
		_ => return None,
	};
	Some(result)
}

async fn list(
	bindings: &RoleBindings,
	platform: &dyn Platform,
	guild: GuildId,
	role: Option<RoleId>,
) -> Result<CommandResult, BindingError> {
	let groups = bindings.list(guild, role).await?;
	if groups.is_empty() {
		return Ok(CommandResult::success("No roles are bound to games."));
	}

	let role_names = platform.guild_roles(guild).await?;
	let sections = groups
		.into_iter()
		.map(|group| {
			let title = role_names
				.iter()
				.find(|role| role.id == group.role)
				.map(|role| role.name.clone())
				.unwrap_or_else(|| format!("Role {}", group.role));
			ResultSection {
				title,
				lines: group.bindings.iter().map(RoleAssignation::describe).collect(),
			}
		})
		.collect();
	Ok(CommandResult::success("Roles bound to games:").with_sections(sections))
}

async fn assign(
	bindings: &RoleBindings,
	platform: &dyn Platform,
	guild: GuildId,
	caller: &Caller,
	role: RoleId,
	member: UserId,
) -> Result<CommandResult, BindingError> {
	if bindings.assign(platform, guild, &caller.roles, role, member).await? {
		Ok(CommandResult::success(format!("Gave <@&{}> to <@{}>.", role, member)))
	} else {
		Ok(CommandResult::failure(format!("None of your roles can assign <@&{}>.", role)))
	}
}

async fn remove(
	bindings: &RoleBindings,
	platform: &dyn Platform,
	guild: GuildId,
	caller: &Caller,
	role: RoleId,
) -> Result<CommandResult, BindingError> {
	let held = platform.member_roles(guild, caller.user).await?;
	if !held.contains(&role) {
		return Ok(CommandResult::failure(format!("You don't have <@&{}>.", role)));
	}
	bindings.remove_role(platform, guild, caller.user, role).await?;
	Ok(CommandResult::success(format!("Removed <@&{}>.", role)))
}
