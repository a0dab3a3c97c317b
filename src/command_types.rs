use miette::Diagnostic;
use serenity::model::application::{ResolvedOption, ResolvedValue};
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error, PartialEq, Eq)]
pub enum CommandErrorValue {
	#[error("expected guild in command data")]
	GuildExpected,
	#[error("expected a subcommand for /{command}")]
	SubcommandExpected { command: String },
	#[error("unexpected command /{command} {subcommand}")]
	UnknownCommand { command: String, subcommand: String },
	#[error("missing option `{option}`")]
	MissingOption { option: &'static str },
	#[error("option `{option}` has the wrong type")]
	WrongOptionType { option: &'static str },
}

/// Everything the bot can be asked to do through a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleCommand {
	Bind { role: RoleId, game_name: String },
	BindPattern { role: RoleId, pattern: String },
	Unbind { role: RoleId, order: Option<i64> },
	Consolidate,
	AllowAssign { from: RoleId, target: RoleId },
	RemoveAssign { from: RoleId, target: RoleId },
	List { role: Option<RoleId> },
	Assign { role: RoleId, member: UserId },
	RemoveRole { role: RoleId },
}

/// A slash command option value, detached from the interaction it came with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
	Role(RoleId),
	User(UserId),
	Text(String),
	Integer(i64),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionValues(HashMap<String, OptionValue>);

impl OptionValues {
	pub fn from_resolved(options: &[ResolvedOption<'_>]) -> Self {
		let values = options
			.iter()
			.filter_map(|option| {
				let value = match &option.value {
					ResolvedValue::Role(role) => OptionValue::Role(role.id),
					ResolvedValue::User(user, _) => OptionValue::User(user.id),
					ResolvedValue::String(text) => OptionValue::Text(text.to_string()),
					ResolvedValue::Integer(number) => OptionValue::Integer(*number),
					_ => return None,
				};
				Some((option.name.to_string(), value))
			})
			.collect();
		Self(values)
	}

	pub fn with(mut self, name: &str, value: OptionValue) -> Self {
		self.0.insert(name.to_string(), value);
		self
	}

	fn get(&self, option: &str) -> Option<&OptionValue> {
		self.0.get(option)
	}

	pub fn role(&self, option: &'static str) -> Result<RoleId, CommandErrorValue> {
		self.optional_role(option)?
			.ok_or(CommandErrorValue::MissingOption { option })
	}

	pub fn optional_role(&self, option: &'static str) -> Result<Option<RoleId>, CommandErrorValue> {
		match self.get(option) {
			None => Ok(None),
			Some(OptionValue::Role(role)) => Ok(Some(*role)),
			Some(_) => Err(CommandErrorValue::WrongOptionType { option }),
		}
	}

	pub fn user(&self, option: &'static str) -> Result<UserId, CommandErrorValue> {
		match self.get(option) {
			None => Err(CommandErrorValue::MissingOption { option }),
			Some(OptionValue::User(user)) => Ok(*user),
			Some(_) => Err(CommandErrorValue::WrongOptionType { option }),
		}
	}

	pub fn text(&self, option: &'static str) -> Result<String, CommandErrorValue> {
		match self.get(option) {
			None => Err(CommandErrorValue::MissingOption { option }),
			Some(OptionValue::Text(text)) => Ok(text.clone()),
			Some(_) => Err(CommandErrorValue::WrongOptionType { option }),
		}
	}

	pub fn optional_integer(&self, option: &'static str) -> Result<Option<i64>, CommandErrorValue> {
		match self.get(option) {
			None => Ok(None),
			Some(OptionValue::Integer(number)) => Ok(Some(*number)),
			Some(_) => Err(CommandErrorValue::WrongOptionType { option }),
		}
	}
}

/// Who ran a command, with the roles they held at the time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
	pub user: UserId,
	pub roles: Vec<RoleId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandInvocation {
	pub command: RoleCommand,
	pub caller: Caller,
	pub guild: GuildId,
	pub channel: ChannelId,
}

/// A titled block of lines, shown as one embed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSection {
	pub title: String,
	pub lines: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
	pub success: bool,
	pub message: String,
	pub sections: Vec<ResultSection>,
}

impl CommandResult {
	pub fn success(message: impl Into<String>) -> Self {
		Self {
			success: true,
			message: message.into(),
			sections: Vec::new(),
		}
	}

	pub fn failure(message: impl Into<String>) -> Self {
		Self {
			success: false,
			message: message.into(),
			sections: Vec::new(),
		}
	}

	pub fn with_sections(mut self, sections: Vec<ResultSection>) -> Self {
		self.sections = sections;
		self
	}

	/// Reply text, marked with the outcome.
	pub fn reply_content(&self) -> String {
		let mark = if self.success { '✅' } else { '❌' };
		format!("{} {}", mark, self.message)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn options_check_their_types() {
		let options = OptionValues::default()
			.with("role", OptionValue::Role(RoleId::new(3)))
			.with("game", OptionValue::Text("Doom".to_string()));

		assert_eq!(options.role("role"), Ok(RoleId::new(3)));
		assert_eq!(options.text("game"), Ok("Doom".to_string()));
		assert_eq!(options.optional_integer("order"), Ok(None));
		assert_eq!(
			options.role("game"),
			Err(CommandErrorValue::WrongOptionType { option: "game" })
		);
		assert_eq!(
			options.user("member"),
			Err(CommandErrorValue::MissingOption { option: "member" })
		);
	}

	#[test]
	fn replies_are_marked() {
		assert_eq!(CommandResult::success("Done").reply_content(), "✅ Done");
		assert_eq!(CommandResult::failure("Nope").reply_content(), "❌ Nope");
	}
}
