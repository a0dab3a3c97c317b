use knuffel::{Decode, DecodeScalar};
use miette::IntoDiagnostic;
use std::time::Duration;
use tokio::fs;

pub async fn parse_config(config_path: &str) -> miette::Result<ConfigDocument> {
	let config_file_contents = fs::read_to_string(config_path).await.into_diagnostic()?;
	parse_config_text(config_path, &config_file_contents)
}

pub fn parse_config_text(config_path: &str, config_text: &str) -> miette::Result<ConfigDocument> {
	let config = knuffel::parse(config_path, config_text)?;
	Ok(config)
}

#[derive(Debug, Decode)]
pub struct ConfigDocument {
	#[knuffel(child, unwrap(argument))]
	pub discord_bot_token: String,
	#[knuffel(child)]
	pub storage: StorageArgs,
	#[knuffel(child, default)]
	pub locks: LockArgs,
	/// Seconds in-flight presence handlers get to finish on shutdown.
	#[knuffel(child, unwrap(argument), default = 10)]
	pub shutdown_timeout_secs: u64,
}

impl ConfigDocument {
	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_secs(self.shutdown_timeout_secs)
	}
}

#[derive(Clone, Copy, Debug, DecodeScalar, PartialEq, Eq)]
pub enum StorageBackend {
	Memory,
	Postgres,
}

#[derive(Debug, Decode)]
pub struct StorageArgs {
	#[knuffel(child, unwrap(argument))]
	pub backend: StorageBackend,
	#[knuffel(child)]
	pub database: Option<DatabaseArgs>,
}

#[derive(Debug, Decode)]
pub struct DatabaseArgs {
	#[knuffel(child, unwrap(argument))]
	pub host: String,
	#[knuffel(child, unwrap(argument))]
	pub port: Option<u16>,
	#[knuffel(child, unwrap(argument))]
	pub username: String,
	#[knuffel(child, unwrap(argument))]
	pub password: String,
	#[knuffel(child, unwrap(argument))]
	pub database: String,
}

#[derive(Debug, Decode)]
pub struct LockArgs {
	/// Without locks every instance handles every event; only safe with a single instance.
	#[knuffel(child, unwrap(argument), default = true)]
	pub enabled: bool,
	#[knuffel(child, unwrap(argument), default = "locks".into())]
	pub container: String,
	#[knuffel(child, unwrap(argument), default = 60)]
	pub lease_duration_secs: u64,
}

impl LockArgs {
	const DEFAULT_CONTAINER: &'static str = "locks";

	pub fn lease_duration(&self) -> Duration {
		Duration::from_secs(self.lease_duration_secs)
	}
}

impl Default for LockArgs {
	fn default() -> Self {
		Self {
			enabled: true,
			container: Self::DEFAULT_CONTAINER.to_string(),
			lease_duration_secs: 60,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_a_postgres_config() {
		let config = parse_config_text(
			"config.kdl",
			r#"
			discord-bot-token "token"
			storage {
				backend "postgres"
				database {
					host "localhost"
					username "bot"
					password "secret"
					database "roles"
				}
			}
			locks {
				container "role-bot"
				lease-duration-secs 30
			}
			"#,
		)
		.unwrap();

		assert_eq!(config.discord_bot_token, "token");
		assert_eq!(config.storage.backend, StorageBackend::Postgres);
		let database = config.storage.database.as_ref().unwrap();
		assert_eq!(database.host, "localhost");
		assert_eq!(database.port, None);
		assert!(config.locks.enabled);
		assert_eq!(config.locks.container, "role-bot");
		assert_eq!(config.locks.lease_duration(), Duration::from_secs(30));
		assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
	}

	#[test]
	fn locks_default_when_omitted() {
		let config = parse_config_text(
			"config.kdl",
			r#"
			discord-bot-token "token"
			storage {
				backend "memory"
			}
			shutdown-timeout-secs 3
			"#,
		)
		.unwrap();

		assert_eq!(config.storage.backend, StorageBackend::Memory);
		assert!(config.storage.database.is_none());
		assert!(config.locks.enabled);
		assert_eq!(config.locks.container, "locks");
		assert_eq!(config.locks.lease_duration(), Duration::from_secs(60));
		assert_eq!(config.shutdown_timeout(), Duration::from_secs(3));
	}
}
