use miette::{bail, IntoDiagnostic};
use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod bindings;
mod command_types;
mod commands;

mod config;
use config::{parse_config, ConfigDocument, StorageBackend};

mod database;
use database::{connect_db, run_embedded_migrations};

mod events;
mod handler;
use handler::Handler;

mod lock;
use lock::{LeaseService, MemoryLeaseService, PostgresLeaseService, ResourceLock};

mod models;
mod platform;
mod schema;

mod state;
use state::BotState;

mod store;
use store::{EntityStore, MemoryTableService, PostgresTableService, TableService};

mod tasks;

mod telemetry;
use telemetry::{Telemetry, TracingTelemetry};

fn backends(config: &ConfigDocument) -> miette::Result<(Arc<dyn TableService>, Arc<dyn LeaseService>)> {
	match config.storage.backend {
		StorageBackend::Memory => {
			if config.locks.enabled {
				warn!("in-memory leases only exclude work within this process");
			}
			Ok((
				Arc::new(MemoryTableService::new()),
				Arc::new(MemoryLeaseService::default()),
			))
		}
		StorageBackend::Postgres => {
			let Some(database) = &config.storage.database else {
				bail!("The postgres storage backend needs a database section");
			};
			let mut db_connection = connect_db(database)?;
			run_embedded_migrations(&mut db_connection)?;
			let db_connection = Arc::new(Mutex::new(db_connection));

			// Each service owns a connection so lease renewals never wait behind a long scan.
			let lease_connection = Arc::new(Mutex::new(connect_db(database)?));
			Ok((
				Arc::new(PostgresTableService::new(db_connection)),
				Arc::new(PostgresLeaseService::new(lease_connection, config.locks.container.clone())),
			))
		}
	}
}

#[tokio::main]
async fn main() -> miette::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let config = parse_config("config.kdl").await?;
	let (tables, leases) = backends(&config)?;

	let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry);
	let store = EntityStore::new(tables, Arc::clone(&telemetry));
	let lock = Arc::new(ResourceLock::new(leases, Arc::clone(&telemetry)));
	let state = Arc::new(BotState::new(
		store,
		lock,
		telemetry,
		BotState::lock_settings_from(&config),
	));
	state.prepare_collections().await?;

	let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MEMBERS | GatewayIntents::GUILD_PRESENCES;
	let mut client = Client::builder(&config.discord_bot_token, intents)
		.event_handler(Handler {
			state: Arc::clone(&state),
		})
		.await
		.into_diagnostic()?;

	let shard_manager = Arc::clone(&client.shard_manager);
	tokio::spawn(async move {
		if let Err(error) = tokio::signal::ctrl_c().await {
			warn!(%error, "failed to listen for the shutdown signal");
			return;
		}
		info!("shutting down");
		shard_manager.shutdown_all().await;
	});

	client.start().await.into_diagnostic()?;

	let aborted = state.tasks.shutdown(config.shutdown_timeout()).await;
	info!(aborted, "stopped");
	Ok(())
}
