use crate::config::DatabaseArgs;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use miette::{miette, IntoDiagnostic};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn database_url(database: &DatabaseArgs) -> String {
	let port = database.port.unwrap_or(5432);
	format!(
		"postgres://{}:{}@{}:{}/{}",
		database.username, database.password, database.host, port, database.database
	)
}

pub fn connect_db(database: &DatabaseArgs) -> miette::Result<PgConnection> {
	PgConnection::establish(&database_url(database)).into_diagnostic()
}

pub fn run_embedded_migrations(db_connection: &mut PgConnection) -> miette::Result<()> {
	db_connection
		.run_pending_migrations(MIGRATIONS)
		.map_err(|error| miette!("Failed to run database migrations: {}", error))?;
	Ok(())
}
