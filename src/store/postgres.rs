use super::service::segment_from_scan;
use super::{ContinuationToken, EntityKey, Filter, Properties, Row, Segment, StoreError, TableOperation, TableService};
use crate::schema::{entity_rows, entity_tables};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use serenity::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::memory::DEFAULT_PAGE_SIZE;

#[derive(Insertable, Queryable)]
#[diesel(table_name = entity_rows)]
struct StoredRow {
	table_name: String,
	partition_key: String,
	row_key: String,
	properties: serde_json::Value,
}

impl StoredRow {
	fn new(table: &str, row: &Row) -> Result<Self, StoreError> {
		Ok(Self {
			table_name: table.to_string(),
			partition_key: row.key.partition_key.clone(),
			row_key: row.key.row_key.clone(),
			properties: serde_json::to_value(&row.properties)?,
		})
	}

	fn into_row(self) -> Result<Row, StoreError> {
		Ok(Row {
			key: EntityKey::new(self.partition_key, self.row_key),
			properties: serde_json::from_value(self.properties)?,
		})
	}
}

/// Table service keeping every table as rows of one PostgreSQL relation.
///
/// Partition key equality is evaluated by the database; the rest of a filter is
/// evaluated on each scanned row.
pub struct PostgresTableService {
	db_connection: Arc<Mutex<PgConnection>>,
	page_size: usize,
}

impl PostgresTableService {
	pub fn new(db_connection: Arc<Mutex<PgConnection>>) -> Self {
		Self::with_page_size(db_connection, DEFAULT_PAGE_SIZE)
	}

	pub fn with_page_size(db_connection: Arc<Mutex<PgConnection>>, page_size: usize) -> Self {
		Self {
			db_connection,
			page_size: page_size.max(1),
		}
	}
}

fn ensure_table(db_connection: &mut PgConnection, table: &str) -> Result<(), StoreError> {
	let known: i64 = entity_tables::table
		.filter(entity_tables::table_name.eq(table))
		.count()
		.get_result(db_connection)?;
	if known == 0 {
		return Err(StoreError::TableNotFound {
			table: table.to_string(),
		});
	}
	Ok(())
}

fn stored_properties(
	db_connection: &mut PgConnection,
	table: &str,
	key: &EntityKey,
) -> Result<Option<serde_json::Value>, StoreError> {
	let properties = entity_rows::table
		.find((table, &key.partition_key, &key.row_key))
		.select(entity_rows::properties)
		.first(db_connection)
		.optional()?;
	Ok(properties)
}

fn apply(db_connection: &mut PgConnection, table: &str, operation: TableOperation) -> Result<(), StoreError> {
	match operation {
		TableOperation::Insert(row) => {
			let stored = StoredRow::new(table, &row)?;
			match diesel::insert_into(entity_rows::table)
				.values(&stored)
				.execute(db_connection)
			{
				Ok(_) => Ok(()),
				Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
					Err(StoreError::Conflict {
						table: table.to_string(),
						key: row.key,
					})
				}
				Err(error) => Err(error.into()),
			}
		}
		TableOperation::Merge(row) => {
			let Some(existing) = stored_properties(db_connection, table, &row.key)? else {
				return Err(StoreError::NotFound {
					table: table.to_string(),
					key: row.key,
				});
			};
			let mut properties: Properties = serde_json::from_value(existing)?;
			properties.extend(row.properties);
			diesel::update(entity_rows::table.find((table, &row.key.partition_key, &row.key.row_key)))
				.set(entity_rows::properties.eq(serde_json::to_value(&properties)?))
				.execute(db_connection)?;
			Ok(())
		}
		TableOperation::InsertOrMerge(row) => {
			if stored_properties(db_connection, table, &row.key)?.is_some() {
				apply(db_connection, table, TableOperation::Merge(row))
			} else {
				apply(db_connection, table, TableOperation::Insert(row))
			}
		}
		TableOperation::Delete(key) => {
			let deleted = diesel::delete(entity_rows::table.find((table, &key.partition_key, &key.row_key)))
				.execute(db_connection)?;
			if deleted == 0 {
				return Err(StoreError::NotFound {
					table: table.to_string(),
					key,
				});
			}
			Ok(())
		}
	}
}

/// One page of `table` in key order, plus one row telling whether the scan is complete.
fn page_query<'a>(
	table: &str,
	filter: &Filter,
	continuation: Option<&ContinuationToken>,
	page_size: usize,
) -> entity_rows::BoxedQuery<'a, Pg> {
	let mut query = entity_rows::table
		.filter(entity_rows::table_name.eq(table.to_string()))
		.into_boxed();
	if let Some(partition) = filter.pinned_partition() {
		query = query.filter(entity_rows::partition_key.eq(partition.to_string()));
	}
	if let Some(token) = continuation {
		let resume = token.resume_key();
		query = query.filter(
			entity_rows::partition_key.gt(resume.partition_key.clone()).or(entity_rows::partition_key
				.eq(resume.partition_key.clone())
				.and(entity_rows::row_key.gt(resume.row_key.clone()))),
		);
	}

	let limit = i64::try_from(page_size + 1).unwrap_or(i64::MAX);
	query
		.order((entity_rows::partition_key.asc(), entity_rows::row_key.asc()))
		.limit(limit)
}

#[async_trait]
impl TableService for PostgresTableService {
	async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, StoreError> {
		let mut db_connection = self.db_connection.lock().await;
		let inserted = diesel::insert_into(entity_tables::table)
			.values(entity_tables::table_name.eq(table))
			.on_conflict_do_nothing()
			.execute(&mut *db_connection)?;
		Ok(inserted == 1)
	}

	async fn query_segment(
		&self,
		table: &str,
		filter: &Filter,
		take: Option<usize>,
		continuation: Option<&ContinuationToken>,
	) -> Result<Segment, StoreError> {
		let mut db_connection = self.db_connection.lock().await;
		ensure_table(&mut db_connection, table)?;
		let mut scanned: Vec<StoredRow> =
			page_query(table, filter, continuation, self.page_size).load(&mut *db_connection)?;
		drop(db_connection);

		let scanned_all = scanned.len() <= self.page_size;
		scanned.truncate(self.page_size);
		let rows = scanned
			.into_iter()
			.map(StoredRow::into_row)
			.collect::<Result<Vec<_>, _>>()?;
		Ok(segment_from_scan(rows, filter, take, scanned_all))
	}

	async fn execute(&self, table: &str, operation: TableOperation) -> Result<(), StoreError> {
		let mut db_connection = self.db_connection.lock().await;
		db_connection.transaction(|db_connection| {
			ensure_table(db_connection, table)?;
			apply(db_connection, table, operation)
		})
	}

	async fn execute_batch(&self, table: &str, operations: Vec<TableOperation>) -> Result<(), StoreError> {
		let mut db_connection = self.db_connection.lock().await;
		db_connection.transaction(|db_connection| {
			ensure_table(db_connection, table)?;
			for operation in operations {
				apply(db_connection, table, operation)?;
			}
			Ok(())
		})
	}
}
