//! Keyed entity store over a partitioned table service.
//!
//! Every entity kind lives in a table named after the kind and is addressed by a
//! (partition key, row key) pair. Rows sharing a partition key are the unit of atomic
//! batch mutation and of efficient range scans.

mod entity;
mod error;
mod filter;
pub mod graph;
mod memory;
mod postgres;
mod query;
mod service;

pub use entity::{Entity, EntityKey, ParentRef, Properties, PropertyReader, PropertyValue};
pub use error::StoreError;
pub use filter::{CompareOp, Field, Filter, MAX_COMPARISONS};
pub use graph::ChildOf;
pub use memory::{CallCounts, MemoryTableService};
pub use postgres::PostgresTableService;
pub use query::Query;
pub use service::{ContinuationToken, Row, Segment, TableOperation, TableService};

use crate::telemetry::Telemetry;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Most operations the table store accepts in one batch.
pub const MAX_BATCH_OPERATIONS: usize = 100;

/// Mutations to apply atomically to rows of one partition.
pub struct Batch<E> {
	operations: Vec<TableOperation>,
	marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for Batch<E> {
	fn default() -> Self {
		Self {
			operations: Vec::new(),
			marker: PhantomData,
		}
	}
}

impl<E: Entity> Batch<E> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, entity: &E) {
		self.operations.push(TableOperation::Insert(Row::from_entity(entity)));
	}

	pub fn merge(&mut self, entity: &E) {
		self.operations.push(TableOperation::Merge(Row::from_entity(entity)));
	}

	pub fn delete(&mut self, entity: &E) {
		self.operations.push(TableOperation::Delete(entity.key()));
	}

	pub(crate) fn delete_key(&mut self, key: EntityKey) {
		self.operations.push(TableOperation::Delete(key));
	}

	pub fn len(&self) -> usize {
		self.operations.len()
	}

	pub fn is_empty(&self) -> bool {
		self.operations.is_empty()
	}

	fn validate(&self) -> Result<(), StoreError> {
		if self.operations.len() > MAX_BATCH_OPERATIONS {
			return Err(StoreError::BatchTooLarge {
				count: self.operations.len(),
				limit: MAX_BATCH_OPERATIONS,
			});
		}
		let mut keys = self.operations.iter().map(TableOperation::key);
		if let Some(first) = keys.next() {
			if let Some(other) = keys.find(|key| key.partition_key != first.partition_key) {
				return Err(StoreError::BatchPartitionMismatch {
					first: first.partition_key.clone(),
					other: other.partition_key.clone(),
				});
			}
		}
		Ok(())
	}
}

/// Generic access to entities of any kind through one table service.
#[derive(Clone)]
pub struct EntityStore {
	service: Arc<dyn TableService>,
	telemetry: Arc<dyn Telemetry>,
}

impl EntityStore {
	pub fn new(service: Arc<dyn TableService>, telemetry: Arc<dyn Telemetry>) -> Self {
		Self { service, telemetry }
	}

	/// Ensures the table of `E` exists. Returns `true` when it was just created.
	pub async fn get_or_create_collection<E: Entity>(&self) -> Result<bool, StoreError> {
		let created = self.service.create_table_if_not_exists(E::TABLE).await?;
		self.telemetry.track_event(&format!(
			"Accessing {}, table was {}created",
			E::TABLE,
			if created { "" } else { "NOT " }
		));
		Ok(created)
	}

	/// Lazy query over `E`; fails right away when the filter cannot be expressed by the store.
	pub fn query<E: Entity>(&self, filter: Filter) -> Result<Query<E>, StoreError> {
		filter.validate()?;
		debug!(table = E::TABLE, %filter, "querying table");
		Ok(Query::new(Arc::clone(&self.service), filter))
	}

	pub async fn insert<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
		self.get_or_create_collection::<E>().await?;
		self.service
			.execute(E::TABLE, TableOperation::Insert(Row::from_entity(entity)))
			.await
	}

	pub async fn merge<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
		self.get_or_create_collection::<E>().await?;
		self.service
			.execute(E::TABLE, TableOperation::Merge(Row::from_entity(entity)))
			.await
	}

	pub async fn insert_or_merge<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
		self.get_or_create_collection::<E>().await?;
		self.service
			.execute(E::TABLE, TableOperation::InsertOrMerge(Row::from_entity(entity)))
			.await
	}

	pub async fn delete<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
		self.get_or_create_collection::<E>().await?;
		self.service
			.execute(E::TABLE, TableOperation::Delete(entity.key()))
			.await
	}

	/// Applies the batch atomically. Empty batches do nothing.
	pub async fn batch_mutate<E: Entity>(&self, batch: Batch<E>) -> Result<(), StoreError> {
		if batch.is_empty() {
			return Ok(());
		}
		batch.validate()?;
		self.get_or_create_collection::<E>().await?;
		debug!(table = E::TABLE, operations = batch.len(), "executing batch");
		self.service.execute_batch(E::TABLE, batch.operations).await
	}

	/// Deletes every `E` matching `filter`, one batch per partition and batch limit.
	///
	/// Returns the number of deleted rows. Batches already applied stay applied if a later one fails.
	pub async fn delete_where<E: Entity>(&self, filter: Filter) -> Result<usize, StoreError> {
		self.get_or_create_collection::<E>().await?;
		let matches = self.query::<E>(filter)?.collect_all().await?;

		let mut partitions: BTreeMap<String, Vec<EntityKey>> = BTreeMap::new();
		for entity in &matches {
			let key = entity.key();
			partitions.entry(key.partition_key.clone()).or_default().push(key);
		}

		for keys in partitions.into_values() {
			for chunk in keys.chunks(MAX_BATCH_OPERATIONS) {
				let mut batch = Batch::<E>::new();
				for key in chunk {
					batch.delete_key(key.clone());
				}
				self.batch_mutate(batch).await?;
			}
		}
		Ok(matches.len())
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::telemetry::testing::{Record, RecordingTelemetry};

	#[derive(Clone, Debug, PartialEq)]
	pub struct Note {
		pub key: EntityKey,
		pub text: String,
	}

	impl Note {
		pub fn new(partition: &str, row: &str, text: &str) -> Self {
			Self {
				key: EntityKey::new(partition, row),
				text: text.to_string(),
			}
		}
	}

	impl Entity for Note {
		const TABLE: &'static str = "Note";

		fn key(&self) -> EntityKey {
			self.key.clone()
		}

		fn to_properties(&self) -> Properties {
			let mut properties = Properties::new();
			properties.insert("Text".to_string(), PropertyValue::from(self.text.as_str()));
			properties
		}

		fn from_row(key: EntityKey, properties: PropertyReader<'_>) -> Result<Self, StoreError> {
			Ok(Self {
				key,
				text: properties.string("Text")?,
			})
		}
	}

	fn store_with(service: Arc<MemoryTableService>) -> (EntityStore, Arc<RecordingTelemetry>) {
		let telemetry = Arc::new(RecordingTelemetry::default());
		(EntityStore::new(service, telemetry.clone()), telemetry)
	}

	#[tokio::test]
	async fn creating_a_collection_is_idempotent() {
		let (store, telemetry) = store_with(Arc::new(MemoryTableService::new()));

		assert!(store.get_or_create_collection::<Note>().await.unwrap());
		assert!(!store.get_or_create_collection::<Note>().await.unwrap());
		assert_eq!(
			telemetry.records(),
			[
				Record::Event("Accessing Note, table was created".to_string()),
				Record::Event("Accessing Note, table was NOT created".to_string()),
			]
		);
	}

	#[tokio::test]
	async fn single_mutations_respect_keys() {
		let (store, _) = store_with(Arc::new(MemoryTableService::new()));
		let note = Note::new("a", "1", "first");

		store.insert(&note).await.unwrap();
		assert!(matches!(store.insert(&note).await, Err(StoreError::Conflict { .. })));

		store.merge(&Note::new("a", "1", "edited")).await.unwrap();
		let stored = store
			.query::<Note>(Filter::row_key().eq("1"))
			.unwrap()
			.first()
			.await
			.unwrap();
		assert_eq!(stored.map(|note| note.text), Some("edited".to_string()));

		store.delete(&note).await.unwrap();
		assert!(matches!(store.delete(&note).await, Err(StoreError::NotFound { .. })));
		assert!(matches!(
			store.merge(&note).await,
			Err(StoreError::NotFound { .. })
		));
	}

	#[tokio::test]
	async fn mutations_on_a_fresh_table_report_missing_rows() {
		let (store, _) = store_with(Arc::new(MemoryTableService::new()));
		let note = Note::new("a", "1", "first");

		assert!(matches!(store.merge(&note).await, Err(StoreError::NotFound { .. })));

		let (store, _) = store_with(Arc::new(MemoryTableService::new()));
		assert!(matches!(store.delete(&note).await, Err(StoreError::NotFound { .. })));

		let (store, _) = store_with(Arc::new(MemoryTableService::new()));
		let mut batch = Batch::new();
		batch.merge(&note);
		assert!(matches!(store.batch_mutate(batch).await, Err(StoreError::NotFound { .. })));

		let mut batch = Batch::new();
		batch.insert(&note);
		store.batch_mutate(batch).await.unwrap();
		assert_eq!(store.query::<Note>(Filter::All).unwrap().collect_all().await.unwrap(), [note]);
	}

	#[tokio::test]
	async fn batches_stay_within_one_partition() {
		let (store, _) = store_with(Arc::new(MemoryTableService::new()));
		let mut batch = Batch::new();
		batch.insert(&Note::new("a", "1", "x"));
		batch.insert(&Note::new("b", "1", "y"));

		let result = store.batch_mutate(batch).await;
		assert!(matches!(
			result,
			Err(StoreError::BatchPartitionMismatch { ref first, ref other }) if first == "a" && other == "b"
		));
	}

	#[tokio::test]
	async fn batches_are_capped() {
		let (store, _) = store_with(Arc::new(MemoryTableService::new()));
		let mut batch = Batch::new();
		for row in 0..=MAX_BATCH_OPERATIONS {
			batch.insert(&Note::new("a", &row.to_string(), "x"));
		}

		let result = store.batch_mutate(batch).await;
		assert!(matches!(result, Err(StoreError::BatchTooLarge { count: 101, limit: 100 })));
		assert!(result.unwrap_err().is_contract_violation());
	}

	#[tokio::test]
	async fn empty_batches_do_not_reach_the_service() {
		let service = Arc::new(MemoryTableService::new());
		let (store, _) = store_with(service.clone());

		store.batch_mutate(Batch::<Note>::new()).await.unwrap();
		assert_eq!(service.call_counts().batches, 0);
	}

	#[tokio::test]
	async fn unsupported_filters_fail_before_querying() {
		let service = Arc::new(MemoryTableService::new());
		let (store, _) = store_with(service.clone());

		let result = store.query::<Note>(Filter::row_key().eq(3_i64));
		assert!(matches!(result, Err(StoreError::UnsupportedQuery { .. })));
		assert_eq!(service.call_counts().queries, 0);
	}

	#[tokio::test]
	async fn delete_where_splits_batches() {
		let service = Arc::new(MemoryTableService::with_page_size(50));
		let (store, _) = store_with(service.clone());
		for row in 0..120 {
			store.insert(&Note::new("a", &format!("{:03}", row), "x")).await.unwrap();
		}
		store.insert(&Note::new("b", "keep", "x")).await.unwrap();
		store.insert(&Note::new("c", "000", "y")).await.unwrap();

		let deleted = store
			.delete_where::<Note>(Filter::property("Text").eq("x").and(Filter::partition_key().ne("b")))
			.await
			.unwrap();
		assert_eq!(deleted, 120);
		assert_eq!(service.call_counts().batches, 2);

		let left = store.query::<Note>(Filter::All).unwrap().collect_all().await.unwrap();
		assert_eq!(left.len(), 2);
	}
}
