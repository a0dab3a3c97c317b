use super::{Entity, EntityKey, Filter, Properties, StoreError};
use serenity::async_trait;

/// Raw row as the table service stores it.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
	pub key: EntityKey,
	pub properties: Properties,
}

impl Row {
	pub fn from_entity<E: Entity>(entity: &E) -> Self {
		Self {
			key: entity.key(),
			properties: entity.to_properties(),
		}
	}
}

/// Opaque cursor marking where the next page of a query resumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContinuationToken(EntityKey);

impl ContinuationToken {
	/// Token resuming strictly after `key`.
	pub(crate) fn after(key: &EntityKey) -> Self {
		Self(key.clone())
	}

	pub(crate) fn resume_key(&self) -> &EntityKey {
		&self.0
	}
}

/// One page of query results.
#[derive(Debug, Default)]
pub struct Segment {
	pub rows: Vec<Row>,
	pub continuation: Option<ContinuationToken>,
}

/// Builds the segment for a page given the rows scanned, in key order.
///
/// `scanned_all` tells whether the scan reached the end of the table.
pub(crate) fn segment_from_scan(
	scanned: impl IntoIterator<Item = Row>,
	filter: &Filter,
	take: Option<usize>,
	scanned_all: bool,
) -> Segment {
	let mut rows = Vec::new();
	let mut last_scanned = None;
	for row in scanned {
		if take.is_some_and(|limit| rows.len() >= limit) {
			return Segment {
				continuation: last_scanned.as_ref().map(ContinuationToken::after),
				rows,
			};
		}
		last_scanned = Some(row.key.clone());
		if filter.matches(&row) {
			rows.push(row);
		}
	}
	Segment {
		continuation: if scanned_all {
			None
		} else {
			last_scanned.as_ref().map(ContinuationToken::after)
		},
		rows,
	}
}

#[derive(Clone, Debug)]
pub enum TableOperation {
	Insert(Row),
	Merge(Row),
	InsertOrMerge(Row),
	Delete(EntityKey),
}

impl TableOperation {
	pub fn key(&self) -> &EntityKey {
		match self {
			Self::Insert(row) | Self::Merge(row) | Self::InsertOrMerge(row) => &row.key,
			Self::Delete(key) => key,
		}
	}
}

/// Partitioned table store primitive.
///
/// Tables hold rows addressed by [`EntityKey`], scanned in (partition key, row key) order.
#[async_trait]
pub trait TableService: Send + Sync {
	/// Returns `true` when the table did not exist before.
	async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, StoreError>;

	/// Reads one page of rows matching `filter`. `take` is a hint capping the page length.
	async fn query_segment(
		&self,
		table: &str,
		filter: &Filter,
		take: Option<usize>,
		continuation: Option<&ContinuationToken>,
	) -> Result<Segment, StoreError>;

	async fn execute(&self, table: &str, operation: TableOperation) -> Result<(), StoreError>;

	/// Applies every operation or none of them.
	async fn execute_batch(&self, table: &str, operations: Vec<TableOperation>) -> Result<(), StoreError>;
}
