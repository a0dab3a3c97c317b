use super::service::segment_from_scan;
use super::{ContinuationToken, EntityKey, Filter, Properties, Row, Segment, StoreError, TableOperation, TableService};
use serenity::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Page size of the hosted table store.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

type Table = BTreeMap<EntityKey, Properties>;

/// Number of calls each primitive received.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
	pub creates: usize,
	pub queries: usize,
	pub executes: usize,
	pub batches: usize,
}

/// In-process table service.
///
/// Behaves like the hosted store: ordered scans, paging, atomic batches, keyed conflicts.
pub struct MemoryTableService {
	tables: Mutex<HashMap<String, Table>>,
	page_size: usize,
	creates: AtomicUsize,
	queries: AtomicUsize,
	executes: AtomicUsize,
	batches: AtomicUsize,
}

impl Default for MemoryTableService {
	fn default() -> Self {
		Self::with_page_size(DEFAULT_PAGE_SIZE)
	}
}

impl MemoryTableService {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_page_size(page_size: usize) -> Self {
		Self {
			tables: Mutex::new(HashMap::new()),
			page_size: page_size.max(1),
			creates: AtomicUsize::new(0),
			queries: AtomicUsize::new(0),
			executes: AtomicUsize::new(0),
			batches: AtomicUsize::new(0),
		}
	}

	pub fn call_counts(&self) -> CallCounts {
		CallCounts {
			creates: self.creates.load(Ordering::Relaxed),
			queries: self.queries.load(Ordering::Relaxed),
			executes: self.executes.load(Ordering::Relaxed),
			batches: self.batches.load(Ordering::Relaxed),
		}
	}
}

fn apply(table_name: &str, table: &mut Table, operation: TableOperation) -> Result<(), StoreError> {
	match operation {
		TableOperation::Insert(row) => {
			if table.contains_key(&row.key) {
				return Err(StoreError::Conflict {
					table: table_name.to_string(),
					key: row.key,
				});
			}
			table.insert(row.key, row.properties);
		}
		TableOperation::Merge(row) => match table.get_mut(&row.key) {
			Some(properties) => properties.extend(row.properties),
			None => {
				return Err(StoreError::NotFound {
					table: table_name.to_string(),
					key: row.key,
				})
			}
		},
		TableOperation::InsertOrMerge(row) => {
			table.entry(row.key).or_default().extend(row.properties);
		}
		TableOperation::Delete(key) => {
			if table.remove(&key).is_none() {
				return Err(StoreError::NotFound {
					table: table_name.to_string(),
					key,
				});
			}
		}
	}
	Ok(())
}

fn table_not_found(table: &str) -> StoreError {
	StoreError::TableNotFound {
		table: table.to_string(),
	}
}

#[async_trait]
impl TableService for MemoryTableService {
	async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, StoreError> {
		self.creates.fetch_add(1, Ordering::Relaxed);
		let mut tables = self.tables.lock().await;
		if tables.contains_key(table) {
			return Ok(false);
		}
		tables.insert(table.to_string(), Table::new());
		Ok(true)
	}

	async fn query_segment(
		&self,
		table: &str,
		filter: &Filter,
		take: Option<usize>,
		continuation: Option<&ContinuationToken>,
	) -> Result<Segment, StoreError> {
		self.queries.fetch_add(1, Ordering::Relaxed);
		let tables = self.tables.lock().await;
		let rows = tables.get(table).ok_or_else(|| table_not_found(table))?;

		let pinned = filter.pinned_partition();
		let mut start = match pinned {
			Some(partition) => Bound::Included(EntityKey::new(partition, "")),
			None => Bound::Unbounded,
		};
		if let Some(token) = continuation {
			let resume = token.resume_key().clone();
			let past_pinned_start = match &start {
				Bound::Included(pinned_start) => &resume >= pinned_start,
				_ => true,
			};
			if past_pinned_start {
				start = Bound::Excluded(resume);
			}
		}

		let mut scanned: Vec<Row> = rows
			.range((start, Bound::Unbounded))
			.take_while(|(key, _)| pinned.map_or(true, |partition| key.partition_key == partition))
			.take(self.page_size + 1)
			.map(|(key, properties)| Row {
				key: key.clone(),
				properties: properties.clone(),
			})
			.collect();
		let scanned_all = scanned.len() <= self.page_size;
		scanned.truncate(self.page_size);

		Ok(segment_from_scan(scanned, filter, take, scanned_all))
	}

	async fn execute(&self, table: &str, operation: TableOperation) -> Result<(), StoreError> {
		self.executes.fetch_add(1, Ordering::Relaxed);
		let mut tables = self.tables.lock().await;
		let rows = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
		apply(table, rows, operation)
	}

	async fn execute_batch(&self, table: &str, operations: Vec<TableOperation>) -> Result<(), StoreError> {
		self.batches.fetch_add(1, Ordering::Relaxed);
		let mut tables = self.tables.lock().await;
		let rows = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;

		let mut staged = rows.clone();
		for operation in operations {
			apply(table, &mut staged, operation)?;
		}
		*rows = staged;
		Ok(())
	}
}
