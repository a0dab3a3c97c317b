use super::EntityKey;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum StoreError {
	#[error("table {table} does not exist")]
	TableNotFound { table: String },
	#[error("entity {key} already exists in table {table}")]
	Conflict { table: String, key: EntityKey },
	#[error("entity {key} does not exist in table {table}")]
	NotFound { table: String, key: EntityKey },
	#[error("expected exactly one entity in table {table}, found {found}")]
	ExpectedExactlyOne { table: String, found: usize },
	#[error("query cannot be expressed as a table filter: {reason}")]
	#[diagnostic(help("filters may only compare keys and properties, with at most 15 comparisons"))]
	UnsupportedQuery { reason: String },
	#[error("batch operations span several partitions ({first} and {other})")]
	BatchPartitionMismatch { first: String, other: String },
	#[error("batch holds {count} operations, at most {limit} are allowed")]
	BatchTooLarge { count: usize, limit: usize },
	#[error("property {property} of a {table} entity is invalid: {reason}")]
	InvalidProperty {
		table: String,
		property: String,
		reason: String,
	},
	#[error(transparent)]
	Database(#[from] diesel::result::Error),
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),
}

impl StoreError {
	/// Whether the error comes from a caller breaking the store's contract rather than from the store itself.
	pub fn is_contract_violation(&self) -> bool {
		matches!(
			self,
			Self::UnsupportedQuery { .. } | Self::BatchPartitionMismatch { .. } | Self::BatchTooLarge { .. }
		)
	}
}
