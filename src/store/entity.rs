use super::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Address of a row: unique within one table.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
	pub partition_key: String,
	pub row_key: String,
}

impl EntityKey {
	pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
		Self {
			partition_key: partition_key.into(),
			row_key: row_key.into(),
		}
	}
}

impl fmt::Display for EntityKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "({}, {})", self.partition_key, self.row_key)
	}
}

/// A single stored attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
	Bool(bool),
	Int64(i64),
	String(String),
}

impl PropertyValue {
	fn type_name(&self) -> &'static str {
		match self {
			Self::Bool(_) => "bool",
			Self::Int64(_) => "int64",
			Self::String(_) => "string",
		}
	}
}

impl fmt::Display for PropertyValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bool(value) => write!(f, "{}", value),
			Self::Int64(value) => write!(f, "{}L", value),
			Self::String(value) => write!(f, "'{}'", value.replace('\'', "''")),
		}
	}
}

impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i64> for PropertyValue {
	fn from(value: i64) -> Self {
		Self::Int64(value)
	}
}

impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		Self::String(value.to_string())
	}
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// Typed read access to a row's properties while decoding an entity.
pub struct PropertyReader<'a> {
	table: &'static str,
	properties: &'a Properties,
}

impl<'a> PropertyReader<'a> {
	pub fn new(table: &'static str, properties: &'a Properties) -> Self {
		Self { table, properties }
	}

	fn invalid(&self, property: &str, reason: impl Into<String>) -> StoreError {
		StoreError::InvalidProperty {
			table: self.table.to_string(),
			property: property.to_string(),
			reason: reason.into(),
		}
	}

	fn required(&self, property: &str) -> Result<&'a PropertyValue, StoreError> {
		self.properties
			.get(property)
			.ok_or_else(|| self.invalid(property, "missing"))
	}

	pub fn string(&self, property: &str) -> Result<String, StoreError> {
		match self.required(property)? {
			PropertyValue::String(value) => Ok(value.clone()),
			other => Err(self.invalid(property, format!("expected string, got {}", other.type_name()))),
		}
	}

	pub fn optional_string(&self, property: &str) -> Result<Option<String>, StoreError> {
		match self.properties.get(property) {
			None => Ok(None),
			Some(PropertyValue::String(value)) => Ok(Some(value.clone())),
			Some(other) => Err(self.invalid(property, format!("expected string, got {}", other.type_name()))),
		}
	}

	pub fn int64(&self, property: &str) -> Result<i64, StoreError> {
		match self.required(property)? {
			PropertyValue::Int64(value) => Ok(*value),
			other => Err(self.invalid(property, format!("expected int64, got {}", other.type_name()))),
		}
	}

	pub fn bool(&self, property: &str) -> Result<bool, StoreError> {
		match self.required(property)? {
			PropertyValue::Bool(value) => Ok(*value),
			other => Err(self.invalid(property, format!("expected bool, got {}", other.type_name()))),
		}
	}

	/// Decodes a non-zero 64-bit id stored in a signed column.
	pub fn id(&self, property: &str) -> Result<u64, StoreError> {
		let stored = self.int64(property)?;
		match stored as u64 {
			0 => Err(self.invalid(property, "ids cannot be zero")),
			id => Ok(id),
		}
	}

	/// Decodes a non-zero 64-bit id held in a key column.
	pub fn key_id(&self, column: &str, value: &str) -> Result<u64, StoreError> {
		match value.parse::<u64>() {
			Ok(0) => Err(self.invalid(column, "ids cannot be zero")),
			Ok(id) => Ok(id),
			Err(error) => Err(self.invalid(column, error.to_string())),
		}
	}
}

/// A kind of row living in its own table, named after the kind.
pub trait Entity: Sized + Send + 'static {
	const TABLE: &'static str;

	fn key(&self) -> EntityKey;

	fn to_properties(&self) -> Properties;

	fn from_row(key: EntityKey, properties: PropertyReader<'_>) -> Result<Self, StoreError>;
}

/// Lookup-only link from a loaded child back to the parent it was loaded through.
///
/// Set by the graph loader on every load and never persisted.
pub struct ParentRef<P> {
	key: EntityKey,
	marker: PhantomData<fn() -> P>,
}

impl<P: Entity> ParentRef<P> {
	pub fn to(parent: &P) -> Self {
		Self {
			key: parent.key(),
			marker: PhantomData,
		}
	}

	pub fn key(&self) -> &EntityKey {
		&self.key
	}

	pub fn row_key(&self) -> &str {
		&self.key.row_key
	}
}

impl<P> Clone for ParentRef<P> {
	fn clone(&self) -> Self {
		Self {
			key: self.key.clone(),
			marker: PhantomData,
		}
	}
}

impl<P> fmt::Debug for ParentRef<P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ParentRef").field(&self.key).finish()
	}
}

impl<P> PartialEq for ParentRef<P> {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key
	}
}
