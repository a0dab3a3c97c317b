use super::{PropertyValue, Row, StoreError};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Not;

/// Most discrete comparisons the table store accepts in a single filter.
pub const MAX_COMPARISONS: usize = 15;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
	PartitionKey,
	RowKey,
	Property(String),
}

impl fmt::Display for Field {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::PartitionKey => f.write_str("PartitionKey"),
			Self::RowKey => f.write_str("RowKey"),
			Self::Property(name) => f.write_str(name),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
}

impl CompareOp {
	fn holds(self, ordering: Ordering) -> bool {
		match self {
			Self::Eq => ordering == Ordering::Equal,
			Self::Ne => ordering != Ordering::Equal,
			Self::Lt => ordering == Ordering::Less,
			Self::Le => ordering != Ordering::Greater,
			Self::Gt => ordering == Ordering::Greater,
			Self::Ge => ordering != Ordering::Less,
		}
	}

	fn keyword(self) -> &'static str {
		match self {
			Self::Eq => "eq",
			Self::Ne => "ne",
			Self::Lt => "lt",
			Self::Le => "le",
			Self::Gt => "gt",
			Self::Ge => "ge",
		}
	}
}

/// Predicate over rows, limited to what the table store can evaluate natively.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
	All,
	Compare {
		field: Field,
		op: CompareOp,
		value: PropertyValue,
	},
	And(Box<Filter>, Box<Filter>),
	Or(Box<Filter>, Box<Filter>),
	Not(Box<Filter>),
}

/// Left-hand side of a comparison under construction.
pub struct FieldRef(Field);

impl FieldRef {
	fn compare(self, op: CompareOp, value: impl Into<PropertyValue>) -> Filter {
		Filter::Compare {
			field: self.0,
			op,
			value: value.into(),
		}
	}

	pub fn eq(self, value: impl Into<PropertyValue>) -> Filter {
		self.compare(CompareOp::Eq, value)
	}

	pub fn ne(self, value: impl Into<PropertyValue>) -> Filter {
		self.compare(CompareOp::Ne, value)
	}

	pub fn lt(self, value: impl Into<PropertyValue>) -> Filter {
		self.compare(CompareOp::Lt, value)
	}

	pub fn le(self, value: impl Into<PropertyValue>) -> Filter {
		self.compare(CompareOp::Le, value)
	}

	pub fn gt(self, value: impl Into<PropertyValue>) -> Filter {
		self.compare(CompareOp::Gt, value)
	}

	pub fn ge(self, value: impl Into<PropertyValue>) -> Filter {
		self.compare(CompareOp::Ge, value)
	}
}

impl Filter {
	pub fn partition_key() -> FieldRef {
		FieldRef(Field::PartitionKey)
	}

	pub fn row_key() -> FieldRef {
		FieldRef(Field::RowKey)
	}

	pub fn property(name: impl Into<String>) -> FieldRef {
		FieldRef(Field::Property(name.into()))
	}

	pub fn and(self, other: Filter) -> Filter {
		match (self, other) {
			(Filter::All, other) => other,
			(this, Filter::All) => this,
			(this, other) => Filter::And(Box::new(this), Box::new(other)),
		}
	}

	pub fn or(self, other: Filter) -> Filter {
		match (self, other) {
			(Filter::All, _) | (_, Filter::All) => Filter::All,
			(this, other) => Filter::Or(Box::new(this), Box::new(other)),
		}
	}

	fn comparisons(&self) -> usize {
		match self {
			Self::All => 0,
			Self::Compare { .. } => 1,
			Self::And(left, right) | Self::Or(left, right) => left.comparisons() + right.comparisons(),
			Self::Not(inner) => inner.comparisons(),
		}
	}

	/// Rejects filters the table store could not evaluate.
	pub fn validate(&self) -> Result<(), StoreError> {
		let comparisons = self.comparisons();
		if comparisons > MAX_COMPARISONS {
			return Err(StoreError::UnsupportedQuery {
				reason: format!("{} comparisons, at most {} allowed", comparisons, MAX_COMPARISONS),
			});
		}
		self.validate_terms()
	}

	fn validate_terms(&self) -> Result<(), StoreError> {
		match self {
			Self::All => Ok(()),
			Self::Compare { field, value, .. } => match (field, value) {
				(Field::PartitionKey | Field::RowKey, PropertyValue::String(_)) => Ok(()),
				(Field::PartitionKey | Field::RowKey, other) => Err(StoreError::UnsupportedQuery {
					reason: format!("{} can only be compared with strings, not {}", field, other),
				}),
				(Field::Property(name), _) if name.is_empty() => Err(StoreError::UnsupportedQuery {
					reason: "property names cannot be empty".to_string(),
				}),
				(Field::Property(name), _) if matches!(name.as_str(), "PartitionKey" | "RowKey") => {
					Err(StoreError::UnsupportedQuery {
						reason: format!("{} is a key column, not a property", name),
					})
				}
				_ => Ok(()),
			},
			Self::And(left, right) | Self::Or(left, right) => {
				left.validate_terms()?;
				right.validate_terms()
			}
			Self::Not(inner) => inner.validate_terms(),
		}
	}

	/// The partition every matching row must live in, when the filter pins one.
	pub fn pinned_partition(&self) -> Option<&str> {
		match self {
			Self::Compare {
				field: Field::PartitionKey,
				op: CompareOp::Eq,
				value: PropertyValue::String(partition),
			} => Some(partition.as_str()),
			Self::And(left, right) => left.pinned_partition().or_else(|| right.pinned_partition()),
			_ => None,
		}
	}

	pub fn matches(&self, row: &Row) -> bool {
		match self {
			Self::All => true,
			Self::Compare { field, op, value } => {
				let ordering = match field {
					Field::PartitionKey => compare_key(&row.key.partition_key, value),
					Field::RowKey => compare_key(&row.key.row_key, value),
					Field::Property(name) => row
						.properties
						.get(name)
						.and_then(|stored| compare_values(stored, value)),
				};
				// Missing properties and mismatched types never match, whatever the operator.
				ordering.is_some_and(|ordering| op.holds(ordering))
			}
			Self::And(left, right) => left.matches(row) && right.matches(row),
			Self::Or(left, right) => left.matches(row) || right.matches(row),
			Self::Not(inner) => !inner.matches(row),
		}
	}
}

impl Not for Filter {
	type Output = Filter;

	fn not(self) -> Filter {
		Filter::Not(Box::new(self))
	}
}

fn compare_key(key: &str, value: &PropertyValue) -> Option<Ordering> {
	match value {
		PropertyValue::String(value) => Some(key.cmp(value.as_str())),
		_ => None,
	}
}

fn compare_values(stored: &PropertyValue, value: &PropertyValue) -> Option<Ordering> {
	match (stored, value) {
		(PropertyValue::Bool(stored), PropertyValue::Bool(value)) => Some(stored.cmp(value)),
		(PropertyValue::Int64(stored), PropertyValue::Int64(value)) => Some(stored.cmp(value)),
		(PropertyValue::String(stored), PropertyValue::String(value)) => Some(stored.cmp(value)),
		_ => None,
	}
}

/// Renders the filter in the table store's query syntax, for logs.
impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::All => f.write_str("true"),
			Self::Compare { field, op, value } => write!(f, "{} {} {}", field, op.keyword(), value),
			Self::And(left, right) => write!(f, "({}) and ({})", left, right),
			Self::Or(left, right) => write!(f, "({}) or ({})", left, right),
			Self::Not(inner) => write!(f, "not ({})", inner),
		}
	}
}
