//! Loads an entity's children by convention.
//!
//! Children of a parent live in their own table, in the partition named after the parent's row key.
//! No foreign keys are declared anywhere; a child kind opts into the relation by implementing
//! [`ChildOf`] for its parent kind.

use super::{Entity, EntityStore, Filter, StoreError};
use tracing::debug;

/// Marks `Self` as a child kind of `P`.
pub trait ChildOf<P: Entity>: Entity {
	/// Called on every child loaded through `parent`. Kinds holding a
	/// [`ParentRef`](super::ParentRef) set it here.
	fn link_parent(&mut self, _parent: &P) {}
}

impl EntityStore {
	async fn children_of<P, C>(&self, parent: &P) -> Result<Option<Vec<C>>, StoreError>
	where
		P: Entity,
		C: ChildOf<P>,
	{
		if self.get_or_create_collection::<C>().await? {
			// A table that did not exist holds no children.
			return Ok(None);
		}

		let parent_key = parent.key();
		let children = self
			.query::<C>(Filter::partition_key().eq(parent_key.row_key))?
			.collect_all()
			.await?;
		Ok(Some(children))
	}

	/// Fills `field` of `parent` with every `C` stored under the parent's row key.
	pub async fn load_children<P, C, F>(&self, parent: &mut P, field: F) -> Result<(), StoreError>
	where
		P: Entity,
		C: ChildOf<P>,
		F: FnOnce(&mut P) -> &mut Option<Vec<C>>,
	{
		self.telemetry
			.track_event(&format!("Loading {} children from {}", P::TABLE, C::TABLE));

		let mut children = self.children_of::<P, C>(parent).await?.unwrap_or_default();
		for child in &mut children {
			child.link_parent(parent);
		}
		debug!(parent = P::TABLE, child = C::TABLE, count = children.len(), "loaded children");
		*field(parent) = Some(children);
		Ok(())
	}

	/// Fills `field` of `parent` with its only `C`; zero or several children is an error.
	pub async fn load_single_child<P, C, F>(&self, parent: &mut P, field: F) -> Result<(), StoreError>
	where
		P: Entity,
		C: ChildOf<P>,
		F: FnOnce(&mut P) -> &mut Option<C>,
	{
		self.telemetry
			.track_event(&format!("Loading {} child from {}", P::TABLE, C::TABLE));

		let children = self.children_of::<P, C>(parent).await?.unwrap_or_default();
		if children.len() != 1 {
			return Err(StoreError::ExpectedExactlyOne {
				table: C::TABLE.to_string(),
				found: children.len(),
			});
		}

		let mut child = children.into_iter().next();
		if let Some(child) = &mut child {
			child.link_parent(parent);
		}
		*field(parent) = child;
		Ok(())
	}
}
