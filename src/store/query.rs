use super::{ContinuationToken, Entity, Filter, PropertyReader, Row, StoreError, TableService};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use std::marker::PhantomData;
use std::sync::Arc;

enum Paging {
	Start,
	Resume(ContinuationToken),
	Exhausted,
}

/// Lazy query over one entity kind.
///
/// Nothing is read until [`Query::stream`] is polled; every call to `stream` pages from the start again.
pub struct Query<E> {
	service: Arc<dyn TableService>,
	filter: Filter,
	take: Option<usize>,
	marker: PhantomData<fn() -> E>,
}

impl<E> Clone for Query<E> {
	fn clone(&self) -> Self {
		Self {
			service: Arc::clone(&self.service),
			filter: self.filter.clone(),
			take: self.take,
			marker: PhantomData,
		}
	}
}

fn decode<E: Entity>(row: Row) -> Result<E, StoreError> {
	let Row { key, properties } = row;
	E::from_row(key, PropertyReader::new(E::TABLE, &properties))
}

impl<E: Entity> Query<E> {
	pub(crate) fn new(service: Arc<dyn TableService>, filter: Filter) -> Self {
		Self {
			service,
			filter,
			take: None,
			marker: PhantomData,
		}
	}

	/// Stops the query after `count` entities.
	pub fn take(mut self, count: usize) -> Self {
		self.take = Some(count);
		self
	}

	pub fn stream(&self) -> BoxStream<'static, Result<E, StoreError>> {
		let service = Arc::clone(&self.service);
		let filter = self.filter.clone();
		let take = self.take;

		let pages = stream::try_unfold((Paging::Start, 0_usize), move |(paging, yielded)| {
			let service = Arc::clone(&service);
			let filter = filter.clone();
			async move {
				let continuation = match paging {
					Paging::Exhausted => return Ok(None),
					Paging::Start => None,
					Paging::Resume(token) => Some(token),
				};
				let remaining = take.map(|limit| limit.saturating_sub(yielded));
				if remaining == Some(0) {
					return Ok(None);
				}

				let segment = service
					.query_segment(E::TABLE, &filter, remaining, continuation.as_ref())
					.await?;
				let mut rows = segment.rows;
				if let Some(remaining) = remaining {
					rows.truncate(remaining);
				}
				let next = match segment.continuation {
					Some(token) => Paging::Resume(token),
					None => Paging::Exhausted,
				};
				let yielded = yielded + rows.len();
				Ok::<_, StoreError>(Some((rows, (next, yielded))))
			}
		});

		pages
			.map_ok(|rows| stream::iter(rows.into_iter().map(decode::<E>)))
			.try_flatten()
			.boxed()
	}

	/// Drains every page.
	pub async fn collect_all(&self) -> Result<Vec<E>, StoreError> {
		self.stream().try_collect().await
	}

	/// First matching entity, reading at most one row.
	pub async fn first(&self) -> Result<Option<E>, StoreError> {
		self.clone().take(1).stream().try_next().await
	}
}
