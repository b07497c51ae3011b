//! Query representation: the immutable plan for one user call (`qi` in
//! spec.md §3) and its derived per-production-tile decomposition.

mod plan;

pub use plan::plan_query;

use crate::address::ActorAddress;
use crate::array::DType;
use crate::footprint::Footprint;
use crate::raster::RasterUid;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_QUERY_CREATION_INDEX: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing identity for one query,
/// doubling as the `query_creation_index` priority-key component so
/// earlier queries are served first (spec.md §3 "Pool job").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
	#[must_use]
	pub fn next() -> Self {
		Self(NEXT_QUERY_CREATION_INDEX.fetch_add(1, Ordering::Relaxed))
	}

	#[must_use]
	pub fn raw(self) -> u64 {
		self.0
	}
}

/// Index of one production footprint within a query's request list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProdIdx(pub u32);

/// The interpolation kernel tag carried on a query. The kernel itself
/// (`remap`) is an external collaborator (spec.md §1 Non-goals); the core
/// only threads the tag through to the point where a `ResamplerKernel`
/// implementation (supplied by the caller, see `rasterq_core::resample`)
/// is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpolation {
	NearestNeighbor,
	Bilinear,
	Cubic,
}

/// Per-production-tile derived plan (spec.md §3 "Query").
#[derive(Debug, Clone)]
pub struct ProductionPlan {
	pub cache_fps: Vec<Footprint>,
	pub sample_fp: Option<Footprint>,
	pub resample_fps: Vec<Footprint>,
	pub resample_cache_deps_fps: HashMap<Footprint, HashSet<Footprint>>,
	pub resample_sample_dep_fp: HashMap<Footprint, Option<Footprint>>,
	pub share_area: bool,
	pub same_grid: bool,
}

/// One production tile: the requested footprint plus its derived plan.
#[derive(Debug, Clone)]
pub struct ProdInfo {
	pub fp: Footprint,
	pub plan: ProductionPlan,
}

/// Marks a `QueryInfo` as an internal sub-query `Computer` issued to gather
/// a primitive's array (spec.md §4.6), rather than a user-facing call.
/// `QueriesHandler` routes the completion to `requester` as a
/// `Message::PrimitiveArrayReady` instead of the user-visible channel.
#[derive(Debug, Clone, Copy)]
pub struct InternalOrigin {
	pub requester: ActorAddress,
	pub ticket: u64,
}

/// The immutable plan for one user call (spec.md §3 `Query`/`qi`).
#[derive(Debug, Clone)]
pub struct QueryInfo {
	pub id: QueryId,
	pub raster_uid: RasterUid,
	pub prod: Vec<ProdInfo>,
	pub band_ids: Vec<u32>,
	pub unique_band_ids: Vec<u32>,
	pub dst_dtype: DType,
	pub dst_nodata: Option<f64>,
	pub interpolation: Interpolation,
	pub max_queue_size: usize,
	/// `None` for every user-facing query; `Some` only for `Computer`'s
	/// internal primitive sub-queries.
	pub origin: Option<InternalOrigin>,
}

impl QueryInfo {
	#[must_use]
	pub fn prod_count(&self) -> usize {
		self.prod.len()
	}
}

/// One ordered item delivered to a query's user-visible output channel
/// (spec.md §4.10): the production tile's index paired with its result, a
/// failure surfacing as `Err` rather than dropping the tile silently.
pub type QueryOutputItem = (ProdIdx, Result<crate::array::PixelArray, crate::error::QueryError>);

/// Canonicalize a requested band list into the unique set the core reads
/// once, plus the (possibly repeating, reorderable) indices needed to
/// reconstruct the user's requested order.
#[must_use]
pub fn canonicalize_band_ids(band_ids: &[u32]) -> Vec<u32> {
	let mut seen = HashSet::new();
	let mut unique = Vec::new();
	for &b in band_ids {
		if seen.insert(b) {
			unique.push(b);
		}
	}
	unique
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn canonicalize_dedupes_preserving_first_occurrence() {
		assert_eq!(canonicalize_band_ids(&[2, 1, 2, 3, 1]), vec![2, 1, 3]);
	}

	#[test]
	fn query_ids_are_monotonic() {
		let a = QueryId::next();
		let b = QueryId::next();
		assert!(b.raw() > a.raw());
	}
}
