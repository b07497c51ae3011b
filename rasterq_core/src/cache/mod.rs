//! The process-wide cache-tile state machine (spec.md §3 "Cache tile",
//! §4.7 "at-most-one build" invariant).

use crate::query::{ProdIdx, QueryInfo};
use crate::raster::{CacheIndex, RasterUid};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;

/// Addresses one cache tile process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
	pub raster_uid: RasterUid,
	pub cache_idx: CacheIndex,
}

impl CacheKey {
	#[must_use]
	pub fn new(raster_uid: RasterUid, cache_idx: CacheIndex) -> Self {
		Self { raster_uid, cache_idx }
	}
}

/// A cache tile's on-disk presence state. Transitions: `Absent -> Building
/// -> {Ready, Failed}`, `Failed -> Building` on retry; never `Ready ->
/// Building`.
#[derive(Debug, Clone)]
pub enum CacheTileState {
	Absent,
	Building { subscribers: Vec<(Arc<QueryInfo>, ProdIdx)> },
	Ready,
	Failed { reason: String },
}

/// Owns the process-wide `DashMap<CacheKey, CacheTileState>`. The
/// `absent -> building` transition is made atomic with `DashMap::entry` so
/// that exactly one subscriber starts a build for any given tile; later
/// subscribers for the same tile attach to the in-flight build.
#[derive(Default)]
pub struct CacheStateActor {
	states: DashMap<CacheKey, CacheTileState>,
}

/// What the caller of `begin_build_or_subscribe` should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum BuildDecision {
	/// This caller won the race: it must drive the build (Computer/Merger/
	/// Writer) to completion.
	StartBuild,
	/// A build is already in flight; the caller was added as a subscriber
	/// and will be notified via `cache_file_ready`/`cache_file_failed`.
	AlreadyBuilding,
	/// The tile is already `Ready`; proceed straight to `Reader`.
	Ready,
}

impl CacheStateActor {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// `CacheExtractor`'s per-cache-tile dispatch (spec.md §4.7).
	pub fn begin_build_or_subscribe(&self, key: CacheKey, qi: Arc<QueryInfo>, prod_idx: ProdIdx) -> BuildDecision {
		match self.states.entry(key) {
			Entry::Vacant(e) => {
				debug!(target: "rasterq_core::cache", "tile {key:?} absent -> building");
				e.insert(CacheTileState::Building { subscribers: vec![(qi, prod_idx)] });
				BuildDecision::StartBuild
			}
			Entry::Occupied(mut e) => match e.get_mut() {
				CacheTileState::Building { subscribers } => {
					subscribers.push((qi, prod_idx));
					BuildDecision::AlreadyBuilding
				}
				CacheTileState::Ready => BuildDecision::Ready,
				CacheTileState::Failed { .. } => {
					debug!(target: "rasterq_core::cache", "tile {key:?} failed -> retrying build");
					*e.get_mut() = CacheTileState::Building { subscribers: vec![(qi, prod_idx)] };
					BuildDecision::StartBuild
				}
				CacheTileState::Absent => unreachable!("occupied entry cannot hold Absent"),
			},
		}
	}

	/// Mark a build complete; returns the subscribers to notify.
	pub fn mark_ready(&self, key: CacheKey) -> Vec<(Arc<QueryInfo>, ProdIdx)> {
		let Some((_, old)) = self.states.remove(&key) else {
			return Vec::new();
		};
		let subscribers = match old {
			CacheTileState::Building { subscribers } => subscribers,
			other => {
				warn!(target: "rasterq_core::cache", "mark_ready on tile {key:?} not in Building state: {other:?}");
				Vec::new()
			}
		};
		self.states.insert(key, CacheTileState::Ready);
		subscribers
	}

	/// Mark a build failed; returns the subscribers to cancel.
	pub fn mark_failed(&self, key: CacheKey, reason: String) -> Vec<(Arc<QueryInfo>, ProdIdx)> {
		let Some((_, old)) = self.states.remove(&key) else {
			return Vec::new();
		};
		let subscribers = match old {
			CacheTileState::Building { subscribers } => subscribers,
			other => {
				warn!(target: "rasterq_core::cache", "mark_failed on tile {key:?} not in Building state: {other:?}");
				Vec::new()
			}
		};
		self.states.insert(key, CacheTileState::Failed { reason });
		subscribers
	}

	/// Drop a tile's state entirely so the next query retries the build
	/// (spec.md §9 [ADDED] retry-on-next-query policy).
	pub fn invalidate(&self, key: CacheKey) {
		self.states.remove(&key);
	}

	#[must_use]
	pub fn state_of(&self, key: CacheKey) -> Option<CacheTileState> {
		self.states.get(&key).map(|r| r.value().clone())
	}
}
