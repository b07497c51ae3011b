//! `CacheStateActor`'s mailbox-facing wrapper (spec.md §4.7 "at-most-one
//! build invariant", §5 "cache-tile state slot").
//!
//! The state machine itself (`crate::cache::CacheStateActor`) is plain,
//! synchronous, owned-by-one-thread data; this module is the thin actor
//! shell around it that turns `Writer`/`Reader` completions into
//! per-subscriber `CacheTileBecameReady`/`CacheTileBecameFailed` envelopes.

use crate::cache::{CacheKey, CacheStateActor};
use crate::messages::{ActorAddress, Envelope, Message};
use crate::raster::RasterUid;
use std::sync::Arc;

/// Wraps the `Arc<CacheStateActor>` shared with every `CacheExtractor`
/// instance (which calls `begin_build_or_subscribe` directly — it is a
/// synchronized map, not a mailbox-serialized resource, matching spec.md
/// §5's "only shared mutable state" carve-out).
pub struct CacheStateHandler {
	cache: Arc<CacheStateActor>,
}

impl CacheStateHandler {
	#[must_use]
	pub fn new(cache: Arc<CacheStateActor>) -> Self {
		Self { cache }
	}

	#[must_use]
	pub fn state(&self) -> &CacheStateActor {
		&self.cache
	}

	pub fn receive_cache_file_ready(&mut self, raster_uid: RasterUid, cache_idx: crate::raster::CacheIndex, cache_fp: crate::footprint::Footprint) -> Vec<Envelope> {
		let key = CacheKey::new(raster_uid, cache_idx);
		self.cache
			.mark_ready(key)
			.into_iter()
			.map(|(qi, prod_idx)| {
				Envelope::new(ActorAddress::CacheExtractor(raster_uid), Message::CacheTileBecameReady { qi, prod_idx, cache_fp, cache_idx })
			})
			.collect()
	}

	pub fn receive_cache_file_failed(&mut self, raster_uid: RasterUid, cache_idx: crate::raster::CacheIndex, reason: String) -> Vec<Envelope> {
		self.fan_out_failure(raster_uid, cache_idx, reason)
	}

	/// `Reader` reports an unreadable (previously `ready`) tile here so the
	/// tile is flipped to `failed` process-wide; the reading query itself is
	/// cancelled directly by `Reader`, not through this fan-out (there is no
	/// `Building` subscriber list to consult for a tile that was already
	/// `ready`).
	pub fn receive_cache_file_unreadable(&mut self, raster_uid: RasterUid, cache_idx: crate::raster::CacheIndex, reason: String) -> Vec<Envelope> {
		self.fan_out_failure(raster_uid, cache_idx, reason)
	}

	/// Operator-driven invalidation (spec.md §9 [ADDED]): drops the tile's
	/// state entirely regardless of what it currently is, so the next
	/// subscriber starts a fresh build. No subscribers to notify — a tile
	/// that isn't mid-build has none, and forcing one out of `Building` isn't
	/// supported (that would strand whoever is already driving the build).
	pub fn receive_invalidate_cache_tile(&mut self, raster_uid: RasterUid, cache_idx: crate::raster::CacheIndex) -> Vec<Envelope> {
		self.cache.invalidate(CacheKey::new(raster_uid, cache_idx));
		Vec::new()
	}

	fn fan_out_failure(&mut self, raster_uid: RasterUid, cache_idx: crate::raster::CacheIndex, reason: String) -> Vec<Envelope> {
		let key = CacheKey::new(raster_uid, cache_idx);
		self.cache
			.mark_failed(key, reason.clone())
			.into_iter()
			.map(|(qi, prod_idx)| Envelope::new(ActorAddress::CacheExtractor(raster_uid), Message::CacheTileBecameFailed { qi, prod_idx, reason: reason.clone() }))
			.collect()
	}
}
