//! `CacheExtractor` (spec.md §4.7): per-cache-tile dispatch and the
//! at-most-one-build invariant.
//!
//! Only *recipe* rasters go through the `absent -> building -> {ready,
//! failed}` state machine: a recipe's compute step is the expensive,
//! worth-deduplicating operation the invariant protects. A *stored*
//! raster's cache tile already exists (or doesn't) in its backend, so
//! there is nothing to build or dedupe — `CacheExtractor` reads it
//! directly every time and lets `Reader`'s existing failure path
//! (`cache_file_unreadable`) handle a missing file.

use crate::cache::{BuildDecision, CacheKey, CacheStateActor};
use crate::messages::{ActorAddress, Envelope, Message};
use crate::query::{ProdIdx, QueryInfo};
use crate::raster::RasterDescriptor;
use log::trace;
use std::sync::Arc;

pub struct CacheExtractor {
	raster: Arc<RasterDescriptor>,
	cache: Arc<CacheStateActor>,
	alive: bool,
}

impl CacheExtractor {
	#[must_use]
	pub fn new(raster: Arc<RasterDescriptor>, cache: Arc<CacheStateActor>) -> Self {
		Self { raster, cache, alive: true }
	}

	pub fn receive_sample_those_cache_files_to_an_array(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx) -> Vec<Envelope> {
		trace!(target: "rasterq_core::actors::cache_extractor", "sample_those_cache_files raster={:?} prod_idx={prod_idx:?}", self.raster.uid);
		if !self.alive {
			return Vec::new();
		}
		let Some(prod) = qi.prod.get(prod_idx.0 as usize) else {
			return Vec::new();
		};
		let mut out = Vec::new();
		for &cache_fp in &prod.plan.cache_fps {
			let cache_idx = self.raster.cache_index_for(&cache_fp);

			if !self.raster.is_recipe() {
				out.push(self.read_envelope(Arc::clone(&qi), prod_idx, cache_fp, cache_idx));
				continue;
			}

			let key = CacheKey::new(self.raster.uid, cache_idx);
			match self.cache.begin_build_or_subscribe(key, Arc::clone(&qi), prod_idx) {
				BuildDecision::Ready => out.push(self.read_envelope(Arc::clone(&qi), prod_idx, cache_fp, cache_idx)),
				BuildDecision::AlreadyBuilding => {}
				BuildDecision::StartBuild => out.push(Envelope::new(
					ActorAddress::Computer(self.raster.uid),
					Message::ComputeThisArray { raster_uid: self.raster.uid, cache_idx, cache_fp },
				)),
			}
		}
		out
	}

	/// A subscribed build finished; issue the read this subscriber was
	/// waiting for.
	pub fn receive_cache_tile_became_ready(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, cache_fp: crate::footprint::Footprint, cache_idx: crate::raster::CacheIndex) -> Vec<Envelope> {
		if !self.alive {
			return Vec::new();
		}
		vec![self.read_envelope(qi, prod_idx, cache_fp, cache_idx)]
	}

	/// A subscribed build (or an unreadable stored tile) failed; cancel
	/// this query.
	pub fn receive_cache_tile_became_failed(&mut self, qi: Arc<QueryInfo>, _reason: String) -> Vec<Envelope> {
		if !self.alive {
			return Vec::new();
		}
		vec![Envelope::new(ActorAddress::QueriesHandler(self.raster.uid), Message::CancelThisQuery { qi })]
	}

	/// No per-query state is held here beyond what `CacheStateActor`
	/// tracks as build subscribers; a cancelled query's eventual
	/// `CacheTileBecameReady`/`Failed` is simply ignored downstream by
	/// `QueriesHandler` and `Producer`, which have already dropped it.
	pub fn receive_cancel_this_query(&mut self, _qi: Arc<QueryInfo>) -> Vec<Envelope> {
		Vec::new()
	}

	pub fn receive_die(&mut self) -> Vec<Envelope> {
		self.alive = false;
		Vec::new()
	}

	fn read_envelope(&self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, cache_fp: crate::footprint::Footprint, cache_idx: crate::raster::CacheIndex) -> Envelope {
		Envelope::new(ActorAddress::Reader(self.raster.uid), Message::ReadThisCacheFile { qi, prod_idx, cache_fp, cache_idx })
	}
}
