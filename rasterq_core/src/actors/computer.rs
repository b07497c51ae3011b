//! `Computer` (spec.md §4.6): gathers a recipe raster's primitive arrays,
//! invokes the user's `ComputeHook`, and hands the result to `Merger`.
//!
//! A primitive is itself a raster, possibly with its own recipe, so
//! gathering its array means issuing a normal query against it rather than
//! reaching into its cache directly. That query is tagged with
//! [`InternalOrigin`] so `QueriesHandler` routes its single result back
//! here as `Message::PrimitiveArrayReady` instead of delivering it to a
//! user-facing output channel.

use crate::array::PixelArray;
use crate::backend::{ArrayPerFootprint, PrimitiveArrays, PrimitiveFootprints};
use crate::footprint::Footprint;
use crate::messages::{ActorAddress, Envelope, Message};
use crate::pool::{BoxedJob, PoolJob, PriorityKey};
use crate::query::{plan_query, InternalOrigin, Interpolation};
use crate::raster::{CacheIndex, RasterDescriptor, RasterRegistry, RasterSource, RasterUid};
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;

struct PendingBuild {
	cache_fp: Footprint,
	primitive_fps: PrimitiveFootprints,
	primitive_arrays: PrimitiveArrays,
	remaining: usize,
}

struct PendingJob {
	cache_idx: CacheIndex,
	cache_fp: Footprint,
}

pub struct Computer {
	raster: Arc<RasterDescriptor>,
	registry: RasterRegistry,
	builds: HashMap<CacheIndex, PendingBuild>,
	ticket_to_cache_idx: HashMap<u64, CacheIndex>,
	next_ticket: u64,
	jobs: HashMap<u64, PendingJob>,
	alive: bool,
}

impl Computer {
	#[must_use]
	pub fn new(raster: Arc<RasterDescriptor>, registry: RasterRegistry) -> Self {
		Self { raster, registry, builds: HashMap::new(), ticket_to_cache_idx: HashMap::new(), next_ticket: 1, jobs: HashMap::new(), alive: true }
	}

	pub fn receive_compute_this_array(&mut self, cache_idx: CacheIndex, cache_fp: Footprint) -> Vec<Envelope> {
		trace!(target: "rasterq_core::actors::computer", "compute_this_array raster={:?} cache_idx={cache_idx:?}", self.raster.uid);
		if !self.alive {
			return Vec::new();
		}
		let RasterSource::Recipe { primitives, .. } = &self.raster.source else {
			return vec![Envelope::new(
				ActorAddress::CacheState,
				Message::CacheFileFailed { raster_uid: self.raster.uid, cache_idx, reason: "compute requested on a stored raster".into() },
			)];
		};

		if primitives.is_empty() {
			return self.dispatch_compute(cache_idx, cache_fp, PrimitiveFootprints::new(), PrimitiveArrays::new());
		}

		let mut primitive_fps = PrimitiveFootprints::new();
		let mut envelopes = Vec::with_capacity(primitives.len());
		for primitive in primitives {
			let primitive_fp = (primitive.convert_fp)(&cache_fp);
			primitive_fps.insert(primitive.uid, primitive_fp);

			let Some(primitive_desc) = self.registry.get(&primitive.uid).map(|r| Arc::clone(r.value())) else {
				return vec![Envelope::new(
					ActorAddress::CacheState,
					Message::CacheFileFailed { raster_uid: self.raster.uid, cache_idx, reason: format!("unregistered primitive raster {:?}", primitive.uid) },
				)];
			};

			let ticket = self.next_ticket;
			self.next_ticket += 1;
			let band_ids: Vec<u32> = (1..=primitive_desc.channel_count as u32).collect();
			let plan = plan_query(&primitive_desc, &[primitive_fp], band_ids, primitive_desc.dtype, primitive_desc.nodata, Interpolation::NearestNeighbor, 1);
			let mut qi = match plan {
				Ok(qi) => qi,
				Err(err) => {
					return vec![Envelope::new(
						ActorAddress::CacheState,
						Message::CacheFileFailed { raster_uid: self.raster.uid, cache_idx, reason: format!("planning primitive sub-query failed: {err}") },
					)];
				}
			};
			qi.origin = Some(InternalOrigin { requester: ActorAddress::Computer(self.raster.uid), ticket });
			self.ticket_to_cache_idx.insert(ticket, cache_idx);
			envelopes.push(Envelope::new(ActorAddress::QueriesHandler(primitive.uid), Message::EnqueueQuery { qi: Arc::new(qi), output: None }));
		}

		self.builds.insert(cache_idx, PendingBuild { cache_fp, primitive_fps, primitive_arrays: PrimitiveArrays::new(), remaining: envelopes.len() });
		envelopes
	}

	pub fn receive_primitive_array_ready(&mut self, ticket: u64, primitive_uid: RasterUid, array: PixelArray) -> Vec<Envelope> {
		if !self.alive {
			return Vec::new();
		}
		let Some(cache_idx) = self.ticket_to_cache_idx.remove(&ticket) else {
			return Vec::new();
		};
		let Some(build) = self.builds.get_mut(&cache_idx) else {
			return Vec::new();
		};
		build.primitive_arrays.insert(primitive_uid, array);
		build.remaining = build.remaining.saturating_sub(1);
		if build.remaining > 0 {
			return Vec::new();
		}
		let build = self.builds.remove(&cache_idx).expect("just checked present");
		self.dispatch_compute(cache_idx, build.cache_fp, build.primitive_fps, build.primitive_arrays)
	}

	/// A primitive sub-query's production tile failed outright; there is no
	/// array to gather for this build, so fail the whole recipe tile rather
	/// than wait on siblings that would never be consumed.
	pub fn receive_primitive_array_failed(&mut self, ticket: u64, reason: String) -> Vec<Envelope> {
		if !self.alive {
			return Vec::new();
		}
		let Some(cache_idx) = self.ticket_to_cache_idx.remove(&ticket) else {
			return Vec::new();
		};
		if self.builds.remove(&cache_idx).is_none() {
			return Vec::new();
		}
		vec![Envelope::new(ActorAddress::CacheState, Message::CacheFileFailed { raster_uid: self.raster.uid, cache_idx, reason: format!("primitive sub-query failed: {reason}") })]
	}

	fn dispatch_compute(&mut self, cache_idx: CacheIndex, cache_fp: Footprint, primitive_fps: PrimitiveFootprints, primitive_arrays: PrimitiveArrays) -> Vec<Envelope> {
		let RasterSource::Recipe { compute, .. } = &self.raster.source else {
			return vec![Envelope::new(
				ActorAddress::CacheState,
				Message::CacheFileFailed { raster_uid: self.raster.uid, cache_idx, reason: "compute requested on a stored raster".into() },
			)];
		};
		let compute = Arc::clone(compute);

		match self.raster.pools.computation_pool {
			None => {
				let result = compute.compute_array(&cache_fp, &primitive_fps, &primitive_arrays, None);
				self.finish(cache_idx, cache_fp, result)
			}
			Some(pool_id) => {
				let func: BoxedJob = Box::new(move || compute.compute_array(&cache_fp, &primitive_fps, &primitive_arrays, None));
				let priority = PriorityKey { raster_uid: self.raster.uid.raw(), query_creation_index: 0, prod_idx: 0, footprint_tiebreak: cache_idx.0 };
				let job = PoolJob::new(priority, ActorAddress::Computer(self.raster.uid), func);
				let tag = job.tag.raw();
				self.jobs.insert(tag, PendingJob { cache_idx, cache_fp });
				vec![Envelope::new(ActorAddress::Pool(pool_id), Message::SubmitJob(job))]
			}
		}
	}

	pub fn receive_job_done(&mut self, job_tag: u64, result: anyhow::Result<PixelArray>) -> Vec<Envelope> {
		let Some(pending) = self.jobs.remove(&job_tag) else {
			return Vec::new();
		};
		self.finish(pending.cache_idx, pending.cache_fp, result)
	}

	fn finish(&self, cache_idx: CacheIndex, cache_fp: Footprint, result: anyhow::Result<PixelArray>) -> Vec<Envelope> {
		match result {
			Ok(array) => {
				let mut array_per_fp = ArrayPerFootprint::new();
				array_per_fp.insert(cache_fp, array);
				vec![Envelope::new(
					ActorAddress::Merger(self.raster.uid),
					Message::MergeThoseArrays { raster_uid: self.raster.uid, cache_idx, cache_fp, array_per_fp: Arc::new(array_per_fp) },
				)]
			}
			Err(err) => vec![Envelope::new(
				ActorAddress::CacheState,
				Message::CacheFileFailed { raster_uid: self.raster.uid, cache_idx, reason: err.to_string() },
			)],
		}
	}

	pub fn receive_die(&mut self) -> Vec<Envelope> {
		self.alive = false;
		self.builds.clear();
		self.ticket_to_cache_idx.clear();
		self.jobs.clear();
		Vec::new()
	}
}
