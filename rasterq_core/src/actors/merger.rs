//! `Merger` (spec.md §4.5): combines the cache-tile contributions gathered
//! by `Computer`/`Reader` into one array and hands it to `Writer`.

use crate::array::{DType, PixelArray};
use crate::backend::ArrayPerFootprint;
use crate::footprint::Footprint;
use crate::messages::{ActorAddress, Envelope, Message};
use crate::pool::{BoxedJob, PoolJob, PriorityKey};
use crate::raster::{CacheIndex, RasterDescriptor, RasterSource};
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;

struct PendingMerge {
	cache_idx: CacheIndex,
	cache_fp: Footprint,
}

pub struct Merger {
	raster: Arc<RasterDescriptor>,
	pending: HashMap<u64, PendingMerge>,
	alive: bool,
}

impl Merger {
	#[must_use]
	pub fn new(raster: Arc<RasterDescriptor>) -> Self {
		Self { raster, pending: HashMap::new(), alive: true }
	}

	pub fn receive_merge_those_arrays(&mut self, cache_idx: CacheIndex, cache_fp: Footprint, array_per_fp: Arc<ArrayPerFootprint>) -> Vec<Envelope> {
		trace!(target: "rasterq_core::actors::merger", "merge_those_arrays raster={:?} cache_idx={cache_idx:?} inputs={}", self.raster.uid, array_per_fp.len());
		if !self.alive {
			return Vec::new();
		}

		// Case 1: a single contribution whose footprint already matches the
		// cache tile — forward untouched, no merge hook invoked.
		if array_per_fp.len() == 1 {
			if let Some(array) = array_per_fp.get(&cache_fp) {
				return vec![self.write_envelope(cache_idx, cache_fp, array.clone())];
			}
		}

		let merge = match &self.raster.source {
			RasterSource::Recipe { merge, .. } => Arc::clone(merge),
			RasterSource::Stored => Arc::new(crate::backend::IdentityMerge),
		};
		let channel_count = self.raster.channel_count;
		let dtype = self.raster.dtype;

		match self.raster.pools.merge_pool {
			None => {
				let result = merge.merge_arrays(&cache_fp, &array_per_fp, None).and_then(|arr| validate_merge_result(&cache_fp, channel_count, dtype, arr));
				self.finish(cache_idx, cache_fp, result)
			}
			Some(pool_id) => {
				let func: BoxedJob = Box::new(move || {
					merge.merge_arrays(&cache_fp, &array_per_fp, None).and_then(|arr| validate_merge_result(&cache_fp, channel_count, dtype, arr))
				});
				let priority = PriorityKey { raster_uid: self.raster.uid.raw(), query_creation_index: 0, prod_idx: 0, footprint_tiebreak: cache_idx.0 };
				let job = PoolJob::new(priority, ActorAddress::Merger(self.raster.uid), func);
				let tag = job.tag.raw();
				self.pending.insert(tag, PendingMerge { cache_idx, cache_fp });
				vec![Envelope::new(ActorAddress::Pool(pool_id), Message::SubmitJob(job))]
			}
		}
	}

	pub fn receive_job_done(&mut self, job_tag: u64, result: anyhow::Result<PixelArray>) -> Vec<Envelope> {
		let Some(pending) = self.pending.remove(&job_tag) else {
			return Vec::new();
		};
		self.finish(pending.cache_idx, pending.cache_fp, result)
	}

	fn finish(&self, cache_idx: CacheIndex, cache_fp: Footprint, result: anyhow::Result<PixelArray>) -> Vec<Envelope> {
		match result {
			Ok(array) => vec![self.write_envelope(cache_idx, cache_fp, array)],
			Err(err) => vec![Envelope::new(
				ActorAddress::CacheState,
				Message::CacheFileFailed { raster_uid: self.raster.uid, cache_idx, reason: err.to_string() },
			)],
		}
	}

	fn write_envelope(&self, cache_idx: CacheIndex, cache_fp: Footprint, array: PixelArray) -> Envelope {
		Envelope::new(ActorAddress::Writer(self.raster.uid), Message::WriteThisArray { raster_uid: self.raster.uid, cache_idx, cache_fp, array })
	}

	pub fn receive_die(&mut self) -> Vec<Envelope> {
		self.alive = false;
		self.pending.clear();
		Vec::new()
	}
}

/// Normalization rules are strict (spec.md §4.5): wrong shape, wrong
/// channel count, or a non-castable return is a terminal failure for the
/// cache tile.
fn validate_merge_result(cache_fp: &Footprint, channel_count: usize, dtype: DType, array: PixelArray) -> anyhow::Result<PixelArray> {
	let (rows, cols) = cache_fp.shape();
	let shape = array.shape();
	if shape != (rows as usize, cols as usize, channel_count) {
		anyhow::bail!("merge result shape {shape:?} does not match expected ({rows}, {cols}, {channel_count})");
	}
	Ok(PixelArray::new(array.data().clone(), dtype))
}
