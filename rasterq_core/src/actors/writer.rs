//! `Writer`: persists merged cache tiles to the backend (spec.md §4.4).
//! Writes are ordered per cache tile by virtue of being queued through that
//! tile's single `CacheStateActor` build; distinct tiles proceed
//! concurrently via the `io_pool`.

use crate::array::PixelArray;
use crate::backend::RasterBackend;
use crate::footprint::Footprint;
use crate::messages::{ActorAddress, Envelope, Message};
use crate::pool::{PoolId, PoolJob, PriorityKey};
use crate::raster::{CacheIndex, RasterUid};
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;

struct PendingWrite {
	cache_idx: CacheIndex,
	cache_fp: Footprint,
}

pub struct Writer {
	raster_uid: RasterUid,
	backend: Arc<dyn RasterBackend>,
	io_pool: Option<PoolId>,
	pending: HashMap<u64, PendingWrite>,
	alive: bool,
}

impl Writer {
	#[must_use]
	pub fn new(raster_uid: RasterUid, backend: Arc<dyn RasterBackend>, io_pool: Option<PoolId>) -> Self {
		Self { raster_uid, backend, io_pool, pending: HashMap::new(), alive: true }
	}

	pub fn receive_write_this_array(&mut self, cache_idx: CacheIndex, cache_fp: Footprint, array: PixelArray) -> Vec<Envelope> {
		trace!(target: "rasterq_core::actors::writer", "write_this_array raster={:?} cache_idx={cache_idx:?}", self.raster_uid);
		if !self.alive {
			return Vec::new();
		}
		let backend = Arc::clone(&self.backend);
		let func: crate::pool::BoxedJob = Box::new(move || backend.write(&cache_fp, &array).map(|()| array_placeholder()));

		let priority = PriorityKey { raster_uid: self.raster_uid.raw(), query_creation_index: 0, prod_idx: 0, footprint_tiebreak: cache_idx.0 };
		let job = PoolJob::new(priority, ActorAddress::Writer(self.raster_uid), func);
		let tag = job.tag.raw();
		self.pending.insert(tag, PendingWrite { cache_idx, cache_fp });

		match self.io_pool {
			Some(pool_id) => vec![Envelope::new(ActorAddress::Pool(pool_id), Message::SubmitJob(job))],
			None => {
				let PoolJob { func, .. } = job;
				let result = func();
				self.finish(tag, result)
			}
		}
	}

	pub fn receive_job_done(&mut self, job_tag: u64, result: anyhow::Result<PixelArray>) -> Vec<Envelope> {
		self.finish(job_tag, result)
	}

	fn finish(&mut self, job_tag: u64, result: anyhow::Result<PixelArray>) -> Vec<Envelope> {
		let Some(pending) = self.pending.remove(&job_tag) else {
			return Vec::new();
		};
		match result {
			Ok(_) => vec![Envelope::new(
				ActorAddress::CacheState,
				Message::CacheFileReady { raster_uid: self.raster_uid, cache_idx: pending.cache_idx, cache_fp: pending.cache_fp },
			)],
			Err(err) => vec![Envelope::new(
				ActorAddress::CacheState,
				Message::CacheFileFailed { raster_uid: self.raster_uid, cache_idx: pending.cache_idx, reason: err.to_string() },
			)],
		}
	}

	pub fn receive_die(&mut self) -> Vec<Envelope> {
		self.alive = false;
		self.pending.clear();
		Vec::new()
	}
}

/// `write` returns `()`; the job closure signature is shared with reads so
/// it must still produce a `PixelArray`. The value is never inspected.
fn array_placeholder() -> PixelArray {
	PixelArray::filled(0, 0, 0, 0.0, crate::array::DType::F64)
}
