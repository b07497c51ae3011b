//! `Reader`: issues cache-file reads and hands the result to `Producer`
//! (spec.md §4.3).

use crate::array::PixelArray;
use crate::backend::RasterBackend;
use crate::footprint::Footprint;
use crate::messages::{ActorAddress, Envelope, Message};
use crate::pool::{PoolId, PoolJob, PriorityKey};
use crate::query::{ProdIdx, QueryInfo};
use crate::raster::{CacheIndex, RasterUid};
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;

struct PendingRead {
	qi: Arc<QueryInfo>,
	prod_idx: ProdIdx,
	cache_fp: Footprint,
	cache_idx: CacheIndex,
}

pub struct Reader {
	raster_uid: RasterUid,
	backend: Arc<dyn RasterBackend>,
	io_pool: Option<PoolId>,
	pending: HashMap<u64, PendingRead>,
	alive: bool,
}

impl Reader {
	#[must_use]
	pub fn new(raster_uid: RasterUid, backend: Arc<dyn RasterBackend>, io_pool: Option<PoolId>) -> Self {
		Self { raster_uid, backend, io_pool, pending: HashMap::new(), alive: true }
	}

	pub fn receive_read_this_cache_file(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, cache_fp: Footprint, cache_idx: CacheIndex) -> Vec<Envelope> {
		trace!(target: "rasterq_core::actors::reader", "read_this_cache_file raster={:?} cache_idx={cache_idx:?}", self.raster_uid);
		if !self.alive {
			return Vec::new();
		}
		let backend = Arc::clone(&self.backend);
		let cache_fp_for_job = cache_fp;
		let func: crate::pool::BoxedJob = Box::new(move || backend.read(&cache_fp_for_job, &cache_fp_for_job));

		let priority = PriorityKey {
			raster_uid: self.raster_uid.raw(),
			query_creation_index: qi.id.raw(),
			prod_idx: prod_idx.0,
			footprint_tiebreak: cache_idx.0,
		};
		let job = PoolJob::new(priority, ActorAddress::Reader(self.raster_uid), func);
		let tag = job.tag.raw();
		self.pending.insert(tag, PendingRead { qi, prod_idx, cache_fp, cache_idx });

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
			Ok(array) => vec![Envelope::new(
				ActorAddress::Producer(self.raster_uid),
				Message::SampledACacheFileToTheArray { qi: pending.qi, prod_idx: pending.prod_idx, cache_fp: pending.cache_fp, array },
			)],
			Err(err) => {
				// Two recipients: CacheState flips the tile process-wide so the
				// next query retries the build (spec.md §4.3); CacheExtractor
				// cancels specifically *this* query, since a tile that was
				// already `ready` has no Building subscriber list to fan out
				// through.
				vec![
					Envelope::new(
						ActorAddress::CacheState,
						Message::CacheFileUnreadable { raster_uid: self.raster_uid, cache_idx: pending.cache_idx, reason: err.to_string() },
					),
					Envelope::new(
						ActorAddress::CacheExtractor(self.raster_uid),
						Message::CacheTileBecameFailed { qi: pending.qi, prod_idx: pending.prod_idx, reason: err.to_string() },
					),
				]
			}
		}
	}

	pub fn receive_die(&mut self) -> Vec<Envelope> {
		self.alive = false;
		self.pending.clear();
		Vec::new()
	}
}
