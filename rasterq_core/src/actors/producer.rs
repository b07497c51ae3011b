//! `Producer` (spec.md §4.9): orchestrates one output tile, waiting for its
//! cache-tile reads and dispatching the resamplings they unblock.

use crate::array::PixelArray;
use crate::footprint::Footprint;
use crate::messages::{ActorAddress, Envelope, Message};
use crate::query::{ProdIdx, QueryId, QueryInfo};
use crate::raster::RasterUid;
use log::trace;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Mutable per-`(qi, prod_idx)` state: the combined sample array (shared,
/// populated incrementally by reads) and which resample dependencies are
/// still outstanding. Destroyed iff its output has been emitted or the
/// query cancelled (spec.md §3 "Production state").
struct ProdArray {
	resample_needs: HashMap<Footprint, HashSet<Footprint>>,
	sample_array: Option<PixelArray>,
}

pub struct Producer {
	raster_uid: RasterUid,
	produce: HashMap<(QueryId, ProdIdx), ProdArray>,
	alive: bool,
}

impl Producer {
	#[must_use]
	pub fn new(raster_uid: RasterUid) -> Self {
		Self { raster_uid, produce: HashMap::new(), alive: true }
	}

	pub fn receive_make_this_array(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx) -> Vec<Envelope> {
		trace!(target: "rasterq_core::actors::producer", "make_this_array raster={:?} prod_idx={prod_idx:?}", self.raster_uid);
		if !self.alive {
			return Vec::new();
		}
		let pi = &qi.prod[prod_idx.0 as usize];
		let resample_needs: HashMap<Footprint, HashSet<Footprint>> = pi.plan.resample_cache_deps_fps.clone();

		let mut out = Vec::new();
		if !pi.plan.cache_fps.is_empty() {
			out.push(Envelope::new(ActorAddress::CacheExtractor(self.raster_uid), Message::SampleThoseCacheFilesToAnArray { qi: Arc::clone(&qi), prod_idx }));
		}
		for (&resample_fp, cache_fps) in &resample_needs {
			if cache_fps.is_empty() {
				debug_assert!(pi.plan.resample_sample_dep_fp.get(&resample_fp).copied().flatten().is_none());
				out.push(Envelope::new(
					ActorAddress::Resampler(self.raster_uid),
					Message::ResampleAndAccumulate { qi: Arc::clone(&qi), prod_idx, sample_fp: None, resample_fp, subsample_array: None },
				));
			}
		}

		self.produce.insert((qi.id, prod_idx), ProdArray { resample_needs, sample_array: None });
		out
	}

	pub fn receive_sampled_a_cache_file_to_the_array(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, cache_fp: Footprint, array: PixelArray) -> Vec<Envelope> {
		if !self.alive {
			return Vec::new();
		}
		let key = (qi.id, prod_idx);
		let Some(pr) = self.produce.get_mut(&key) else {
			return Vec::new();
		};

		match &pr.sample_array {
			None => pr.sample_array = Some(array),
			Some(existing) => {
				assert!(array.same_buffer(existing), "sampled_a_cache_file_to_the_array delivered a distinct buffer for the same production tile");
			}
		}

		let pi = &qi.prod[prod_idx.0 as usize];
		let sample_array = pr.sample_array.clone().expect("just set above");
		let mut out = Vec::new();
		for (&resample_fp, cache_fps) in &mut pr.resample_needs {
			cache_fps.remove(&cache_fp);
			if !cache_fps.is_empty() {
				continue;
			}
			let sample_fp = pi.plan.resample_sample_dep_fp.get(&resample_fp).copied().flatten();
			let subsample_array = match sample_fp {
				None => None,
				Some(dep_fp) => {
					let combined_fp = pi.plan.sample_fp.expect("a resample dependency implies a combined sample footprint");
					Some(slice_array(&sample_array, &dep_fp, &combined_fp))
				}
			};
			out.push(Envelope::new(
				ActorAddress::Resampler(self.raster_uid),
				Message::ResampleAndAccumulate { qi: Arc::clone(&qi), prod_idx, sample_fp, resample_fp, subsample_array },
			));
		}
		out
	}

	pub fn receive_made_this_array(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, array: PixelArray) -> Vec<Envelope> {
		self.produce.remove(&(qi.id, prod_idx));
		vec![Envelope::new(ActorAddress::QueriesHandler(self.raster_uid), Message::MadeThisArray { qi, prod_idx, array })]
	}

	pub fn receive_cancel_this_query(&mut self, qi: Arc<QueryInfo>) -> Vec<Envelope> {
		self.produce.retain(|(id, _), _| *id != qi.id);
		Vec::new()
	}

	pub fn receive_die(&mut self) -> Vec<Envelope> {
		self.alive = false;
		self.produce.clear();
		Vec::new()
	}
}

/// Carve `dep_fp`'s region out of `combined`, which was read on
/// `combined_fp`'s grid.
fn slice_array(combined: &PixelArray, dep_fp: &Footprint, combined_fp: &Footprint) -> PixelArray {
	let (row_range, col_range) = dep_fp.slice_in(combined_fp);
	let sliced = combined.data().slice(ndarray::s![row_range, col_range, ..]).to_owned();
	PixelArray::new(sliced, combined.dtype())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::array::DType;
	use crate::query::{canonicalize_band_ids, Interpolation, ProdInfo, ProductionPlan, QueryId};
	use crate::raster::RasterUid;

	fn qi_with_two_deps(prod_fp: Footprint, cache_fp: Footprint) -> Arc<QueryInfo> {
		let mut cache_deps = HashMap::new();
		let mut deps = HashSet::new();
		deps.insert(cache_fp);
		cache_deps.insert(cache_fp, deps);
		let mut sample_dep = HashMap::new();
		sample_dep.insert(cache_fp, Some(cache_fp));

		Arc::new(QueryInfo {
			id: QueryId::next(),
			raster_uid: RasterUid::next(),
			prod: vec![ProdInfo {
				fp: prod_fp,
				plan: ProductionPlan {
					cache_fps: vec![cache_fp],
					sample_fp: Some(cache_fp),
					resample_fps: vec![cache_fp],
					resample_cache_deps_fps: cache_deps,
					resample_sample_dep_fp: sample_dep,
					share_area: true,
					same_grid: true,
				},
			}],
			band_ids: vec![1],
			unique_band_ids: canonicalize_band_ids(&[1]),
			dst_dtype: DType::F32,
			dst_nodata: Some(0.0),
			interpolation: Interpolation::NearestNeighbor,
			max_queue_size: 5,
			origin: None,
		})
	}

	#[test]
	fn make_this_array_kicks_cache_extractor_when_cache_fps_present() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 2, 2);
		let qi = qi_with_two_deps(fp, fp);
		let mut producer = Producer::new(qi.raster_uid);
		let envs = producer.receive_make_this_array(Arc::clone(&qi), ProdIdx(0));
		assert_eq!(envs.len(), 1);
		assert!(matches!(envs[0].msg, Message::SampleThoseCacheFilesToAnArray { .. }));
	}

	#[test]
	fn fully_outside_production_kicks_resampler_with_null_sample() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 2, 2);
		let qi = Arc::new(QueryInfo {
			id: QueryId::next(),
			raster_uid: RasterUid::next(),
			prod: vec![ProdInfo {
				fp,
				plan: ProductionPlan {
					cache_fps: Vec::new(),
					sample_fp: None,
					resample_fps: vec![fp],
					resample_cache_deps_fps: {
						let mut m = HashMap::new();
						m.insert(fp, HashSet::new());
						m
					},
					resample_sample_dep_fp: {
						let mut m = HashMap::new();
						m.insert(fp, None);
						m
					},
					share_area: false,
					same_grid: false,
				},
			}],
			band_ids: vec![1],
			unique_band_ids: canonicalize_band_ids(&[1]),
			dst_dtype: DType::F32,
			dst_nodata: Some(0.0),
			interpolation: Interpolation::NearestNeighbor,
			max_queue_size: 5,
			origin: None,
		});
		let mut producer = Producer::new(qi.raster_uid);
		let envs = producer.receive_make_this_array(qi, ProdIdx(0));
		assert_eq!(envs.len(), 1);
		assert!(matches!(envs[0].msg, Message::ResampleAndAccumulate { sample_fp: None, .. }));
	}

	#[test]
	fn sampled_cache_file_unblocks_resample_and_slices_sample() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 2, 2);
		let qi = qi_with_two_deps(fp, fp);
		let mut producer = Producer::new(qi.raster_uid);
		producer.receive_make_this_array(Arc::clone(&qi), ProdIdx(0));

		let array = PixelArray::filled(2, 2, 1, 3.0, DType::F32);
		let envs = producer.receive_sampled_a_cache_file_to_the_array(Arc::clone(&qi), ProdIdx(0), fp, array);
		assert_eq!(envs.len(), 1);
		let Message::ResampleAndAccumulate { subsample_array, .. } = &envs[0].msg else {
			panic!("expected ResampleAndAccumulate, got {:?}", envs[0].msg);
		};
		assert!(subsample_array.is_some());
	}

	#[test]
	fn made_this_array_forwards_and_gcs_state() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 2, 2);
		let qi = qi_with_two_deps(fp, fp);
		let mut producer = Producer::new(qi.raster_uid);
		producer.receive_make_this_array(Arc::clone(&qi), ProdIdx(0));
		let array = PixelArray::filled(2, 2, 1, 1.0, DType::F32);
		let envs = producer.receive_made_this_array(Arc::clone(&qi), ProdIdx(0), array);
		assert_eq!(envs.len(), 1);
		assert!(matches!(envs[0].msg, Message::MadeThisArray { .. }));
		assert!(producer.produce.is_empty());
	}
}
