//! `Resampler` (spec.md §4.8): remaps sample tiles onto the output grid and
//! accumulates them into one production array.
//!
//! The decision table (share_area × same_grid × pool presence) drives
//! whether a contribution is a nodata fill, a direct slice, or a kernel
//! remap dispatched inline or on the `resample_pool`. The accumulator
//! buffer per `(qi.id, prod_idx)` is lazily created on first contribution
//! and garbage-collected the moment its `missing` set empties.

use crate::array::PixelArray;
use crate::error::QueryError;
use crate::footprint::Footprint;
use crate::messages::{ActorAddress, Envelope, Message};
use crate::pool::{BoxedJob, PoolJob, PriorityKey};
use crate::query::{ProdIdx, QueryId, QueryInfo};
use crate::raster::RasterDescriptor;
use crate::resample::ResamplerKernel;
use log::trace;
use ndarray::Array3;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct Accumulator {
	qi: Arc<QueryInfo>,
	array: Array3<f64>,
	missing: HashSet<Footprint>,
}

struct PendingResample {
	qi: Arc<QueryInfo>,
	prod_idx: ProdIdx,
	resample_fp: Footprint,
}

pub struct Resampler {
	raster: Arc<RasterDescriptor>,
	kernel: Arc<dyn ResamplerKernel>,
	accumulators: HashMap<(QueryId, ProdIdx), Accumulator>,
	pending: HashMap<u64, PendingResample>,
	alive: bool,
}

impl Resampler {
	#[must_use]
	pub fn new(raster: Arc<RasterDescriptor>, kernel: Arc<dyn ResamplerKernel>) -> Self {
		Self { raster, kernel, accumulators: HashMap::new(), pending: HashMap::new(), alive: true }
	}

	pub fn receive_resample_and_accumulate(
		&mut self,
		qi: Arc<QueryInfo>,
		prod_idx: ProdIdx,
		sample_fp: Option<Footprint>,
		resample_fp: Footprint,
		subsample_array: Option<PixelArray>,
	) -> Vec<Envelope> {
		trace!(target: "rasterq_core::actors::resampler", "resample_and_accumulate raster={:?} prod_idx={prod_idx:?}", self.raster.uid);
		if !self.alive {
			return Vec::new();
		}
		let pi = &qi.prod[prod_idx.0 as usize];

		if !pi.plan.share_area {
			let (rows, cols) = resample_fp.shape();
			let fill = qi.dst_nodata.unwrap_or(0.0);
			let contribution = Array3::from_elem((rows as usize, cols as usize, qi.unique_band_ids.len()), fill);
			return self.commit(Arc::clone(&qi), prod_idx, resample_fp, resample_fp, contribution);
		}

		let channel_indices: Vec<usize> = qi.unique_band_ids.iter().map(|&b| (b - 1) as usize).collect();

		if pi.plan.same_grid {
			let sample_fp = sample_fp.expect("share_area && same_grid always carries a sample dependency footprint");
			let subsample_array = subsample_array.expect("share_area && same_grid always carries a subsample array");
			let mut contribution = subsample_array.select_channels(&channel_indices).data().clone();
			if let Some(raster_nodata) = self.raster.nodata {
				let dst_nodata = qi.dst_nodata.unwrap_or(0.0);
				if (raster_nodata - dst_nodata).abs() > f64::EPSILON {
					contribution.mapv_inplace(|v| if v == raster_nodata { dst_nodata } else { v });
				}
			}
			return self.commit(Arc::clone(&qi), prod_idx, resample_fp, sample_fp, contribution);
		}

		// share_area && !same_grid: genuine interpolation is needed.
		let sample_fp = sample_fp.expect("interpolation needs a sample dependency footprint");
		let subsample_array = subsample_array.expect("interpolation needs a subsample array");
		let selected = subsample_array.select_channels(&channel_indices);

		match self.raster.pools.resample_pool {
			Some(pool_id) => {
				let kernel = Arc::clone(&self.kernel);
				let raster_nodata = self.raster.nodata;
				let dst_nodata = qi.dst_nodata;
				let interpolation = qi.interpolation;
				let func: BoxedJob = Box::new(move || kernel.remap(&sample_fp, &resample_fp, &selected, raster_nodata, dst_nodata, interpolation));
				let priority = PriorityKey { raster_uid: self.raster.uid.raw(), query_creation_index: qi.id.raw(), prod_idx: prod_idx.0, footprint_tiebreak: 0 };
				let job = PoolJob::new(priority, ActorAddress::Resampler(self.raster.uid), func);
				let tag = job.tag.raw();
				self.pending.insert(tag, PendingResample { qi: Arc::clone(&qi), prod_idx, resample_fp });
				vec![Envelope::new(ActorAddress::Pool(pool_id), Message::SubmitJob(job))]
			}
			None => match self.kernel.remap(&sample_fp, &resample_fp, &selected, self.raster.nodata, qi.dst_nodata, qi.interpolation) {
				Ok(arr) => {
					let data = arr.data().clone();
					self.commit(Arc::clone(&qi), prod_idx, resample_fp, resample_fp, data)
				}
				Err(err) => vec![self.fail(qi, prod_idx, resample_fp, err)],
			},
		}
	}

	pub fn receive_job_done(&mut self, job_tag: u64, result: anyhow::Result<PixelArray>) -> Vec<Envelope> {
		let Some(pending) = self.pending.remove(&job_tag) else {
			return Vec::new();
		};
		match result {
			Ok(arr) => {
				let data = arr.data().clone();
				self.commit(pending.qi, pending.prod_idx, pending.resample_fp, pending.resample_fp, data)
			}
			Err(err) => vec![self.fail(pending.qi, pending.prod_idx, pending.resample_fp, err)],
		}
	}

	fn commit(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, resample_fp: Footprint, write_fp: Footprint, contribution: Array3<f64>) -> Vec<Envelope> {
		let key = (qi.id, prod_idx);
		{
			let pi = &qi.prod[prod_idx.0 as usize];
			let entry = self.accumulators.entry(key).or_insert_with(|| {
				let (rows, cols) = pi.fp.shape();
				Accumulator {
					qi: Arc::clone(&qi),
					array: Array3::from_elem((rows as usize, cols as usize, qi.unique_band_ids.len()), qi.dst_nodata.unwrap_or(0.0)),
					missing: pi.plan.resample_fps.iter().copied().collect(),
				}
			});
			let (row_range, col_range) = write_fp.slice_in(&pi.fp);
			entry.array.slice_mut(ndarray::s![row_range, col_range, ..]).assign(&contribution);
			entry.missing.remove(&resample_fp);
			if !entry.missing.is_empty() {
				return Vec::new();
			}
		}

		let entry = self.accumulators.remove(&key).expect("just checked missing is empty");
		let qi = entry.qi;
		let array = if qi.band_ids == qi.unique_band_ids {
			PixelArray::new(entry.array, qi.dst_dtype)
		} else {
			let indices: Vec<usize> = qi
				.band_ids
				.iter()
				.map(|bid| qi.unique_band_ids.iter().position(|u| u == bid).expect("band_ids is a reordering of unique_band_ids"))
				.collect();
			PixelArray::new(entry.array, qi.dst_dtype).select_channels(&indices)
		};
		vec![Envelope::new(ActorAddress::Producer(qi.raster_uid), Message::MadeThisArray { qi, prod_idx, array })]
	}

	fn fail(&self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, resample_fp: Footprint, err: anyhow::Error) -> Envelope {
		Envelope::new(
			ActorAddress::QueriesHandler(qi.raster_uid),
			Message::ProductionTileFailed { qi, prod_idx, error: QueryError::contract_violation(resample_fp, err.to_string()) },
		)
	}

	/// Eagerly drops this query's accumulator and cancels its pending pool
	/// jobs, bounding memory rather than waiting for garbage collection on
	/// eventual completion (spec.md §9 resolves this open question).
	pub fn receive_cancel_this_query(&mut self, qi: Arc<QueryInfo>) -> Vec<Envelope> {
		self.accumulators.retain(|(id, _), _| *id != qi.id);
		let Some(pool_id) = self.raster.pools.resample_pool else {
			self.pending.retain(|_, p| p.qi.id != qi.id);
			return Vec::new();
		};
		let mut out = Vec::new();
		self.pending.retain(|&tag, p| {
			if p.qi.id == qi.id {
				out.push(Envelope::new(ActorAddress::Pool(pool_id), Message::CancelJob { job_tag: tag }));
				false
			} else {
				true
			}
		});
		out
	}

	pub fn receive_die(&mut self) -> Vec<Envelope> {
		self.alive = false;
		self.accumulators.clear();
		self.pending.clear();
		Vec::new()
	}
}
