//! Raster identity and descriptors.
//!
//! A `Raster` is either backed directly by a `RasterBackend` (a "stored"
//! raster) or is a recipe: a user compute function plus a list of primitive
//! rasters with footprint-conversion functions. Either way it is addressed
//! by a single process-unique [`RasterUid`], minted the way
//! `versatiles_pipeline`'s `GdalPool` derives pool identity from `id(pool)`.

use crate::array::DType;
use crate::backend::{ComputeHook, MergeHook};
use crate::footprint::Footprint;
use crate::pool::PoolId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_RASTER_UID: AtomicU64 = AtomicU64::new(1);

/// A process-unique raster identifier, minted once per registered raster
/// and never reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RasterUid(u64);

impl RasterUid {
	#[must_use]
	pub fn next() -> Self {
		Self(NEXT_RASTER_UID.fetch_add(1, Ordering::Relaxed))
	}

	#[must_use]
	pub fn raw(self) -> u64 {
		self.0
	}
}

/// Row-major index into a raster's cache-tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheIndex(pub u64);

/// The optional pools a raster may route its jobs through. `None` means
/// "run inline on the scheduler task", matching `spec.md`'s "no pool"
/// branch in Merger/Resampler/Computer.
#[derive(Debug, Clone, Default)]
pub struct RasterPools {
	pub io_pool: Option<PoolId>,
	pub resample_pool: Option<PoolId>,
	pub computation_pool: Option<PoolId>,
	pub merge_pool: Option<PoolId>,
}

/// A primitive raster dependency of a recipe raster, with the
/// footprint-conversion function used to derive the primitive's needed
/// footprint from the recipe's queried footprint.
pub struct PrimitiveRef {
	pub uid: RasterUid,
	pub convert_fp: Arc<dyn Fn(&Footprint) -> Footprint + Send + Sync>,
}

impl std::fmt::Debug for PrimitiveRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PrimitiveRef").field("uid", &self.uid).finish_non_exhaustive()
	}
}

/// What a raster's pixels come from: directly stored cache tiles read
/// through a `RasterBackend`, or computed from primitive rasters by a
/// recipe's `ComputeHook`.
pub enum RasterSource {
	Stored,
	Recipe {
		compute: Arc<dyn ComputeHook>,
		merge: Arc<dyn MergeHook>,
		primitives: Vec<PrimitiveRef>,
	},
}

impl std::fmt::Debug for RasterSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RasterSource::Stored => f.write_str("RasterSource::Stored"),
			RasterSource::Recipe { primitives, .. } => {
				f.debug_struct("RasterSource::Recipe").field("primitives", &primitives.len()).finish()
			}
		}
	}
}

/// The static description of a registered raster: everything the scheduler
/// needs that does not change over the raster's lifetime.
#[derive(Debug)]
pub struct RasterDescriptor {
	pub uid: RasterUid,
	pub dtype: DType,
	pub channel_count: usize,
	pub nodata: Option<f64>,
	pub pools: RasterPools,
	pub full_footprint: Footprint,
	pub cache_tile_shape: (u32, u32),
	pub source: RasterSource,
}

/// Process-wide lookup from a primitive's `RasterUid` to its descriptor,
/// shared by the scheduler with every `Computer` instance so a recipe's
/// primitive sub-queries can be planned without threading the whole
/// raster graph through each actor.
pub type RasterRegistry = Arc<DashMap<RasterUid, Arc<RasterDescriptor>>>;

impl RasterDescriptor {
	#[must_use]
	pub fn is_recipe(&self) -> bool {
		matches!(self.source, RasterSource::Recipe { .. })
	}

	/// Row-major cache-tile index covering `fp`'s origin pixel.
	#[must_use]
	pub fn cache_index_for(&self, fp: &Footprint) -> CacheIndex {
		let (tile_rows, tile_cols) = self.cache_tile_shape;
		let (ox, oy) = self.full_footprint.origin();
		let (px, py) = self.full_footprint.pixel_size();
		let (fx, fy) = fp.origin();
		let col = (((fx - ox) / px).round() as u64) / u64::from(tile_cols);
		let row = (((fy - oy) / py).round() as u64) / u64::from(tile_rows);
		let grid_cols = self.full_footprint.cols().div_ceil(tile_cols);
		CacheIndex(row * u64::from(grid_cols) + col)
	}

	/// The footprint of the cache tile at `index`.
	#[must_use]
	pub fn cache_tile_footprint(&self, index: CacheIndex) -> Footprint {
		let (tile_rows, tile_cols) = self.cache_tile_shape;
		let grid_cols = self.full_footprint.cols().div_ceil(tile_cols);
		let col = (index.0 % u64::from(grid_cols)) as u32;
		let row = (index.0 / u64::from(grid_cols)) as u32;
		let (ox, oy) = self.full_footprint.origin();
		let (px, py) = self.full_footprint.pixel_size();
		let origin_x = ox + px * f64::from(col * tile_cols);
		let origin_y = oy + py * f64::from(row * tile_rows);
		let rows = tile_rows.min(self.full_footprint.rows() - row * tile_rows);
		let cols = tile_cols.min(self.full_footprint.cols() - col * tile_cols);
		Footprint::new(origin_x, origin_y, px, py, rows, cols)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn descriptor() -> RasterDescriptor {
		RasterDescriptor {
			uid: RasterUid::next(),
			dtype: DType::F32,
			channel_count: 1,
			nodata: None,
			pools: RasterPools::default(),
			full_footprint: Footprint::new(0.0, 0.0, 1.0, -1.0, 100, 100),
			cache_tile_shape: (10, 10),
			source: RasterSource::Stored,
		}
	}

	#[test]
	fn distinct_uids_are_monotonic() {
		let a = RasterUid::next();
		let b = RasterUid::next();
		assert!(b.raw() > a.raw());
	}

	#[test]
	fn cache_index_roundtrips_tile_origin() {
		let d = descriptor();
		let fp = Footprint::new(20.0, -30.0, 1.0, -1.0, 10, 10);
		let idx = d.cache_index_for(&fp);
		let back = d.cache_tile_footprint(idx);
		assert_eq!(back.origin(), (20.0, -30.0));
		assert_eq!(back.shape(), (10, 10));
	}
}
