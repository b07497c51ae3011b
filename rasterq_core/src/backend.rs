//! External collaborator traits: the raster backend, and the user-supplied
//! compute/merge hooks for recipe rasters.
//!
//! These are the seams spec.md §6 calls "External Interfaces" — everything
//! on this page is implemented by the caller of `rasterq_core`, not by the
//! core itself, the same boundary `versatiles_pipeline::operations::read`
//! draws around `RasterSource`/GDAL.

use crate::array::PixelArray;
use crate::footprint::Footprint;
use crate::raster::RasterUid;
use std::collections::HashMap;

/// Storage backend for cache tiles: reads, writes, and deletes raw
/// footprint-addressed arrays. Must be safe to call from a pool worker
/// thread — `RasterBackend` methods are synchronous and may block.
pub trait RasterBackend: Send + Sync {
	fn read(&self, cache_fp: &Footprint, window: &Footprint) -> anyhow::Result<PixelArray>;
	fn write(&self, cache_fp: &Footprint, array: &PixelArray) -> anyhow::Result<()>;
	fn delete(&self, path: &str) -> anyhow::Result<()>;
	fn driver_name(&self) -> &str;
	fn path(&self) -> &str;
}

/// Per-primitive footprints a recipe's `Computer` gathered before invoking
/// `compute_array`, keyed by the primitive's `RasterUid`.
pub type PrimitiveFootprints = HashMap<RasterUid, Footprint>;

/// Per-primitive arrays gathered for the same call, keyed the same way.
pub type PrimitiveArrays = HashMap<RasterUid, PixelArray>;

/// One array per contributing cache footprint, handed to a `MergeHook`.
pub type ArrayPerFootprint = HashMap<Footprint, PixelArray>;

/// Opaque handle a compute/merge hook may use to issue further sub-queries
/// (e.g. a recipe that needs data outside its declared primitives). Kept
/// intentionally minimal; `rasterq::Dataset` is the concrete type behind
/// this in the facade crate.
pub trait Facade: Send + Sync {
	fn uid(&self) -> RasterUid;
}

/// User-supplied compute function for a recipe raster, invoked on the
/// raster's `computation_pool` (or inline if none is configured).
pub trait ComputeHook: Send + Sync {
	fn compute_array(
		&self,
		fp: &Footprint,
		primitive_fps: &PrimitiveFootprints,
		primitive_arrays: &PrimitiveArrays,
		facade: Option<&dyn Facade>,
	) -> anyhow::Result<PixelArray>;
}

/// User-supplied merge function invoked when multiple cache-tile
/// contributions must be combined into one cache tile's array.
pub trait MergeHook: Send + Sync {
	fn merge_arrays(&self, cache_fp: &Footprint, array_per_fp: &ArrayPerFootprint, facade: Option<&dyn Facade>) -> anyhow::Result<PixelArray>;
}

/// The default merge behavior for stored (non-recipe) rasters with a single
/// contributing footprint: forward it untouched. Matches spec.md §4.5 case
/// 1 ("single input whose footprint equals cache_fp: forward directly").
pub struct IdentityMerge;

impl MergeHook for IdentityMerge {
	fn merge_arrays(&self, cache_fp: &Footprint, array_per_fp: &ArrayPerFootprint, _facade: Option<&dyn Facade>) -> anyhow::Result<PixelArray> {
		array_per_fp
			.get(cache_fp)
			.cloned()
			.ok_or_else(|| anyhow::anyhow!("IdentityMerge expected a single contribution matching cache_fp, found none"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::array::DType;

	#[test]
	fn identity_merge_forwards_matching_footprint() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let arr = PixelArray::filled(4, 4, 1, 2.0, DType::F32);
		let mut map = ArrayPerFootprint::new();
		map.insert(fp, arr.clone());
		let merged = IdentityMerge.merge_arrays(&fp, &map, None).unwrap();
		assert!(merged.same_buffer(&arr));
	}

	#[test]
	fn identity_merge_fails_without_match() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let other = Footprint::new(10.0, -10.0, 1.0, -1.0, 4, 4);
		let arr = PixelArray::filled(4, 4, 1, 2.0, DType::F32);
		let mut map = ArrayPerFootprint::new();
		map.insert(other, arr);
		assert!(IdentityMerge.merge_arrays(&fp, &map, None).is_err());
	}
}
