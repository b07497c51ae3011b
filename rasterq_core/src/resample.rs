//! The interpolation kernel external collaborator (spec.md §1 Non-goals
//! "the remap algorithm itself"; §4.8 `Resampler`).
//!
//! `rasterq_core` threads an [`Interpolation`] tag from query planning all
//! the way to this boundary and never implements a kernel itself — the
//! caller supplies one, the same seam `backend::RasterBackend` and
//! `backend::ComputeHook`/`MergeHook` draw around storage and computation.

use crate::array::PixelArray;
use crate::footprint::Footprint;
use crate::query::Interpolation;

/// Remaps `array` (on `src_fp`'s grid) onto `dst_fp`'s grid.
///
/// Implementations must return an array shaped `(dst_fp.rows, dst_fp.cols,
/// array.shape().2)` with `src_nodata` pixels replaced by `dst_nodata` in
/// the output.
pub trait ResamplerKernel: Send + Sync {
	fn remap(
		&self,
		src_fp: &Footprint,
		dst_fp: &Footprint,
		array: &PixelArray,
		src_nodata: Option<f64>,
		dst_nodata: Option<f64>,
		interpolation: Interpolation,
	) -> anyhow::Result<PixelArray>;
}
