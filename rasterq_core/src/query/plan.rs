//! Query planning: decomposing production footprints into cache-tile
//! reads, sample footprints, and independently-remapped resample
//! footprints (spec.md §3 "Query", §4.7-4.8).

use crate::array::DType;
use crate::footprint::Footprint;
use crate::query::{canonicalize_band_ids, Interpolation, ProdInfo, ProductionPlan, QueryId, QueryInfo};
use crate::raster::RasterDescriptor;
use std::collections::{HashMap, HashSet};

/// Build a `QueryInfo` for one user call against `raster`.
///
/// # Errors
/// Returns an error if `prod_fps` or `band_ids` is empty, since both are
/// user-input-invalid conditions surfaced synchronously (spec.md §7).
pub fn plan_query(
	raster: &RasterDescriptor,
	prod_fps: &[Footprint],
	band_ids: Vec<u32>,
	dst_dtype: DType,
	dst_nodata: Option<f64>,
	interpolation: Interpolation,
	max_queue_size: usize,
) -> anyhow::Result<QueryInfo> {
	if prod_fps.is_empty() {
		anyhow::bail!("query must request at least one production footprint");
	}
	if band_ids.is_empty() {
		anyhow::bail!("query must request at least one band");
	}

	let unique_band_ids = canonicalize_band_ids(&band_ids);
	let prod = prod_fps.iter().map(|fp| plan_production(raster, *fp)).collect();

	Ok(QueryInfo {
		id: QueryId::next(),
		raster_uid: raster.uid,
		prod,
		band_ids,
		unique_band_ids,
		dst_dtype,
		dst_nodata,
		interpolation,
		max_queue_size,
		origin: None,
	})
}

fn plan_production(raster: &RasterDescriptor, fp: Footprint) -> ProdInfo {
	let same_grid = fp.same_grid(&raster.full_footprint);

	if !fp.share_area(&raster.full_footprint) {
		return outside_bounds_plan(fp, same_grid);
	}

	if same_grid {
		return plan_same_grid_production(raster, fp, same_grid);
	}
	plan_cross_grid_production(raster, fp, same_grid)
}

/// `fp` sits on the raster's own grid: decompose it into the exact
/// sub-footprint of every overlapping cache tile, one resample dependency
/// per tile (spec.md §4.8 "same grid" case — a direct slice, no kernel).
fn plan_same_grid_production(raster: &RasterDescriptor, fp: Footprint, same_grid: bool) -> ProdInfo {
	let (tile_rows, tile_cols) = raster.cache_tile_shape;
	let grid_cols = raster.full_footprint.cols().div_ceil(tile_cols);
	let grid_rows = raster.full_footprint.rows().div_ceil(tile_rows);

	let mut cache_fps = Vec::new();
	let mut resample_fps = Vec::new();
	let mut resample_cache_deps_fps = HashMap::new();
	let mut resample_sample_dep_fp = HashMap::new();

	for row in 0..grid_rows {
		for col in 0..grid_cols {
			let index = crate::raster::CacheIndex(u64::from(row) * u64::from(grid_cols) + u64::from(col));
			let cache_fp = raster.cache_tile_footprint(index);
			let Some(overlap) = fp.intersection(&cache_fp) else {
				continue;
			};
			cache_fps.push(cache_fp);
			resample_fps.push(overlap);
			let mut deps = HashSet::new();
			deps.insert(cache_fp);
			resample_cache_deps_fps.insert(overlap, deps);
			resample_sample_dep_fp.insert(overlap, Some(overlap));
		}
	}

	if cache_fps.is_empty() {
		return outside_bounds_plan(fp, same_grid);
	}

	let sample_fp = cache_fps.iter().copied().reduce(|a, b| union(&a, &b));

	ProdInfo {
		fp,
		plan: ProductionPlan { cache_fps, sample_fp, resample_fps, resample_cache_deps_fps, resample_sample_dep_fp, share_area: true, same_grid },
	}
}

/// `fp` sits on a different grid than the raster (a genuine downsample,
/// upsample, or reprojection): world-space overlap decides which cache
/// tiles contribute, since `Footprint::intersection` only works within one
/// grid. The whole of `fp` is a single resample dependency sampled from
/// every overlapping cache tile's combined extent, handed to
/// `Resampler`'s interpolation branch (spec.md §4.8 "share_area &&
/// !same_grid").
fn plan_cross_grid_production(raster: &RasterDescriptor, fp: Footprint, same_grid: bool) -> ProdInfo {
	let (tile_rows, tile_cols) = raster.cache_tile_shape;
	let grid_cols = raster.full_footprint.cols().div_ceil(tile_cols);
	let grid_rows = raster.full_footprint.rows().div_ceil(tile_rows);

	let mut cache_fps = Vec::new();
	for row in 0..grid_rows {
		for col in 0..grid_cols {
			let index = crate::raster::CacheIndex(u64::from(row) * u64::from(grid_cols) + u64::from(col));
			let cache_fp = raster.cache_tile_footprint(index);
			if fp.share_area(&cache_fp) {
				cache_fps.push(cache_fp);
			}
		}
	}

	if cache_fps.is_empty() {
		return outside_bounds_plan(fp, same_grid);
	}

	let sample_fp = cache_fps.iter().copied().reduce(|a, b| union(&a, &b)).expect("non-empty cache_fps");

	let mut resample_cache_deps_fps = HashMap::new();
	resample_cache_deps_fps.insert(fp, cache_fps.iter().copied().collect());
	let mut resample_sample_dep_fp = HashMap::new();
	resample_sample_dep_fp.insert(fp, Some(sample_fp));

	ProdInfo {
		fp,
		plan: ProductionPlan {
			cache_fps,
			sample_fp: Some(sample_fp),
			resample_fps: vec![fp],
			resample_cache_deps_fps,
			resample_sample_dep_fp,
			share_area: true,
			same_grid,
		},
	}
}

/// `fp` doesn't touch the raster's extent at all: no cache reads, a single
/// nodata-filled resample dependency (spec.md §4.8 "!share_area").
fn outside_bounds_plan(fp: Footprint, same_grid: bool) -> ProdInfo {
	ProdInfo {
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
			same_grid,
		},
	}
}

/// Smallest same-grid footprint covering both `a` and `b`'s extents.
fn union(a: &Footprint, b: &Footprint) -> Footprint {
	debug_assert!(a.same_grid(b));
	let (ax, ay) = a.origin();
	let (bx, by) = b.origin();
	let (px, py) = a.pixel_size();
	let a_end_x = ax + px * f64::from(a.cols());
	let a_end_y = ay + py * f64::from(a.rows());
	let b_end_x = bx + px * f64::from(b.cols());
	let b_end_y = by + py * f64::from(b.rows());

	let origin_x = if px >= 0.0 { ax.min(bx) } else { ax.max(bx) };
	let origin_y = if py >= 0.0 { ay.min(by) } else { ay.max(by) };
	let end_x = if px >= 0.0 { a_end_x.max(b_end_x) } else { a_end_x.min(b_end_x) };
	let end_y = if py >= 0.0 { a_end_y.max(b_end_y) } else { a_end_y.min(b_end_y) };

	let cols = ((end_x - origin_x) / px).abs().round() as u32;
	let rows = ((end_y - origin_y) / py).abs().round() as u32;
	Footprint::new(origin_x, origin_y, px, py, rows, cols)
}
