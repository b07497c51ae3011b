//! Scenario-level integration tests exercising the whole actor graph
//! through `SchedulerBuilder`/`Scheduler` rather than one actor at a time.
//! Mirrors the teacher's own top-level `tests/` layout
//! (`versatiles/tests/server.rs` drives the whole server the same way).

use dashmap::DashMap;
use rasterq_core::array::{DType, PixelArray};
use rasterq_core::backend::{ArrayPerFootprint, ComputeHook, Facade, IdentityMerge, PrimitiveArrays, PrimitiveFootprints, RasterBackend};
use rasterq_core::footprint::Footprint;
use rasterq_core::query::{Interpolation, ProdIdx, QueryOutputItem};
use rasterq_core::raster::{PrimitiveRef, RasterDescriptor, RasterPools, RasterSource, RasterUid};
use rasterq_core::resample::ResamplerKernel;
use rasterq_core::scheduler::{QueryOutputReceiver, SchedulerBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct InMemoryBackend {
	tiles: DashMap<Footprint, PixelArray>,
	reads: AtomicUsize,
}

impl InMemoryBackend {
	fn new() -> Self {
		Self { tiles: DashMap::new(), reads: AtomicUsize::new(0) }
	}
}

impl RasterBackend for InMemoryBackend {
	fn read(&self, cache_fp: &Footprint, _window: &Footprint) -> anyhow::Result<PixelArray> {
		self.reads.fetch_add(1, Ordering::SeqCst);
		self.tiles.get(cache_fp).map(|r| r.value().clone()).ok_or_else(|| anyhow::anyhow!("no tile at {cache_fp:?}"))
	}

	fn write(&self, cache_fp: &Footprint, array: &PixelArray) -> anyhow::Result<()> {
		self.tiles.insert(*cache_fp, array.clone());
		Ok(())
	}

	fn delete(&self, _path: &str) -> anyhow::Result<()> {
		Ok(())
	}

	fn driver_name(&self) -> &str {
		"memory"
	}

	fn path(&self) -> &str {
		"memory://scenario"
	}
}

/// Resample is never exercised by these scenarios (every query's footprints
/// already land on the raster's native grid), so any call into this kernel
/// is a test-design bug.
struct UnreachableKernel;

impl ResamplerKernel for UnreachableKernel {
	fn remap(&self, _src_fp: &Footprint, _dst_fp: &Footprint, _array: &PixelArray, _src_nodata: Option<f64>, _dst_nodata: Option<f64>, _interpolation: Interpolation) -> anyhow::Result<PixelArray> {
		unreachable!("these scenarios never need resampling")
	}
}

async fn recv_timeout(rx: &mut QueryOutputReceiver) -> QueryOutputItem {
	tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.expect("no result within timeout, likely a deadlock").expect("output channel closed early")
}

fn stored_descriptor(fp: Footprint, tile_shape: (u32, u32)) -> Arc<RasterDescriptor> {
	Arc::new(RasterDescriptor {
		uid: RasterUid::next(),
		dtype: DType::F32,
		channel_count: 1,
		nodata: Some(-1.0),
		pools: RasterPools::default(),
		full_footprint: fp,
		cache_tile_shape: tile_shape,
		source: RasterSource::Stored,
	})
}

/// Scenario 1 (Classic read): a single query spanning the raster's whole
/// extent returns exactly the pixels written through the backend.
#[tokio::test(flavor = "multi_thread")]
async fn classic_read_returns_exact_backing_buffer() {
	let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 16, 16);
	let backend = Arc::new(InMemoryBackend::new());
	let mut data = ndarray::Array3::<f64>::zeros((16, 16, 1));
	for r in 0..16 {
		for c in 0..16 {
			data[[r, c, 0]] = (r * 16 + c) as f64;
		}
	}
	let original = PixelArray::new(data, DType::F32);
	backend.write(&fp, &original).unwrap();

	let descriptor = stored_descriptor(fp, (16, 16));
	let mut builder = SchedulerBuilder::new();
	builder.register_raster(Arc::clone(&descriptor), backend, Arc::new(UnreachableKernel));
	let scheduler = builder.spawn();

	let mut rx = scheduler.submit_query(&descriptor, &[fp], vec![1], DType::F32, Some(-1.0), Interpolation::NearestNeighbor, 5).unwrap();
	let (prod_idx, result) = recv_timeout(&mut rx).await;
	assert_eq!(prod_idx, ProdIdx(0));
	assert_eq!(result.unwrap().data(), original.data());

	scheduler.shutdown();
}

/// Scenario 2 (Tiled async read): stitching every tile of a 3x3 tiling back
/// together reproduces the same pixels as a single full-extent read.
#[tokio::test(flavor = "multi_thread")]
async fn tiled_read_stitches_to_match_full_read() {
	let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 9, 9);
	let backend = Arc::new(InMemoryBackend::new());
	let mut data = ndarray::Array3::<f64>::zeros((9, 9, 1));
	for r in 0..9 {
		for c in 0..9 {
			data[[r, c, 0]] = (r * 9 + c) as f64;
		}
	}
	let original = PixelArray::new(data, DType::F32);
	backend.write(&fp, &original).unwrap();

	let descriptor = stored_descriptor(fp, (9, 9));
	let mut builder = SchedulerBuilder::new();
	builder.register_raster(Arc::clone(&descriptor), backend, Arc::new(UnreachableKernel));
	let scheduler = builder.spawn();

	let tiles = fp.tile_grid(3, 3);
	assert_eq!(tiles.len(), 9);
	let mut rx = scheduler.submit_query(&descriptor, &tiles, vec![1], DType::F32, Some(-1.0), Interpolation::NearestNeighbor, 9).unwrap();

	let mut stitched = ndarray::Array3::<f64>::zeros((9, 9, 1));
	for _ in 0..tiles.len() {
		let (prod_idx, result) = recv_timeout(&mut rx).await;
		let array = result.unwrap();
		let tile_fp = tiles[prod_idx.0 as usize];
		let (row_range, col_range) = tile_fp.slice_in(&fp);
		stitched.slice_mut(ndarray::s![row_range, col_range, ..]).assign(array.data());
	}
	assert_eq!(stitched, *original.data());

	scheduler.shutdown();
}

/// Crops the interior 4x4 region out of a 6x6 primitive array, standing in
/// for a 3x3-kernel slope computation over a dilated elevation window.
struct DilatedCropCompute;

impl ComputeHook for DilatedCropCompute {
	fn compute_array(&self, _fp: &Footprint, _primitive_fps: &PrimitiveFootprints, primitive_arrays: &PrimitiveArrays, _facade: Option<&dyn Facade>) -> anyhow::Result<PixelArray> {
		let elevation = primitive_arrays.values().next().expect("slopes declares exactly one primitive");
		let cropped = elevation.data().slice(ndarray::s![1..5, 1..5, ..]).to_owned();
		Ok(PixelArray::new(cropped, elevation.dtype()))
	}
}

/// Scenario 4 (Recipe cascade): a `slopes` recipe over an `elevation`
/// primitive dilates its sub-request by one pixel per side
/// (`convert_fp = |fp| fp.dilate(1)`), computes from the dilated window, and
/// yields an array shaped like the original (undilated) request.
#[tokio::test(flavor = "multi_thread")]
async fn recipe_cascade_dilates_primitive_footprint_and_crops_result() {
	let elevation_fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 6, 6);
	let elevation_backend = Arc::new(InMemoryBackend::new());
	let mut data = ndarray::Array3::<f64>::zeros((6, 6, 1));
	for r in 0..6 {
		for c in 0..6 {
			data[[r, c, 0]] = (r * 6 + c) as f64;
		}
	}
	elevation_backend.write(&elevation_fp, &PixelArray::new(data.clone(), DType::F32)).unwrap();
	let elevation_desc = stored_descriptor(elevation_fp, (6, 6));

	let slopes_fp = Footprint::new(1.0, -1.0, 1.0, -1.0, 4, 4);
	assert_eq!(slopes_fp.dilate(1), elevation_fp, "test fixture must dilate to elevation's exact extent");

	let primitive = PrimitiveRef { uid: elevation_desc.uid, convert_fp: Arc::new(|fp: &Footprint| fp.dilate(1)) };
	let slopes_desc = Arc::new(RasterDescriptor {
		uid: RasterUid::next(),
		dtype: DType::F32,
		channel_count: 1,
		nodata: Some(-1.0),
		pools: RasterPools::default(),
		full_footprint: slopes_fp,
		cache_tile_shape: (4, 4),
		source: RasterSource::Recipe { compute: Arc::new(DilatedCropCompute), merge: Arc::new(IdentityMerge), primitives: vec![primitive] },
	});
	let slopes_backend = Arc::new(InMemoryBackend::new());

	let mut builder = SchedulerBuilder::new();
	builder.register_raster(elevation_desc, elevation_backend, Arc::new(UnreachableKernel));
	builder.register_raster(Arc::clone(&slopes_desc), slopes_backend, Arc::new(UnreachableKernel));
	let scheduler = builder.spawn();

	let mut rx = scheduler.submit_query(&slopes_desc, &[slopes_fp], vec![1], DType::F32, Some(-1.0), Interpolation::NearestNeighbor, 5).unwrap();
	let (_, result) = recv_timeout(&mut rx).await;
	let array = result.unwrap();
	assert_eq!(array.shape(), (4, 4, 1));
	let expected = data.slice(ndarray::s![1..5, 1..5, ..]).to_owned();
	assert_eq!(array.data(), &expected);

	scheduler.shutdown();
}

/// Forwards the single primitive array untouched, standing in for a recipe
/// whose primitive already matches the requested grid 1:1.
struct IdentityCompute;

impl ComputeHook for IdentityCompute {
	fn compute_array(&self, _fp: &Footprint, _primitive_fps: &PrimitiveFootprints, primitive_arrays: &PrimitiveArrays, _facade: Option<&dyn Facade>) -> anyhow::Result<PixelArray> {
		Ok(primitive_arrays.values().next().expect("one primitive").clone())
	}
}

/// Scenario 5 (Concurrent queries): two independent queries against two
/// different rasters (one stored, one a recipe depending on the other) make
/// progress together on the same scheduler without one blocking the other.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_queries_on_elevation_and_recipe_do_not_deadlock() {
	let elevation_fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
	let elevation_backend = Arc::new(InMemoryBackend::new());
	let mut data = ndarray::Array3::<f64>::zeros((4, 4, 1));
	for r in 0..4 {
		for c in 0..4 {
			data[[r, c, 0]] = (r * 4 + c) as f64;
		}
	}
	elevation_backend.write(&elevation_fp, &PixelArray::new(data, DType::F32)).unwrap();
	let elevation_desc = stored_descriptor(elevation_fp, (4, 4));

	let primitive = PrimitiveRef { uid: elevation_desc.uid, convert_fp: Arc::new(|fp: &Footprint| *fp) };
	let slopes_desc = Arc::new(RasterDescriptor {
		uid: RasterUid::next(),
		dtype: DType::F32,
		channel_count: 1,
		nodata: Some(-1.0),
		pools: RasterPools::default(),
		full_footprint: elevation_fp,
		cache_tile_shape: (4, 4),
		source: RasterSource::Recipe { compute: Arc::new(IdentityCompute), merge: Arc::new(IdentityMerge), primitives: vec![primitive] },
	});
	let slopes_backend = Arc::new(InMemoryBackend::new());

	let mut builder = SchedulerBuilder::new();
	builder.register_raster(Arc::clone(&elevation_desc), elevation_backend, Arc::new(UnreachableKernel));
	builder.register_raster(Arc::clone(&slopes_desc), slopes_backend, Arc::new(UnreachableKernel));
	let scheduler = builder.spawn();

	let tiles = elevation_fp.tile_grid(2, 2);
	let mut elevation_rx = scheduler.submit_query(&elevation_desc, &tiles, vec![1], DType::F32, Some(-1.0), Interpolation::NearestNeighbor, 4).unwrap();
	let mut slopes_rx = scheduler.submit_query(&slopes_desc, &tiles, vec![1], DType::F32, Some(-1.0), Interpolation::NearestNeighbor, 4).unwrap();

	for _ in 0..tiles.len() {
		let (e_idx, e_result) = recv_timeout(&mut elevation_rx).await;
		let (s_idx, s_result) = recv_timeout(&mut slopes_rx).await;
		assert_eq!(e_idx, s_idx);
		assert_eq!(e_result.unwrap().data(), s_result.unwrap().data());
	}

	scheduler.shutdown();
}

/// Scenario 6 (Backpressure): a tight `max_queue_size` still delivers every
/// tile, in request order, one at a time, instead of stalling or reordering.
#[tokio::test(flavor = "multi_thread")]
async fn small_max_queue_size_still_delivers_every_tile_in_order() {
	let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 9, 9);
	let backend = Arc::new(InMemoryBackend::new());
	backend.write(&fp, &PixelArray::filled(9, 9, 1, 3.0, DType::F32)).unwrap();
	let descriptor = stored_descriptor(fp, (9, 9));

	let mut builder = SchedulerBuilder::new();
	builder.register_raster(Arc::clone(&descriptor), backend, Arc::new(UnreachableKernel));
	let scheduler = builder.spawn();

	let tiles = fp.tile_grid(3, 3);
	let mut rx = scheduler.submit_query(&descriptor, &tiles, vec![1], DType::F32, Some(-1.0), Interpolation::NearestNeighbor, 1).unwrap();

	for expected_idx in 0..tiles.len() {
		let (prod_idx, result) = recv_timeout(&mut rx).await;
		assert_eq!(prod_idx, ProdIdx(expected_idx as u32));
		assert!(result.unwrap().data().iter().all(|&v| v == 3.0));
		// A real backpressure deadlock would show up as `recv_timeout` timing
		// out here since nothing else drives the queue forward between pulls.
	}

	scheduler.shutdown();
}

/// Scenario 6, depth variant: with nobody draining the output channel, the
/// scheduler must not race ahead and finish every tile anyway — ready-but-
/// unread tiles are bounded the same as in-flight ones (spec.md §8).
#[tokio::test(flavor = "multi_thread")]
async fn unread_tiles_stay_bounded_when_the_consumer_is_slow() {
	let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 9, 9);
	let backend = Arc::new(InMemoryBackend::new());
	backend.write(&fp, &PixelArray::filled(9, 9, 1, 3.0, DType::F32)).unwrap();
	let descriptor = stored_descriptor(fp, (9, 9));
	let reads = Arc::clone(&backend);

	let mut builder = SchedulerBuilder::new();
	builder.register_raster(Arc::clone(&descriptor), backend, Arc::new(UnreachableKernel));
	let scheduler = builder.spawn();

	let tiles = fp.tile_grid(3, 3);
	assert_eq!(tiles.len(), 9);
	let mut rx = scheduler.submit_query(&descriptor, &tiles, vec![1], DType::F32, Some(-1.0), Interpolation::NearestNeighbor, 1).unwrap();

	// Give the scheduler every chance to race ahead before a single tile is
	// ever pulled off the channel.
	tokio::time::sleep(Duration::from_millis(200)).await;
	let stalled_at = reads.reads.load(Ordering::SeqCst);
	assert!(stalled_at < tiles.len(), "consumer hasn't read anything yet, but {stalled_at}/{} tiles were already produced", tiles.len());

	for expected_idx in 0..tiles.len() {
		let (prod_idx, result) = recv_timeout(&mut rx).await;
		assert_eq!(prod_idx, ProdIdx(expected_idx as u32));
		assert!(result.unwrap().data().iter().all(|&v| v == 3.0));
	}
	assert_eq!(reads.reads.load(Ordering::SeqCst), tiles.len(), "every tile eventually gets read once the consumer keeps up");

	scheduler.shutdown();
}
