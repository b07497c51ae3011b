//! Public-facing dataset facade (spec.md §6 "Public query surface"): the
//! thing a caller actually constructs and drives, wrapping
//! `rasterq_core::SchedulerBuilder`/`Scheduler` the way `buzzard`'s
//! `DataSource` wraps its scheduler and registered rasters
//! (`examples/original_source/buzzard/doc/part1.py`: `ds.close()` tears
//! everything down, `r.get_data`/`r.iter_data` are per-raster).

use rasterq_core::array::PixelArray;
use rasterq_core::backend::RasterBackend;
use rasterq_core::error::QueryError;
use rasterq_core::footprint::Footprint;
use rasterq_core::pool::{PoolId, WorkerPool};
use rasterq_core::query::Interpolation;
use rasterq_core::raster::{RasterDescriptor, RasterUid};
use rasterq_core::resample::ResamplerKernel;
use rasterq_core::scheduler::{QueryOutputReceiver, Scheduler, SchedulerBuilder};
use std::collections::HashMap;
use std::sync::Arc;

/// Assembles a [`Dataset`]'s raster set before the scheduler starts,
/// mirroring `rasterq_core::SchedulerBuilder` one level up: it additionally
/// remembers each raster's name so `get_data`/`iter_data` can look up its
/// descriptor by the key a caller actually wants to type, instead of a
/// `RasterUid`.
pub struct DatasetBuilder {
	inner: SchedulerBuilder,
	named: HashMap<String, Arc<RasterDescriptor>>,
}

impl Default for DatasetBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl DatasetBuilder {
	#[must_use]
	pub fn new() -> Self {
		Self { inner: SchedulerBuilder::new(), named: HashMap::new() }
	}

	#[must_use]
	pub fn register_pool(&mut self, pool: Arc<dyn WorkerPool>) -> PoolId {
		self.inner.register_pool(pool)
	}

	/// Registers one raster under `name`. Panics if `name` was already
	/// registered in this builder — a programmer error, not a runtime
	/// condition a caller should need to handle.
	pub fn register_raster(&mut self, name: impl Into<String>, descriptor: Arc<RasterDescriptor>, backend: Arc<dyn RasterBackend>, kernel: Arc<dyn ResamplerKernel>) -> RasterUid {
		let name = name.into();
		let uid = self.inner.register_raster(Arc::clone(&descriptor), backend, kernel);
		assert!(self.named.insert(name.clone(), descriptor).is_none(), "raster name '{name}' already registered");
		uid
	}

	/// Starts the scheduler and returns the caller-facing handle. Mirrors
	/// `rasterq_core::SchedulerBuilder::spawn`: registration is closed from
	/// this point on.
	#[must_use]
	pub fn open(self) -> Dataset {
		Dataset { scheduler: self.inner.spawn(), rasters: self.named }
	}
}

/// The caller-facing handle: registration is closed and the scheduler's
/// dispatch loop is live on its own task. Dropping a `Dataset` does not tear
/// it down — call [`Dataset::close`] explicitly, matching
/// `DataSource.close()`'s idempotent-teardown contract (spec.md §6 "Exit
/// conditions").
pub struct Dataset {
	scheduler: Scheduler,
	rasters: HashMap<String, Arc<RasterDescriptor>>,
}

impl Dataset {
	fn descriptor(&self, name: &str) -> Result<&Arc<RasterDescriptor>, QueryError> {
		self.rasters.get(name).ok_or_else(|| QueryError::invalid_input(format!("no such raster registered: {name}")))
	}

	/// Blocking single-footprint query (spec.md §6 `get_data(fp, band=-1)`).
	/// An empty `band_ids` reads every band the raster carries, in order —
	/// the Rust reading of buzzard's `band=-1` sentinel.
	pub async fn get_data(&self, name: &str, fp: Footprint, band_ids: &[u32]) -> Result<PixelArray, QueryError> {
		let mut it = self.iter_data(name, vec![fp], band_ids, 1)?;
		it.next_async().await.ok_or_else(|| QueryError::programmer("get_data produced no tile"))?
	}

	/// Lazy, ordered, non-restartable iterator over `footprints`, bounded by
	/// `max_queue_size` in-flight production tiles (spec.md §6
	/// `iter_data(footprints, band=-1, max_queue_size=5)`).
	///
	/// # Errors
	/// Returns `QueryError::InvalidInput` if `name` isn't registered or
	/// `footprints`/`band_ids` don't form a valid query.
	pub fn iter_data(&self, name: &str, footprints: Vec<Footprint>, band_ids: &[u32], max_queue_size: usize) -> Result<QueryIter, QueryError> {
		let descriptor = self.descriptor(name)?;
		let band_ids = if band_ids.is_empty() { all_bands(descriptor) } else { band_ids.to_vec() };
		let rx = self
			.scheduler
			.submit_query(descriptor, &footprints, band_ids, descriptor.dtype, descriptor.nodata, Interpolation::NearestNeighbor, max_queue_size)
			.map_err(|e| QueryError::invalid_input(e.to_string()))?;
		Ok(QueryIter { rx })
	}

	/// Idempotent teardown: broadcasts `Die` to every actor. Matches
	/// `DataSource.close()` — never returns an error (spec.md §6).
	pub fn close(&self) {
		self.scheduler.shutdown();
	}
}

fn all_bands(descriptor: &RasterDescriptor) -> Vec<u32> {
	(1..=descriptor.channel_count as u32).collect()
}

/// The iterator `iter_data` returns: pulls production tiles off the
/// scheduler's output channel in `prod_idx` order, blocking the calling
/// thread when nothing is ready yet. Requires a multi-thread Tokio runtime
/// (`block_in_place` needs a worker thread free to hand off to) — the same
/// requirement this crate's own scheduler integration tests already carry.
pub struct QueryIter {
	rx: QueryOutputReceiver,
}

impl QueryIter {
	async fn next_async(&mut self) -> Option<Result<PixelArray, QueryError>> {
		self.rx.recv().await.map(|(_, result)| result)
	}
}

impl Iterator for QueryIter {
	type Item = Result<PixelArray, QueryError>;

	fn next(&mut self) -> Option<Self::Item> {
		tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.next_async()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kernel::NearestNeighborKernel;
	use crate::mock_backend::MockBackend;
	use crate::pool::ThreadPool;
	use rasterq_core::array::DType;
	use rasterq_core::raster::{RasterPools, RasterSource};

	fn dataset_with_one_stored_tile(fp: Footprint, value: f64) -> Dataset {
		let backend = Arc::new(MockBackend::new("mock://test"));
		backend.seed(fp, PixelArray::filled(fp.rows(), fp.cols(), 1, value, DType::F32));

		let descriptor = Arc::new(RasterDescriptor {
			uid: RasterUid::next(),
			dtype: DType::F32,
			channel_count: 1,
			nodata: Some(-1.0),
			pools: RasterPools::default(),
			full_footprint: fp,
			cache_tile_shape: fp.shape(),
			source: RasterSource::Stored,
		});

		let mut builder = DatasetBuilder::new();
		builder.register_raster("elevation", descriptor, backend, Arc::new(NearestNeighborKernel));
		builder.open()
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn get_data_returns_the_seeded_tile() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let ds = dataset_with_one_stored_tile(fp, 42.0);
		let array = ds.get_data("elevation", fp, &[]).await.unwrap();
		assert_eq!(array.shape(), (4, 4, 1));
		assert!(array.data().iter().all(|&v| v == 42.0));
		ds.close();
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn get_data_on_unknown_raster_is_invalid_input() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let ds = dataset_with_one_stored_tile(fp, 1.0);
		let err = ds.get_data("does-not-exist", fp, &[]).await.unwrap_err();
		assert!(matches!(err, QueryError::InvalidInput(_)));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn iter_data_yields_tiles_in_request_order() {
		let full = Footprint::new(0.0, 0.0, 1.0, -1.0, 8, 4);
		let backend = Arc::new(MockBackend::new("mock://test"));
		let top = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let bottom = Footprint::new(0.0, -4.0, 1.0, -1.0, 4, 4);
		backend.seed(top, PixelArray::filled(4, 4, 1, 1.0, DType::F32));
		backend.seed(bottom, PixelArray::filled(4, 4, 1, 2.0, DType::F32));

		let descriptor = Arc::new(RasterDescriptor {
			uid: RasterUid::next(),
			dtype: DType::F32,
			channel_count: 1,
			nodata: Some(-1.0),
			pools: RasterPools::default(),
			full_footprint: full,
			cache_tile_shape: (4, 4),
			source: RasterSource::Stored,
		});

		let mut builder = DatasetBuilder::new();
		builder.register_pool(Arc::new(ThreadPool::new(2)));
		builder.register_raster("elevation", descriptor, backend, Arc::new(NearestNeighborKernel));
		let ds = builder.open();

		let results: Vec<_> = ds.iter_data("elevation", vec![top, bottom], &[], 5).unwrap().collect();
		assert_eq!(results.len(), 2);
		assert_eq!(results[0].as_ref().unwrap().data()[[0, 0, 0]], 1.0);
		assert_eq!(results[1].as_ref().unwrap().data()[[0, 0, 0]], 2.0);
		ds.close();
	}
}
