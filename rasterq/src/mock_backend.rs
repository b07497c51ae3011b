//! In-memory [`RasterBackend`] standing in for a real file driver (spec.md
//! §1 Non-goals: file drivers are an external collaborator). Backs the CLI's
//! `mock://` data source and every integration test in this workspace — the
//! same role `versatiles_container`'s mock container plays in the teacher
//! crate family's test suite.

use dashmap::DashMap;
use rasterq_core::array::PixelArray;
use rasterq_core::backend::RasterBackend;
use rasterq_core::footprint::Footprint;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keyed by cache-tile footprint rather than a path, since there is no file
/// system underneath: two `Footprint`s are only `==` when grid and extent
/// both match, which is exactly the identity a cache tile needs.
pub struct MockBackend {
	path: String,
	tiles: DashMap<Footprint, PixelArray>,
	reads: AtomicUsize,
}

impl MockBackend {
	#[must_use]
	pub fn new(path: impl Into<String>) -> Self {
		Self { path: path.into(), tiles: DashMap::new(), reads: AtomicUsize::new(0) }
	}

	/// Pre-seed a cache tile, bypassing `Writer` entirely — used by tests and
	/// by the CLI's synthetic `mock://` rasters that need data to already
	/// exist before any query runs.
	pub fn seed(&self, cache_fp: Footprint, array: PixelArray) {
		self.tiles.insert(cache_fp, array);
	}

	#[must_use]
	pub fn tile_count(&self) -> usize {
		self.tiles.len()
	}

	/// Number of completed `read` calls so far, used by backpressure tests
	/// to observe how far the scheduler has raced ahead of a slow consumer.
	#[must_use]
	pub fn read_count(&self) -> usize {
		self.reads.load(Ordering::SeqCst)
	}
}

impl RasterBackend for MockBackend {
	fn read(&self, cache_fp: &Footprint, _window: &Footprint) -> anyhow::Result<PixelArray> {
		self.reads.fetch_add(1, Ordering::SeqCst);
		self.tiles.get(cache_fp).map(|r| r.value().clone()).ok_or_else(|| anyhow::anyhow!("mock backend has no tile at {cache_fp:?}"))
	}

	fn write(&self, cache_fp: &Footprint, array: &PixelArray) -> anyhow::Result<()> {
		self.tiles.insert(*cache_fp, array.clone());
		Ok(())
	}

	fn delete(&self, _path: &str) -> anyhow::Result<()> {
		Ok(())
	}

	fn driver_name(&self) -> &str {
		"mock"
	}

	fn path(&self) -> &str {
		&self.path
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rasterq_core::array::DType;

	#[test]
	fn read_after_write_round_trips() {
		let backend = MockBackend::new("mock://test");
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let array = PixelArray::filled(4, 4, 1, 7.0, DType::F32);
		backend.write(&fp, &array).unwrap();
		let read_back = backend.read(&fp, &fp).unwrap();
		assert_eq!(read_back.data(), array.data());
		assert_eq!(backend.tile_count(), 1);
	}

	#[test]
	fn read_missing_tile_errors() {
		let backend = MockBackend::new("mock://test");
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		assert!(backend.read(&fp, &fp).is_err());
	}

	#[test]
	fn driver_name_and_path() {
		let backend = MockBackend::new("mock://dataset-a");
		assert_eq!(backend.driver_name(), "mock");
		assert_eq!(backend.path(), "mock://dataset-a");
	}
}
