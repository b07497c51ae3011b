//! Pixel array representation shared by every actor.
//!
//! Arrays flow between actors as `ndarray::Array3<f64>` wrapped in
//! [`PixelArray`] together with the dtype they should ultimately be cast to,
//! the way `versatiles_container::types::tile::Tile` carries its
//! `TileFormat` alongside raw bytes.

use ndarray::Array3;
use std::sync::Arc;

/// The source or destination pixel type of a raster. The core never
/// operates on raw bytes directly (that's a `RasterBackend` concern); it
/// keeps pixels as `f64` internally and casts only at the backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
	U8,
	U16,
	I16,
	U32,
	I32,
	F32,
	F64,
}

impl DType {
	/// Clamp and round `value` into this dtype's representable range, then
	/// hand it back as `f64` (the core's working representation).
	#[must_use]
	pub fn cast(self, value: f64) -> f64 {
		match self {
			DType::U8 => value.round().clamp(0.0, f64::from(u8::MAX)),
			DType::U16 => value.round().clamp(0.0, f64::from(u16::MAX)),
			DType::I16 => value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)),
			DType::U32 => value.round().clamp(0.0, f64::from(u32::MAX)),
			DType::I32 => value.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)),
			DType::F32 => f64::from(value as f32),
			DType::F64 => value,
		}
	}
}

/// A `(rows, cols, channels)` pixel array, shared read-only between actors
/// in the same address space via `Arc` clone — cheap, and lets
/// `Producer::receive_sampled_a_cache_file_to_the_array` assert that every
/// delivery for a production tile points at the *same* underlying buffer
/// (spec.md §4.9).
#[derive(Debug, Clone)]
pub struct PixelArray {
	data: Arc<Array3<f64>>,
	dtype: DType,
}

impl PixelArray {
	#[must_use]
	pub fn new(data: Array3<f64>, dtype: DType) -> Self {
		Self {
			data: Arc::new(data),
			dtype,
		}
	}

	#[must_use]
	pub fn filled(rows: u32, cols: u32, channels: usize, value: f64, dtype: DType) -> Self {
		Self::new(Array3::from_elem((rows as usize, cols as usize, channels), value), dtype)
	}

	#[must_use]
	pub fn dtype(&self) -> DType {
		self.dtype
	}

	#[must_use]
	pub fn shape(&self) -> (usize, usize, usize) {
		let s = self.data.shape();
		(s[0], s[1], s[2])
	}

	#[must_use]
	pub fn data(&self) -> &Array3<f64> {
		&self.data
	}

	/// True if `other` points at the exact same underlying allocation.
	#[must_use]
	pub fn same_buffer(&self, other: &PixelArray) -> bool {
		Arc::ptr_eq(&self.data, &other.data)
	}

	/// Cast every pixel to this array's dtype range and return a fresh,
	/// owned copy — used right before an array is handed back across the
	/// `RasterBackend`/user-visible boundary.
	#[must_use]
	pub fn cast_to_dtype(&self) -> Array3<f64> {
		self.data.mapv(|v| self.dtype.cast(v))
	}

	/// Build a new `PixelArray` by taking a subset of channels, in the given
	/// order (used when reordering `unique_band_ids` back to `band_ids`).
	#[must_use]
	pub fn select_channels(&self, indices: &[usize]) -> PixelArray {
		let (rows, cols, _) = self.shape();
		let mut out = Array3::zeros((rows, cols, indices.len()));
		for (dst, &src) in indices.iter().enumerate() {
			out.slice_mut(ndarray::s![.., .., dst]).assign(&self.data.slice(ndarray::s![.., .., src]));
		}
		PixelArray::new(out, self.dtype)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cast_clamps_to_range() {
		assert_eq!(DType::U8.cast(300.0), 255.0);
		assert_eq!(DType::U8.cast(-5.0), 0.0);
		assert_eq!(DType::U8.cast(10.4), 10.0);
	}

	#[test]
	fn same_buffer_detects_shared_arc() {
		let a = PixelArray::filled(2, 2, 1, 0.0, DType::F32);
		let b = a.clone();
		let c = PixelArray::filled(2, 2, 1, 0.0, DType::F32);
		assert!(a.same_buffer(&b));
		assert!(!a.same_buffer(&c));
	}

	#[test]
	fn select_channels_reorders() {
		let mut data = Array3::zeros((1, 1, 3));
		data[[0, 0, 0]] = 1.0;
		data[[0, 0, 1]] = 2.0;
		data[[0, 0, 2]] = 3.0;
		let arr = PixelArray::new(data, DType::F64);
		let reordered = arr.select_channels(&[2, 0]);
		assert_eq!(reordered.data()[[0, 0, 0]], 3.0);
		assert_eq!(reordered.data()[[0, 0, 1]], 1.0);
	}
}
