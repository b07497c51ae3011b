//! Default [`ResamplerKernel`]: nearest-neighbor remapping, the simplest
//! interpolation `Resampler` can hand a sample array off to. The remap
//! algorithm itself is an external collaborator (spec.md §1 Non-goals); this
//! is the minimal implementation that makes the facade and CLI usable
//! without pulling in an image-processing dependency the teacher workspace
//! doesn't carry.

use ndarray::Array3;
use rasterq_core::array::PixelArray;
use rasterq_core::footprint::Footprint;
use rasterq_core::query::Interpolation;
use rasterq_core::resample::ResamplerKernel;

pub struct NearestNeighborKernel;

impl ResamplerKernel for NearestNeighborKernel {
	fn remap(
		&self,
		src_fp: &Footprint,
		dst_fp: &Footprint,
		array: &PixelArray,
		src_nodata: Option<f64>,
		dst_nodata: Option<f64>,
		interpolation: Interpolation,
	) -> anyhow::Result<PixelArray> {
		if !matches!(interpolation, Interpolation::NearestNeighbor) {
			anyhow::bail!("NearestNeighborKernel only implements Interpolation::NearestNeighbor, got {interpolation:?}");
		}

		let (src_ox, src_oy) = src_fp.origin();
		let (src_px, src_py) = src_fp.pixel_size();
		let (dst_ox, dst_oy) = dst_fp.origin();
		let (dst_px, dst_py) = dst_fp.pixel_size();
		let (dst_rows, dst_cols) = dst_fp.shape();
		let (src_rows, src_cols, channels) = array.shape();
		let fill = dst_nodata.unwrap_or(0.0);
		let data = array.data();

		let mut out = Array3::from_elem((dst_rows as usize, dst_cols as usize, channels), fill);
		for row in 0..dst_rows as usize {
			let world_y = dst_oy + dst_py * (row as f64 + 0.5);
			let src_row = ((world_y - src_oy) / src_py - 0.5).round();
			if src_row < 0.0 || src_row as usize >= src_rows {
				continue;
			}
			let src_row = src_row as usize;

			for col in 0..dst_cols as usize {
				let world_x = dst_ox + dst_px * (col as f64 + 0.5);
				let src_col = ((world_x - src_ox) / src_px - 0.5).round();
				if src_col < 0.0 || src_col as usize >= src_cols {
					continue;
				}
				let src_col = src_col as usize;

				for c in 0..channels {
					let v = data[[src_row, src_col, c]];
					out[[row, col, c]] = if Some(v) == src_nodata { fill } else { v };
				}
			}
		}
		Ok(PixelArray::new(out, array.dtype()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rasterq_core::array::DType;

	#[test]
	fn identity_remap_same_grid_copies_values() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let mut data = Array3::zeros((4, 4, 1));
		data[[1, 2, 0]] = 9.0;
		let array = PixelArray::new(data, DType::F32);
		let out = NearestNeighborKernel.remap(&fp, &fp, &array, None, Some(0.0), Interpolation::NearestNeighbor).unwrap();
		assert_eq!(out.data()[[1, 2, 0]], 9.0);
	}

	#[test]
	fn upscale_fills_every_destination_pixel_from_one_source_pixel() {
		let src = Footprint::new(0.0, 0.0, 2.0, -2.0, 2, 2);
		let dst = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let mut data = Array3::zeros((2, 2, 1));
		data[[0, 0, 0]] = 5.0;
		let array = PixelArray::new(data, DType::F32);
		let out = NearestNeighborKernel.remap(&src, &dst, &array, None, Some(-1.0), Interpolation::NearestNeighbor).unwrap();
		assert_eq!(out.data()[[0, 0, 0]], 5.0);
		assert_eq!(out.data()[[1, 1, 0]], 5.0);
	}

	#[test]
	fn out_of_range_destination_pixels_fill_with_nodata() {
		let src = Footprint::new(0.0, 0.0, 1.0, -1.0, 2, 2);
		let dst = Footprint::new(10.0, -10.0, 1.0, -1.0, 2, 2);
		let array = PixelArray::filled(2, 2, 1, 3.0, DType::F32);
		let out = NearestNeighborKernel.remap(&src, &dst, &array, None, Some(-9.0), Interpolation::NearestNeighbor).unwrap();
		assert!(out.data().iter().all(|&v| v == -9.0));
	}

	#[test]
	fn non_nearest_neighbor_interpolation_is_rejected() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 2, 2);
		let array = PixelArray::filled(2, 2, 1, 1.0, DType::F32);
		assert!(NearestNeighborKernel.remap(&fp, &fp, &array, None, None, Interpolation::Bilinear).is_err());
	}
}
