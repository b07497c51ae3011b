//! Concrete [`WorkerPool`]: a same-address-space thread pool built on
//! `tokio::task::spawn_blocking`, mirroring how `versatiles_pipeline`'s GDAL
//! operations offload blocking reads onto a blocking task instead of a
//! hand-rolled thread pool. Worker count only limits how many permits
//! `PoolRoom` hands out concurrently; the underlying blocking pool is
//! Tokio's own and is shared process-wide.

use async_trait::async_trait;
use rasterq_core::array::PixelArray;
use rasterq_core::pool::{BoxedJob, WorkerPool};

pub struct ThreadPool {
	worker_count: usize,
}

impl ThreadPool {
	#[must_use]
	pub fn new(worker_count: usize) -> Self {
		Self { worker_count: worker_count.max(1) }
	}
}

#[async_trait]
impl WorkerPool for ThreadPool {
	async fn submit(&self, job: BoxedJob) -> anyhow::Result<PixelArray> {
		tokio::task::spawn_blocking(job).await.map_err(|e| anyhow::anyhow!("worker thread panicked: {e}"))?
	}

	fn worker_count(&self) -> usize {
		self.worker_count
	}

	fn same_address_space(&self) -> bool {
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rasterq_core::array::DType;

	#[tokio::test(flavor = "multi_thread")]
	async fn submit_runs_job_and_returns_its_result() {
		let pool = ThreadPool::new(2);
		let array = pool.submit(Box::new(|| Ok(PixelArray::filled(2, 2, 1, 3.0, DType::F32)))).await.unwrap();
		assert_eq!(array.shape(), (2, 2, 1));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn submit_propagates_job_error() {
		let pool = ThreadPool::new(1);
		let err = pool.submit(Box::new(|| Err(anyhow::anyhow!("boom")))).await.unwrap_err();
		assert!(err.to_string().contains("boom"));
	}
}
