//! The `WorkerPool` trait external thread/process pools implement.

use crate::array::PixelArray;

/// A unit of pool work: a closure producing a `PixelArray` or failing.
/// Boxed because `Message`/`Working` need a concrete, `Send` type to carry
/// the job across the scheduler mailbox and into `spawn_blocking`.
pub type BoxedJob = Box<dyn FnOnce() -> anyhow::Result<PixelArray> + Send>;

/// A pool of workers a raster may route its I/O, resample, computation or
/// merge jobs through. Implementations decide whether workers share this
/// process's address space (`ThreadPool`) or run out-of-process
/// (`ProcessPool`, serializing job arguments across the boundary).
#[async_trait::async_trait]
pub trait WorkerPool: Send + Sync {
	async fn submit(&self, job: BoxedJob) -> anyhow::Result<PixelArray>;

	fn worker_count(&self) -> usize;

	/// `true` for a `ThreadPool` (workers share this process's memory and
	/// may write into a caller's buffer directly); `false` for a
	/// `ProcessPool` (workers receive a copy and the result replaces it).
	fn same_address_space(&self) -> bool;
}
