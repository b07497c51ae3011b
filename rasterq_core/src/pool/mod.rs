//! Worker pool admission: `PoolRoom`, priority jobs, and the `WorkerPool`
//! trait external pools implement.

mod job;
mod room;
mod traits;

pub use job::{JobTag, PoolJob, PriorityKey};
pub use room::PoolRoom;
pub use traits::{BoxedJob, WorkerPool};

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one configured pool (one `PoolRoom` instance), assigned when
/// the pool is registered with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

impl PoolId {
	#[must_use]
	pub fn next() -> Self {
		Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
	}

	#[must_use]
	pub fn raw(self) -> u64 {
		self.0
	}
}
