//! A pool job: priority key, owner and the boxed work closure, queued in a
//! `PoolRoom` until a worker slot is free.
//!
//! spec.md §3/§4.2 describe a two-phase `Waiting`/`Working` handoff where
//! the owning actor defers building its job closure until a token is
//! granted. Rust closures capture their arguments eagerly, so that handoff
//! buys nothing here; `PoolJob` carries the closure from the start and
//! `PoolRoom` gates *launching* it on priority and capacity. See
//! `DESIGN.md` for the full rationale.

use crate::address::ActorAddress;
use crate::pool::traits::BoxedJob;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_JOB_TAG: AtomicU64 = AtomicU64::new(1);

/// Correlates a job across its submission and its `JobDone`/cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobTag(u64);

impl JobTag {
	#[must_use]
	pub fn next() -> Self {
		Self(NEXT_JOB_TAG.fetch_add(1, Ordering::Relaxed))
	}

	#[must_use]
	pub fn raw(self) -> u64 {
		self.0
	}

	/// Reconstructs a tag from the raw id carried on `Message::CancelJob`,
	/// which can't hold a `PoolJob`'s `JobTag` directly since it is never
	/// re-submitted.
	#[must_use]
	pub fn from_raw(raw: u64) -> Self {
		Self(raw)
	}
}

/// `(raster_uid, query_creation_index, prod_idx, footprint_tiebreak)` —
/// earlier queries and earlier output tiles are served first; ties broken
/// by job submission order (`JobTag`), so the ordering is always total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PriorityKey {
	pub raster_uid: u64,
	pub query_creation_index: u64,
	pub prod_idx: u32,
	pub footprint_tiebreak: u64,
}

/// One unit of pool work queued in a `PoolRoom`.
pub struct PoolJob {
	pub tag: JobTag,
	pub priority: PriorityKey,
	pub owner: ActorAddress,
	pub func: BoxedJob,
}

impl PoolJob {
	#[must_use]
	pub fn new(priority: PriorityKey, owner: ActorAddress, func: BoxedJob) -> Self {
		Self { tag: JobTag::next(), priority, owner, func }
	}
}

impl std::fmt::Debug for PoolJob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PoolJob").field("tag", &self.tag).field("owner", &self.owner).finish_non_exhaustive()
	}
}
