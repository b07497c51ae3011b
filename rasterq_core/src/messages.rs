//! The single message envelope every actor reads from and writes to.
//!
//! This is the "one global ordered queue tagged by recipient" option
//! spec.md §4.1 offers: one `tokio::sync::mpsc` channel shared by every
//! actor, each message wrapped in an [`Envelope`] naming its recipient.
//! `qi` fields carry the whole immutable `QueryInfo` by `Arc`, the way the
//! Python source passes the `qi` object itself rather than an id — actors
//! read `qi.prod[prod_idx]` directly instead of looking it up elsewhere.

use crate::array::PixelArray;
use crate::backend::ArrayPerFootprint;
use crate::error::QueryError;
use crate::footprint::Footprint;
use crate::pool::PoolJob;
use crate::query::{ProdIdx, QueryId, QueryInfo, QueryOutputItem};
use crate::raster::{CacheIndex, RasterUid};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub use crate::address::ActorAddress;

/// A message plus its recipient, as it travels through the scheduler
/// mailbox.
#[derive(Debug)]
pub struct Envelope {
	pub to: ActorAddress,
	pub msg: Message,
}

impl Envelope {
	#[must_use]
	pub fn new(to: ActorAddress, msg: Message) -> Self {
		Self { to, msg }
	}
}

/// Every message variant any actor may receive. Actor handlers match on
/// this and return the follow-up `Envelope`s to send, never blocking and
/// never performing I/O themselves (spec.md §4.1).
///
/// Not `#[derive(Debug)]`: `SubmitJob` carries a boxed work closure, which
/// isn't `Debug`. See the manual impl below.
pub enum Message {
	// QueriesHandler
	/// `output` is `None` only for `Computer`'s internal primitive
	/// sub-queries, whose `qi.origin` routes completion back through
	/// `PrimitiveArrayReady`/`PrimitiveArrayFailed` instead (spec.md §4.6,
	/// §4.10).
	EnqueueQuery { qi: Arc<QueryInfo>, output: Option<UnboundedSender<QueryOutputItem>> },
	MadeThisArray { qi: Arc<QueryInfo>, prod_idx: ProdIdx, array: PixelArray },
	CancelThisQuery { qi: Arc<QueryInfo> },
	/// A single production tile failed terminally (e.g. a resample kernel
	/// error); surfaced to the user's iterator at this `prod_idx` without
	/// affecting the query's other in-flight tiles (spec.md §7).
	ProductionTileFailed { qi: Arc<QueryInfo>, prod_idx: ProdIdx, error: QueryError },
	/// Sent back by `QueryOutputReceiver` once a caller actually pulls a
	/// tile off the user-visible channel, releasing one slot of admission
	/// (spec.md §8 "ready-but-unread ... never exceeds max_queue_size").
	ConsumedOutputTile { qi_id: QueryId },

	// Producer
	MakeThisArray { qi: Arc<QueryInfo>, prod_idx: ProdIdx },
	SampledACacheFileToTheArray { qi: Arc<QueryInfo>, prod_idx: ProdIdx, cache_fp: Footprint, array: PixelArray },

	// CacheExtractor
	SampleThoseCacheFilesToAnArray { qi: Arc<QueryInfo>, prod_idx: ProdIdx },
	/// Sent by `CacheState` to `CacheExtractor` for each subscriber of a
	/// build that just completed.
	CacheTileBecameReady { qi: Arc<QueryInfo>, prod_idx: ProdIdx, cache_fp: Footprint, cache_idx: CacheIndex },
	CacheTileBecameFailed { qi: Arc<QueryInfo>, prod_idx: ProdIdx, reason: String },

	// Reader
	ReadThisCacheFile { qi: Arc<QueryInfo>, prod_idx: ProdIdx, cache_fp: Footprint, cache_idx: CacheIndex },

	// Build-completion notifications, addressed to `CacheState`; it holds
	// the subscriber list and fans `CacheTileBecameReady`/`Failed` back out.
	CacheFileUnreadable { raster_uid: RasterUid, cache_idx: CacheIndex, reason: String },
	CacheFileReady { raster_uid: RasterUid, cache_idx: CacheIndex, cache_fp: Footprint },
	CacheFileFailed { raster_uid: RasterUid, cache_idx: CacheIndex, reason: String },

	/// Operator-driven admin call (spec.md §9 [ADDED] supplemented feature),
	/// not part of any query's path: forces a tile back to `absent`.
	InvalidateCacheTile { raster_uid: RasterUid, cache_idx: CacheIndex },

	// Writer
	WriteThisArray { raster_uid: RasterUid, cache_idx: CacheIndex, cache_fp: Footprint, array: PixelArray },

	// Merger
	MergeThoseArrays { raster_uid: RasterUid, cache_idx: CacheIndex, cache_fp: Footprint, array_per_fp: Arc<ArrayPerFootprint> },

	// Computer
	ComputeThisArray { raster_uid: RasterUid, cache_idx: CacheIndex, cache_fp: Footprint },
	/// Routed by `QueriesHandler` instead of the user-visible channel when
	/// the completing `qi` carries an `InternalOrigin` — the result of a
	/// `Computer`-issued primitive sub-query (spec.md §4.6).
	PrimitiveArrayReady { ticket: u64, primitive_uid: RasterUid, array: PixelArray },
	/// Counterpart to `PrimitiveArrayReady` for a primitive sub-query whose
	/// production tile failed; `Computer` fails the whole recipe build on
	/// receipt rather than waiting for siblings that will never complete it.
	PrimitiveArrayFailed { ticket: u64, reason: String },

	// Resampler
	ResampleAndAccumulate {
		qi: Arc<QueryInfo>,
		prod_idx: ProdIdx,
		sample_fp: Option<Footprint>,
		resample_fp: Footprint,
		subsample_array: Option<PixelArray>,
	},

	// PoolRoom protocol: `SubmitJob`/`CancelJob` are addressed to
	// `ActorAddress::Pool(id)`; `JobDone` is addressed back to the job's
	// owner by the room itself once the closure completes.
	SubmitJob(PoolJob),
	CancelJob { job_tag: u64 },
	JobDone { job_tag: u64, result: anyhow::Result<PixelArray> },

	Die,
}

impl std::fmt::Debug for Message {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Message::EnqueueQuery { qi, .. } => f.debug_struct("EnqueueQuery").field("qi", &qi.id).finish(),
			Message::MadeThisArray { qi, prod_idx, .. } => f.debug_struct("MadeThisArray").field("qi", &qi.id).field("prod_idx", prod_idx).finish(),
			Message::CancelThisQuery { qi } => f.debug_struct("CancelThisQuery").field("qi", &qi.id).finish(),
			Message::ProductionTileFailed { qi, prod_idx, error } => f
				.debug_struct("ProductionTileFailed")
				.field("qi", &qi.id)
				.field("prod_idx", prod_idx)
				.field("error", error)
				.finish(),
			Message::ConsumedOutputTile { qi_id } => f.debug_struct("ConsumedOutputTile").field("qi_id", qi_id).finish(),
			Message::MakeThisArray { qi, prod_idx } => f.debug_struct("MakeThisArray").field("qi", &qi.id).field("prod_idx", prod_idx).finish(),
			Message::SampledACacheFileToTheArray { qi, prod_idx, cache_fp, .. } => f
				.debug_struct("SampledACacheFileToTheArray")
				.field("qi", &qi.id)
				.field("prod_idx", prod_idx)
				.field("cache_fp", cache_fp)
				.finish(),
			Message::SampleThoseCacheFilesToAnArray { qi, prod_idx } => {
				f.debug_struct("SampleThoseCacheFilesToAnArray").field("qi", &qi.id).field("prod_idx", prod_idx).finish()
			}
			Message::CacheFileReady { cache_idx, .. } => f.debug_struct("CacheFileReady").field("cache_idx", cache_idx).finish(),
			Message::CacheFileFailed { cache_idx, reason, .. } => f.debug_struct("CacheFileFailed").field("cache_idx", cache_idx).field("reason", reason).finish(),
			Message::CacheTileBecameReady { qi, prod_idx, cache_idx, .. } => f
				.debug_struct("CacheTileBecameReady")
				.field("qi", &qi.id)
				.field("prod_idx", prod_idx)
				.field("cache_idx", cache_idx)
				.finish(),
			Message::CacheTileBecameFailed { qi, prod_idx, reason } => f
				.debug_struct("CacheTileBecameFailed")
				.field("qi", &qi.id)
				.field("prod_idx", prod_idx)
				.field("reason", reason)
				.finish(),
			Message::ReadThisCacheFile { qi, prod_idx, cache_idx, .. } => f
				.debug_struct("ReadThisCacheFile")
				.field("qi", &qi.id)
				.field("prod_idx", prod_idx)
				.field("cache_idx", cache_idx)
				.finish(),
			Message::CacheFileUnreadable { cache_idx, reason, .. } => f.debug_struct("CacheFileUnreadable").field("cache_idx", cache_idx).field("reason", reason).finish(),
			Message::InvalidateCacheTile { cache_idx, .. } => f.debug_struct("InvalidateCacheTile").field("cache_idx", cache_idx).finish(),
			Message::WriteThisArray { cache_idx, .. } => f.debug_struct("WriteThisArray").field("cache_idx", cache_idx).finish(),
			Message::MergeThoseArrays { cache_idx, .. } => f.debug_struct("MergeThoseArrays").field("cache_idx", cache_idx).finish(),
			Message::ComputeThisArray { cache_idx, .. } => f.debug_struct("ComputeThisArray").field("cache_idx", cache_idx).finish(),
			Message::PrimitiveArrayReady { ticket, primitive_uid, .. } => {
				f.debug_struct("PrimitiveArrayReady").field("ticket", ticket).field("primitive_uid", primitive_uid).finish()
			}
			Message::PrimitiveArrayFailed { ticket, reason } => f.debug_struct("PrimitiveArrayFailed").field("ticket", ticket).field("reason", reason).finish(),
			Message::ResampleAndAccumulate { qi, prod_idx, resample_fp, .. } => f
				.debug_struct("ResampleAndAccumulate")
				.field("qi", &qi.id)
				.field("prod_idx", prod_idx)
				.field("resample_fp", resample_fp)
				.finish(),
			Message::SubmitJob(job) => f.debug_tuple("SubmitJob").field(job).finish(),
			Message::CancelJob { job_tag } => f.debug_struct("CancelJob").field("job_tag", job_tag).finish(),
			Message::JobDone { job_tag, result } => f.debug_struct("JobDone").field("job_tag", job_tag).field("ok", &result.is_ok()).finish(),
			Message::Die => f.write_str("Die"),
		}
	}
}
