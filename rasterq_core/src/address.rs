//! Actor addressing, factored out of `messages.rs` so `query` can tag a
//! `QueryInfo` with an internal requester (see
//! [`crate::query::InternalOrigin`]) without a module cycle.

use crate::pool::PoolId;
use crate::raster::RasterUid;

/// A stable address for one actor instance. Most actors are per-raster
/// (one instance per `RasterUid`); pool rooms are per configured pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorAddress {
	Reader(RasterUid),
	Writer(RasterUid),
	Merger(RasterUid),
	Computer(RasterUid),
	CacheExtractor(RasterUid),
	Resampler(RasterUid),
	Producer(RasterUid),
	QueriesHandler(RasterUid),
	CacheState,
	Pool(PoolId),
}
