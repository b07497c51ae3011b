//! `QueriesHandler` (spec.md §4.10): the only actor a query's caller ever
//! touches indirectly — it owns output ordering, backpressure admission, and
//! the fan-out that tears a query down on cancellation.
//!
//! There is no Python source for this actor (buzzard doesn't have a single
//! actor playing this role); it's built from spec.md's description plus the
//! idiom the other actors in this crate already establish.

use crate::error::QueryError;
use crate::messages::{ActorAddress, Envelope, Message};
use crate::query::{ProdIdx, QueryId, QueryInfo, QueryOutputItem};
use crate::raster::RasterUid;
use log::{trace, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// How many production tiles may be admitted (in flight + buffered in the
/// ready queue) beyond `max_queue_size`, so pool workers keep finishing
/// tiles while the caller is slow to drain the ready queue. spec.md
/// mentions `worker_slack` once with no further definition; a small fixed
/// constant is the simplest reading that still does something (see
/// DESIGN.md).
const WORKER_SLACK: usize = 2;

struct QueryState {
	qi: Arc<QueryInfo>,
	output: Option<UnboundedSender<QueryOutputItem>>,
	next_dispatch: u32,
	next_emit: u32,
	in_flight: usize,
	ready: HashMap<u32, Result<crate::array::PixelArray, QueryError>>,
	/// Tiles handed to the user-visible output channel but not yet
	/// acknowledged by a `ConsumedOutputTile` credit. Counted toward
	/// admission so a slow consumer caps memory at `max_queue_size`
	/// regardless of how fast the pool produces tiles (spec.md §8).
	emitted_unread: usize,
}

pub struct QueriesHandler {
	raster_uid: RasterUid,
	queries: HashMap<QueryId, QueryState>,
	alive: bool,
}

impl QueriesHandler {
	#[must_use]
	pub fn new(raster_uid: RasterUid) -> Self {
		Self { raster_uid, queries: HashMap::new(), alive: true }
	}

	pub fn receive_enqueue_query(&mut self, qi: Arc<QueryInfo>, output: Option<UnboundedSender<QueryOutputItem>>) -> Vec<Envelope> {
		trace!(target: "rasterq_core::actors::queries_handler", "enqueue_query raster={:?} qi={:?}", self.raster_uid, qi.id);
		if !self.alive {
			return Vec::new();
		}
		let state = QueryState { qi: Arc::clone(&qi), output, next_dispatch: 0, next_emit: 0, in_flight: 0, ready: HashMap::new(), emitted_unread: 0 };
		self.queries.insert(qi.id, state);
		self.pump(qi.id)
	}

	pub fn receive_made_this_array(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, array: crate::array::PixelArray) -> Vec<Envelope> {
		self.settle(qi.id, prod_idx, Ok(array))
	}

	pub fn receive_production_tile_failed(&mut self, qi: Arc<QueryInfo>, prod_idx: ProdIdx, error: QueryError) -> Vec<Envelope> {
		self.settle(qi.id, prod_idx, Err(error))
	}

	fn settle(&mut self, id: QueryId, prod_idx: ProdIdx, result: Result<crate::array::PixelArray, QueryError>) -> Vec<Envelope> {
		let Some(state) = self.queries.get_mut(&id) else {
			return Vec::new();
		};
		state.in_flight = state.in_flight.saturating_sub(1);
		state.ready.insert(prod_idx.0, result);
		self.pump(id)
	}

	/// A caller pulled one tile off the output channel; free its admission
	/// slot and dispatch more work if the window allows.
	pub fn receive_consumed_output_tile(&mut self, qi_id: QueryId) -> Vec<Envelope> {
		let Some(state) = self.queries.get_mut(&qi_id) else {
			return Vec::new();
		};
		state.emitted_unread = state.emitted_unread.saturating_sub(1);
		self.pump(qi_id)
	}

	pub fn receive_cancel_this_query(&mut self, qi: Arc<QueryInfo>) -> Vec<Envelope> {
		if self.queries.remove(&qi.id).is_none() {
			return Vec::new();
		}
		[
			ActorAddress::Producer(self.raster_uid),
			ActorAddress::Resampler(self.raster_uid),
			ActorAddress::CacheExtractor(self.raster_uid),
			ActorAddress::Reader(self.raster_uid),
			ActorAddress::Computer(self.raster_uid),
			ActorAddress::Merger(self.raster_uid),
		]
		.into_iter()
		.map(|to| Envelope::new(to, Message::CancelThisQuery { qi: Arc::clone(&qi) }))
		.collect()
	}

	pub fn receive_die(&mut self) -> Vec<Envelope> {
		self.alive = false;
		self.queries.clear();
		Vec::new()
	}

	/// Drains every ready item due in order, delivering each to its
	/// destination (the origin requester for internal sub-queries, the
	/// user-visible channel otherwise), then dispatches new production
	/// tiles while admission allows.
	fn pump(&mut self, id: QueryId) -> Vec<Envelope> {
		let mut out = Vec::new();
		let mut complete = false;
		if let Some(state) = self.queries.get_mut(&id) {
			while let Some(result) = state.ready.remove(&state.next_emit) {
				deliver(state, result, &mut out);
				state.next_emit += 1;
				if state.next_emit as usize == state.qi.prod_count() {
					complete = true;
					break;
				}
			}
		}
		if complete {
			self.queries.remove(&id);
			return out;
		}

		let Some(state) = self.queries.get_mut(&id) else {
			return out;
		};
		while (state.next_dispatch as usize) < state.qi.prod_count()
			&& state.in_flight + state.ready.len() + state.emitted_unread < state.qi.max_queue_size + WORKER_SLACK
		{
			let prod_idx = ProdIdx(state.next_dispatch);
			state.next_dispatch += 1;
			state.in_flight += 1;
			out.push(Envelope::new(ActorAddress::Producer(self.raster_uid), Message::MakeThisArray { qi: Arc::clone(&state.qi), prod_idx }));
		}
		out
	}
}

fn deliver(state: &mut QueryState, result: Result<crate::array::PixelArray, QueryError>, out: &mut Vec<Envelope>) {
	let prod_idx = ProdIdx(state.next_emit);
	match &state.qi.origin {
		Some(origin) => match result {
			Ok(array) => out.push(Envelope::new(origin.requester, Message::PrimitiveArrayReady { ticket: origin.ticket, primitive_uid: state.qi.raster_uid, array })),
			Err(err) => out.push(Envelope::new(origin.requester, Message::PrimitiveArrayFailed { ticket: origin.ticket, reason: err.to_string() })),
		},
		None => {
			if let Some(tx) = &state.output {
				if tx.send((prod_idx, result)).is_err() {
					warn!(target: "rasterq_core::actors::queries_handler", "output receiver dropped for qi={:?}, discarding prod_idx={prod_idx:?}", state.qi.id);
				} else {
					state.emitted_unread += 1;
				}
			}
		}
	}
}
