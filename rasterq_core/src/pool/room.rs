//! `PoolRoom`: the admission-control and execution pair spec.md §4.2 calls
//! `WaitingRoom`/`WorkingRoom`, collapsed into one struct (see `job.rs` and
//! `DESIGN.md` for why the token handshake is unnecessary here).

use crate::messages::{Envelope, Message};
use crate::pool::job::{JobTag, PoolJob, PriorityKey};
use crate::pool::traits::WorkerPool;
use log::{debug, trace, warn};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;

struct HeapEntry(PoolJob);

impl PartialEq for HeapEntry {
	fn eq(&self, other: &Self) -> bool {
		self.0.priority == other.0.priority && self.0.tag == other.0.tag
	}
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> Ordering {
		// BinaryHeap is max-heap; reverse so the lowest priority key (earliest
		// query, earliest tile) pops first, ties broken by submission order.
		other.0.priority.cmp(&self.0.priority).then_with(|| other.0.tag.cmp(&self.0.tag))
	}
}

/// One pool room per configured `WorkerPool`. Holds the priority queue of
/// not-yet-launched jobs and tracks which tags were cancelled so a
/// completion for a cancelled job is dropped silently.
pub struct PoolRoom {
	pool: Arc<dyn WorkerPool>,
	mailbox: UnboundedSender<Envelope>,
	semaphore: Arc<Semaphore>,
	queued: BinaryHeap<HeapEntry>,
	queued_tags: HashSet<JobTag>,
	cancelled: Arc<std::sync::Mutex<HashSet<JobTag>>>,
}

impl PoolRoom {
	#[must_use]
	pub fn new(pool: Arc<dyn WorkerPool>, mailbox: UnboundedSender<Envelope>) -> Self {
		let permits = pool.worker_count().max(1);
		Self {
			pool,
			mailbox,
			semaphore: Arc::new(Semaphore::new(permits)),
			queued: BinaryHeap::new(),
			queued_tags: HashSet::new(),
			cancelled: Arc::new(std::sync::Mutex::new(HashSet::new())),
		}
	}

	/// Queue `job`, then launch as many queued jobs as current capacity
	/// allows, highest priority first, FIFO on ties.
	pub fn submit(&mut self, job: PoolJob) -> JobTag {
		let tag = job.tag;
		trace!(target: "rasterq_core::pool::room", "queued job {tag:?}");
		self.queued_tags.insert(tag);
		self.queued.push(HeapEntry(job));
		self.dispatch();
		tag
	}

	fn dispatch(&mut self) {
		loop {
			if self.queued.peek().is_none() {
				break;
			}
			let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
				break;
			};
			let HeapEntry(job) = self.queued.pop().expect("just checked non-empty");
			self.queued_tags.remove(&job.tag);
			self.launch(job, permit);
		}
	}

	fn launch(&self, job: PoolJob, permit: tokio::sync::OwnedSemaphorePermit) {
		let PoolJob { tag, owner, func, .. } = job;
		debug!(target: "rasterq_core::pool::room", "launching job {tag:?}");
		let mailbox = self.mailbox.clone();
		let pool = Arc::clone(&self.pool);
		let cancelled = Arc::clone(&self.cancelled);
		tokio::spawn(async move {
			let result = pool.submit(func).await;
			drop(permit);
			if cancelled.lock().expect("cancelled set not poisoned").remove(&tag) {
				warn!(target: "rasterq_core::pool::room", "discarding result of cancelled job {tag:?}");
				return;
			}
			let _ = mailbox.send(Envelope::new(owner, Message::JobDone { job_tag: tag.raw(), result }));
		});
	}

	/// Remove `tag` if still queued; otherwise mark it cancelled so its
	/// eventual `JobDone` is discarded instead of delivered.
	pub fn cancel(&mut self, tag: JobTag) {
		if self.queued_tags.remove(&tag) {
			self.queued.retain(|e| e.0.tag != tag);
		} else {
			self.cancelled.lock().expect("cancelled set not poisoned").insert(tag);
		}
	}

	#[must_use]
	pub fn worker_count(&self) -> usize {
		self.pool.worker_count()
	}
}
