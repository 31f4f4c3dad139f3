//! Bounded, insertion-ordered record of listing ids already alerted on.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SeenPolicy;
use crate::listings::Listing;

/// Oldest ids sit at the front; re-observed ids move to the back.
#[derive(Debug)]
pub struct SeenSet {
	ids: IndexSet<String>,
	policy: SeenPolicy,
}

impl SeenSet {
	pub fn new(policy: SeenPolicy) -> Self {
		Self {
			ids: IndexSet::new(),
			policy,
		}
	}

	/// Records every id in `batch` and returns the listings not seen before.
	///
	/// The result keeps API order and contains each id at most once. All ids are
	/// refreshed to most-recent, so postings that are still live outlast stale ones
	/// when capacity trimming kicks in.
	pub fn observe(&mut self, batch: &[Listing]) -> Vec<Listing> {
		let mut fresh = Vec::new();
		for listing in batch {
			let known = self.ids.shift_remove(listing.id.as_str());
			self.ids.insert(listing.id.clone());
			if !known {
				fresh.push(listing.clone());
			}
		}
		self.enforce_capacity();
		fresh
	}

	pub fn contains(&self, id: &str) -> bool {
		self.ids.contains(id)
	}

	pub fn len(&self) -> usize {
		self.ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}

	pub fn clear(&mut self) -> usize {
		let dropped = self.ids.len();
		self.ids.clear();
		dropped
	}

	fn enforce_capacity(&mut self) {
		let SeenPolicy::Capacity { max, keep } = self.policy else {
			return;
		};
		if self.ids.len() > max {
			let excess = self.ids.len() - keep;
			self.ids.drain(..excess);
			debug!(target = "jobwatch.poll", pruned = excess, kept = self.ids.len(), "seen-set trimmed");
		}
	}
}

pub type SharedSeenSet = Arc<Mutex<SeenSet>>;

/// Empties the set every `every`, first firing one period after start.
pub async fn run_periodic_clear(seen: SharedSeenSet, every: Duration, cancel: CancellationToken) {
	let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => {
				let dropped = seen.lock().clear();
				info!(target = "jobwatch.poll", dropped, "seen-set cleared");
			}
		}
	}
}
