//! Fixed-interval listings poll with deduplication and one-shot re-auth.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, WatchError};
use crate::lifecycle::TokenManager;
use crate::listings::{Listing, ListingsClient};
use crate::seen::SharedSeenSet;

/// A rejected fetch is retried once with a new credential, never more.
const MAX_FETCHES_PER_TICK: u32 = 2;

/// New listings handed from the poller to the dispatcher.
pub type AlertBatch = Vec<Listing>;

#[derive(Debug, Clone, Default)]
pub struct PollCycleResult {
	pub fetched: Vec<Listing>,
	pub fresh: Vec<Listing>,
}

/// Counters shared with the health reporter.
#[derive(Debug, Default)]
pub struct PollStats {
	ticks: AtomicU64,
	failures: AtomicU64,
	skipped: AtomicU64,
	reauths: AtomicU64,
	listings_fetched: AtomicU64,
	alerts_queued: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStatsSnapshot {
	pub ticks: u64,
	pub failures: u64,
	/// Ticks skipped for lack of a credential.
	pub skipped: u64,
	pub reauths: u64,
	pub listings_fetched: u64,
	pub alerts_queued: u64,
}

impl PollStats {
	pub fn snapshot(&self) -> PollStatsSnapshot {
		PollStatsSnapshot {
			ticks: self.ticks.load(Ordering::Relaxed),
			failures: self.failures.load(Ordering::Relaxed),
			skipped: self.skipped.load(Ordering::Relaxed),
			reauths: self.reauths.load(Ordering::Relaxed),
			listings_fetched: self.listings_fetched.load(Ordering::Relaxed),
			alerts_queued: self.alerts_queued.load(Ordering::Relaxed),
		}
	}
}

pub struct PollEngine {
	tokens: Arc<TokenManager>,
	client: ListingsClient,
	seen: SharedSeenSet,
	alerts: mpsc::UnboundedSender<AlertBatch>,
	interval: Duration,
	stats: Arc<PollStats>,
}

impl PollEngine {
	pub fn new(
		tokens: Arc<TokenManager>,
		client: ListingsClient,
		seen: SharedSeenSet,
		alerts: mpsc::UnboundedSender<AlertBatch>,
		interval: Duration,
	) -> Self {
		Self {
			tokens,
			client,
			seen,
			alerts,
			interval,
			stats: Arc::new(PollStats::default()),
		}
	}

	pub fn stats(&self) -> Arc<PollStats> {
		Arc::clone(&self.stats)
	}

	/// One poll cycle: fetch, diff against the seen-set, queue fresh listings.
	pub async fn tick(&self) -> Result<PollCycleResult> {
		self.stats.ticks.fetch_add(1, Ordering::Relaxed);

		let fetched = self.fetch_with_reauth().await?;
		self.stats.listings_fetched.fetch_add(fetched.len() as u64, Ordering::Relaxed);

		let fresh = self.seen.lock().observe(&fetched);
		if !fresh.is_empty() {
			info!(target = "jobwatch.poll", fetched = fetched.len(), fresh = fresh.len(), "new listings found");
			self.stats.alerts_queued.fetch_add(fresh.len() as u64, Ordering::Relaxed);
			if self.alerts.send(fresh.clone()).is_err() {
				warn!(target = "jobwatch.poll", dropped = fresh.len(), "dispatcher is gone; alerts dropped");
			}
		}

		Ok(PollCycleResult { fetched, fresh })
	}

	async fn fetch_with_reauth(&self) -> Result<Vec<Listing>> {
		let mut fetches = 0;
		loop {
			fetches += 1;
			let credential = self.tokens.get_valid_token().await?;
			match self.client.fetch(&credential).await {
				Ok(listings) => return Ok(listings),
				Err(e) if e.is_auth_rejection() => {
					warn!(target = "jobwatch.poll", error = %e, fingerprint = %credential.fingerprint(), "credential rejected");
					self.tokens.invalidate_if(&credential);
					if fetches >= MAX_FETCHES_PER_TICK {
						return Err(e);
					}
					self.stats.reauths.fetch_add(1, Ordering::Relaxed);
				}
				Err(e) => return Err(e),
			}
		}
	}

	/// Ticks until `cancel` fires. Ticks never overlap; late ticks are skipped.
	pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		info!(target = "jobwatch.poll", interval_ms = self.interval.as_millis() as u64, "polling started");

		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = ticker.tick() => {}
			}

			let outcome = tokio::select! {
				_ = cancel.cancelled() => break,
				outcome = self.tick() => outcome,
			};
			match outcome {
				Ok(cycle) => debug!(target = "jobwatch.poll", fetched = cycle.fetched.len(), fresh = cycle.fresh.len(), "tick done"),
				Err(WatchError::TokenUnavailable(reason)) => {
					self.stats.skipped.fetch_add(1, Ordering::Relaxed);
					warn!(target = "jobwatch.poll", %reason, "no credential; tick skipped");
				}
				Err(e) => {
					self.stats.failures.fetch_add(1, Ordering::Relaxed);
					warn!(target = "jobwatch.poll", error = %e, "tick failed");
				}
			}
		}
		info!(target = "jobwatch.poll", "polling stopped");
	}
}
