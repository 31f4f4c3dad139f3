//! Periodic one-line health summary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatch::{DispatchStats, DispatchStatsSnapshot};
use crate::lifecycle::{TokenManager, TokenStatus};
use crate::poller::{PollStats, PollStatsSnapshot};
use crate::seen::SharedSeenSet;

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
	pub uptime: Duration,
	/// Resident set size in KiB; `None` where `/proc` is unavailable.
	pub rss_kib: Option<u64>,
	pub seen: usize,
	pub token: TokenStatus,
	pub poll: PollStatsSnapshot,
	pub dispatch: DispatchStatsSnapshot,
}

pub struct HealthReporter {
	started: Instant,
	tokens: Arc<TokenManager>,
	seen: SharedSeenSet,
	poll: Arc<PollStats>,
	dispatch: Arc<DispatchStats>,
}

impl HealthReporter {
	pub fn new(tokens: Arc<TokenManager>, seen: SharedSeenSet, poll: Arc<PollStats>, dispatch: Arc<DispatchStats>) -> Self {
		Self {
			started: Instant::now(),
			tokens,
			seen,
			poll,
			dispatch,
		}
	}

	pub fn snapshot(&self) -> HealthSnapshot {
		HealthSnapshot {
			uptime: self.started.elapsed(),
			rss_kib: resident_set_kib(),
			seen: self.seen.lock().len(),
			token: self.tokens.status(),
			poll: self.poll.snapshot(),
			dispatch: self.dispatch.snapshot(),
		}
	}

	pub fn report(&self) {
		let s = self.snapshot();
		let token_expires_in_secs = s.token.expires_at.map(|at| (at - Utc::now()).num_seconds());
		info!(
			target = "jobwatch.health",
			uptime_secs = s.uptime.as_secs(),
			rss_kib = ?s.rss_kib,
			seen = s.seen,
			token_phase = ?s.token.phase,
			token_expires_in_secs = ?token_expires_in_secs,
			renewals = s.token.renewals,
			extractions = s.token.extractions,
			ticks = s.poll.ticks,
			tick_failures = s.poll.failures,
			ticks_skipped = s.poll.skipped,
			reauths = s.poll.reauths,
			listings_fetched = s.poll.listings_fetched,
			alerts_queued = s.poll.alerts_queued,
			alerts_sent = s.dispatch.sent,
			alerts_failed = s.dispatch.failed,
			alerts_dropped = s.dispatch.dropped,
			"health"
		);
	}

	/// Logs a summary every `interval` until cancelled.
	pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
		let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = ticker.tick() => self.report(),
			}
		}
	}
}

#[cfg(target_os = "linux")]
fn resident_set_kib() -> Option<u64> {
	let status = std::fs::read_to_string("/proc/self/status").ok()?;
	parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn resident_set_kib() -> Option<u64> {
	None
}

/// Reads the `VmRSS:  1234 kB` line of a `/proc/<pid>/status` dump.
fn parse_vm_rss(status: &str) -> Option<u64> {
	status
		.lines()
		.find_map(|line| line.strip_prefix("VmRSS:"))
		.and_then(|rest| rest.split_whitespace().next())
		.and_then(|kib| kib.parse().ok())
}
