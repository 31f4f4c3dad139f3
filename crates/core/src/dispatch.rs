//! Alert formatting and paced delivery through a messaging provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DispatchConfig, TelegramConfig};
use crate::error::{Result, WatchError};
use crate::listings::Listing;
use crate::poller::AlertBatch;

/// Outbound text channel. Implementations map throttling to
/// [`WatchError::DeliveryRateLimited`] and anything else to [`WatchError::DeliveryFailed`].
#[async_trait]
pub trait Messenger: Send + Sync {
	async fn send(&self, html: &str) -> Result<()>;
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramMessenger {
	http: reqwest::Client,
	config: TelegramConfig,
}

#[derive(Deserialize)]
struct TelegramReply {
	#[serde(default)]
	ok: bool,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	parameters: Option<TelegramParameters>,
}

#[derive(Deserialize)]
struct TelegramParameters {
	#[serde(default)]
	retry_after: Option<u64>,
}

impl TelegramMessenger {
	pub fn new(config: TelegramConfig) -> Result<Self> {
		let http = reqwest::Client::builder().timeout(config.request_timeout).build()?;
		Ok(Self { http, config })
	}

	fn endpoint(&self) -> String {
		format!("{}/bot{}/sendMessage", self.config.api_base.trim_end_matches('/'), self.config.bot_token)
	}
}

#[async_trait]
impl Messenger for TelegramMessenger {
	async fn send(&self, html: &str) -> Result<()> {
		let body = json!({
			"chat_id": self.config.chat_id,
			"text": html,
			"parse_mode": "HTML",
			"disable_web_page_preview": true,
		});

		// The URL embeds the bot token, so it is stripped from every error.
		let response = self
			.http
			.post(self.endpoint())
			.json(&body)
			.send()
			.await
			.map_err(|e| WatchError::DeliveryFailed(e.without_url().to_string()))?;

		let status = response.status();
		let header_hint = response
			.headers()
			.get(RETRY_AFTER)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.trim().parse::<u64>().ok());
		let text = response.text().await.unwrap_or_default();
		let reply: Option<TelegramReply> = serde_json::from_str(&text).ok();

		if status == StatusCode::TOO_MANY_REQUESTS {
			let retry_after = reply
				.as_ref()
				.and_then(|r| r.parameters.as_ref())
				.and_then(|p| p.retry_after)
				.or(header_hint)
				.map(Duration::from_secs);
			return Err(WatchError::DeliveryRateLimited { retry_after });
		}

		match reply {
			Some(reply) if status.is_success() && reply.ok => Ok(()),
			Some(reply) => Err(WatchError::DeliveryFailed(format!(
				"{}: {}",
				status,
				reply.description.unwrap_or_else(|| "request not ok".into())
			))),
			None => Err(WatchError::DeliveryFailed(format!("{}: unreadable reply", status))),
		}
	}
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
	pub sent: usize,
	pub failed: usize,
	/// Listings beyond the per-cycle cap.
	pub dropped: usize,
	/// 429 responses absorbed by waiting and resending.
	pub rate_limited: usize,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
	sent: AtomicU64,
	failed: AtomicU64,
	dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
	pub sent: u64,
	pub failed: u64,
	pub dropped: u64,
}

impl DispatchStats {
	pub fn snapshot(&self) -> DispatchStatsSnapshot {
		DispatchStatsSnapshot {
			sent: self.sent.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			dropped: self.dropped.load(Ordering::Relaxed),
		}
	}

	fn record(&self, report: &DeliveryReport) {
		self.sent.fetch_add(report.sent as u64, Ordering::Relaxed);
		self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
		self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
	}
}

pub struct AlertDispatcher {
	messenger: Arc<dyn Messenger>,
	config: DispatchConfig,
	job_url_base: String,
	stats: Arc<DispatchStats>,
}

impl AlertDispatcher {
	pub fn new(messenger: Arc<dyn Messenger>, config: DispatchConfig, job_url_base: impl Into<String>) -> Self {
		Self {
			messenger,
			config,
			job_url_base: job_url_base.into(),
			stats: Arc::new(DispatchStats::default()),
		}
	}

	pub fn stats(&self) -> Arc<DispatchStats> {
		Arc::clone(&self.stats)
	}

	/// Sends one message per listing, in order, up to the per-cycle cap.
	pub async fn deliver(&self, batch: &[Listing]) -> DeliveryReport {
		let cap = self.config.max_per_cycle.min(batch.len());
		let (to_send, overflow) = batch.split_at(cap);
		let mut report = DeliveryReport {
			dropped: overflow.len(),
			..Default::default()
		};
		if !overflow.is_empty() {
			warn!(target = "jobwatch.dispatch", sending = to_send.len(), dropped = overflow.len(), "alert batch exceeds per-cycle cap");
		}

		for (index, listing) in to_send.iter().enumerate() {
			if index > 0 && !self.config.send_delay.is_zero() {
				tokio::time::sleep(self.config.send_delay).await;
			}
			let text = format_listing(listing, &self.job_url_base);
			self.send_one(listing, &text, &mut report).await;
		}

		self.stats.record(&report);
		report
	}

	async fn send_one(&self, listing: &Listing, text: &str, report: &mut DeliveryReport) {
		let mut throttled = 0;
		loop {
			match self.messenger.send(text).await {
				Ok(()) => {
					debug!(target = "jobwatch.dispatch", id = %listing.id, "alert sent");
					report.sent += 1;
					return;
				}
				Err(WatchError::DeliveryRateLimited { retry_after }) if throttled < self.config.max_rate_limit_retries => {
					throttled += 1;
					report.rate_limited += 1;
					let wait = retry_after.unwrap_or(self.config.rate_limit_cooldown);
					warn!(target = "jobwatch.dispatch", id = %listing.id, wait_ms = wait.as_millis() as u64, attempt = throttled, "rate limited; resending after cooldown");
					tokio::time::sleep(wait).await;
				}
				Err(WatchError::DeliveryRateLimited { .. }) => {
					warn!(target = "jobwatch.dispatch", id = %listing.id, resends = throttled, "still rate limited after resends; alert dropped");
					report.failed += 1;
					return;
				}
				Err(e) => {
					warn!(target = "jobwatch.dispatch", id = %listing.id, error = %e, "alert not delivered; skipping");
					report.failed += 1;
					return;
				}
			}
		}
	}

	/// Delivers batches from the poller until the channel closes or `cancel` fires.
	pub async fn run(self: Arc<Self>, mut batches: mpsc::UnboundedReceiver<AlertBatch>, cancel: CancellationToken) {
		loop {
			let batch = tokio::select! {
				_ = cancel.cancelled() => break,
				batch = batches.recv() => match batch {
					Some(batch) => batch,
					None => break,
				},
			};
			let report = tokio::select! {
				_ = cancel.cancelled() => break,
				report = self.deliver(&batch) => report,
			};
			info!(
				target = "jobwatch.dispatch",
				sent = report.sent,
				failed = report.failed,
				dropped = report.dropped,
				rate_limited = report.rate_limited,
				"alert batch delivered"
			);
		}
		debug!(target = "jobwatch.dispatch", "dispatcher stopped");
	}
}

/// HTML message body for one listing. All listing text is escaped.
pub fn format_listing(listing: &Listing, job_url_base: &str) -> String {
	let mut lines = vec![format!("<b>{}</b>", escape_html(listing.title.trim()))];

	if let Some(location) = listing.location() {
		let distance = listing
			.distance
			.as_deref()
			.map(|d| format!(" ({} mi)", escape_html(d)))
			.unwrap_or_default();
		lines.push(format!("Location: {}{}", escape_html(&location), distance));
	}
	if let Some(pay) = listing.pay_range() {
		lines.push(format!("Pay: {}/hr", escape_html(&pay)));
	}
	if let Some(count) = listing.schedule_count.filter(|c| *c > 0.0) {
		lines.push(format!("Schedules: {}", count as u64));
	}
	let kind: Vec<&str> = [listing.employment_type.as_deref(), listing.job_type.as_deref()]
		.into_iter()
		.flatten()
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.collect();
	if !kind.is_empty() {
		lines.push(format!("Type: {}", escape_html(&kind.join(", "))));
	}
	lines.push(format!(
		"<a href=\"{}\">View posting</a>",
		escape_html(&format!("{}{}", job_url_base, listing.id))
	));

	lines.join("\n")
}

pub fn escape_html(text: &str) -> String {
	let mut escaped = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			c => escaped.push(c),
		}
	}
	escaped
}
