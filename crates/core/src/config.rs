//! Runtime configuration with deploy-time defaults.
//!
//! Every tunable lives here so the engines take plain values; the binary fills
//! these structs from flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use jobwatch_cdp::SessionOptions;
use jobwatch_cdp::launcher::LaunchOptions;

use crate::error::{Result, WatchError};

/// Lowest poll interval the engine will run at.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub const DEFAULT_TARGET_URL: &str = "https://hiring.amazon.com/search/warehouse-jobs";
pub const DEFAULT_LISTINGS_ENDPOINT: &str = "https://e5mquma77feepi2bdn4d6h3mpu.appsync-api.us-east-1.amazonaws.com/graphql";
pub const DEFAULT_JOB_URL_BASE: &str = "https://hiring.amazon.com/app#/jobDetail?jobId=";
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";
pub const DEFAULT_USER_AGENT: &str =
	"Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default)]
pub struct WatchConfig {
	pub browser: BrowserConfig,
	pub token: TokenConfig,
	pub listings: ListingsConfig,
	pub poll: PollConfig,
	pub seen: SeenPolicy,
	pub dispatch: DispatchConfig,
	pub telegram: TelegramConfig,
	pub health: HealthConfig,
}

impl WatchConfig {
	/// Checks cross-field constraints; called once before anything starts.
	pub fn validate(&self) -> Result<()> {
		if self.telegram.bot_token.trim().is_empty() {
			return Err(WatchError::Config("telegram bot token is required".into()));
		}
		if self.telegram.chat_id.trim().is_empty() {
			return Err(WatchError::Config("telegram chat id is required".into()));
		}
		if self.token.max_attempts == 0 {
			return Err(WatchError::Config("token extraction needs at least one attempt".into()));
		}
		if self.listings.page_size == 0 {
			return Err(WatchError::Config("listings page size must be positive".into()));
		}
		if self.dispatch.max_per_cycle == 0 {
			return Err(WatchError::Config("max alerts per cycle must be positive".into()));
		}
		if self.token.refresh_interval.is_zero() {
			return Err(WatchError::Config("credential refresh interval must be positive".into()));
		}
		if self.health.interval.is_zero() {
			return Err(WatchError::Config("health report interval must be positive".into()));
		}
		self.seen.validate()
	}
}

/// Headless browser used for token extraction.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
	/// Page whose client scripts mint the bearer credential.
	pub target_url: String,
	pub executable: Option<PathBuf>,
	pub headless: bool,
	pub no_sandbox: bool,
	pub navigation_timeout: Duration,
	pub settle: Duration,
	pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
	fn default() -> Self {
		Self {
			target_url: DEFAULT_TARGET_URL.to_string(),
			executable: None,
			headless: true,
			no_sandbox: false,
			navigation_timeout: Duration::from_secs(30),
			settle: Duration::from_secs(12),
			user_agent: Some(DEFAULT_USER_AGENT.to_string()),
		}
	}
}

impl BrowserConfig {
	pub fn session_options(&self) -> SessionOptions {
		SessionOptions {
			launch: LaunchOptions {
				executable: self.executable.clone(),
				headless: self.headless,
				no_sandbox: self.no_sandbox,
				..Default::default()
			},
			navigation_timeout: self.navigation_timeout,
			settle: self.settle,
			user_agent: self.user_agent.clone(),
			..Default::default()
		}
	}
}

/// Credential discovery and lifecycle tuning.
#[derive(Debug, Clone)]
pub struct TokenConfig {
	/// Storage key checked before any signature scan.
	pub storage_key: String,
	/// Shortest string accepted as a bearer credential.
	pub min_token_len: usize,
	/// Validity assumed when the token's claims cannot be decoded.
	pub assumed_validity: Duration,
	/// Extraction rejects credentials expiring within this window, except on the last attempt.
	pub near_expiry_window: Duration,
	/// Credentials are treated as expired this long before their real expiry.
	pub guard_margin: Duration,
	pub max_attempts: u32,
	pub retry_delay: Duration,
	/// Proactive renewal period, independent of polling.
	pub refresh_interval: Duration,
}

impl Default for TokenConfig {
	fn default() -> Self {
		Self {
			storage_key: "sessionToken".to_string(),
			min_token_len: 100,
			assumed_validity: Duration::from_secs(55 * 60),
			near_expiry_window: Duration::from_secs(10 * 60),
			guard_margin: Duration::from_secs(5 * 60),
			max_attempts: 3,
			retry_delay: Duration::from_secs(30),
			refresh_interval: Duration::from_secs(55 * 60),
		}
	}
}

/// Listings query scope.
#[derive(Debug, Clone)]
pub struct ListingsConfig {
	pub endpoint: String,
	/// Sent as `Origin`/`Referer`; the endpoint expects browser-like requests.
	pub origin: Option<String>,
	pub locale: String,
	pub country: String,
	/// Only postings starting within this many days from today.
	pub date_window_days: u32,
	/// Weekly hours filter, inclusive.
	pub hours_per_week: Option<(u32, u32)>,
	pub geo: Option<GeoFilter>,
	pub page_size: u32,
	pub request_timeout: Duration,
	/// Prefix joined with a listing id to link to the posting.
	pub job_url_base: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFilter {
	pub lat: f64,
	pub lng: f64,
	/// Radius in miles.
	pub distance: u32,
}

impl Default for ListingsConfig {
	fn default() -> Self {
		Self {
			endpoint: DEFAULT_LISTINGS_ENDPOINT.to_string(),
			origin: Some("https://hiring.amazon.com".to_string()),
			locale: "en-US".to_string(),
			country: "United States".to_string(),
			date_window_days: 21,
			hours_per_week: None,
			geo: None,
			page_size: 100,
			request_timeout: Duration::from_secs(10),
			job_url_base: DEFAULT_JOB_URL_BASE.to_string(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct PollConfig {
	pub interval: Duration,
}

impl Default for PollConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(1),
		}
	}
}

impl PollConfig {
	/// Configured interval raised to [`MIN_POLL_INTERVAL`].
	pub fn effective_interval(&self) -> Duration {
		self.interval.max(MIN_POLL_INTERVAL)
	}
}

/// How the seen-set is kept bounded. Exactly one policy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenPolicy {
	/// Once the set grows past `max`, keep only the `keep` most recent ids.
	Capacity { max: usize, keep: usize },
	/// Clear the whole set on an independent timer so refilled postings re-alert.
	PeriodicClear { every: Duration },
}

impl Default for SeenPolicy {
	fn default() -> Self {
		SeenPolicy::Capacity { max: 1000, keep: 500 }
	}
}

impl SeenPolicy {
	pub fn validate(&self) -> Result<()> {
		match *self {
			SeenPolicy::Capacity { max, keep } if keep == 0 || keep > max => Err(WatchError::Config(format!(
				"seen-set capacity must satisfy 0 < keep <= max (got keep={}, max={})",
				keep, max
			))),
			SeenPolicy::PeriodicClear { every } if every.is_zero() => {
				Err(WatchError::Config("seen-set clear interval must be positive".into()))
			}
			_ => Ok(()),
		}
	}

	pub fn clear_interval(&self) -> Option<Duration> {
		match *self {
			SeenPolicy::PeriodicClear { every } => Some(every),
			SeenPolicy::Capacity { .. } => None,
		}
	}
}

/// Alert pacing.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
	pub max_per_cycle: usize,
	pub send_delay: Duration,
	/// Wait applied on 429 when the provider does not say how long.
	pub rate_limit_cooldown: Duration,
	pub max_rate_limit_retries: u32,
}

impl Default for DispatchConfig {
	fn default() -> Self {
		Self {
			max_per_cycle: 10,
			send_delay: Duration::from_secs(1),
			rate_limit_cooldown: Duration::from_secs(5),
			max_rate_limit_retries: 5,
		}
	}
}

#[derive(Clone)]
pub struct TelegramConfig {
	pub api_base: String,
	pub bot_token: String,
	pub chat_id: String,
	pub request_timeout: Duration,
}

impl Default for TelegramConfig {
	fn default() -> Self {
		Self {
			api_base: DEFAULT_TELEGRAM_API.to_string(),
			bot_token: String::new(),
			chat_id: String::new(),
			request_timeout: Duration::from_secs(10),
		}
	}
}

impl std::fmt::Debug for TelegramConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TelegramConfig")
			.field("api_base", &self.api_base)
			.field("bot_token", &"<redacted>")
			.field("chat_id", &self.chat_id)
			.finish()
	}
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
	pub interval: Duration,
}

impl Default for HealthConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(5 * 60),
		}
	}
}
