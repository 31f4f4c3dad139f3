use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use jobwatch::config::{
	BrowserConfig, DEFAULT_LISTINGS_ENDPOINT, DEFAULT_TARGET_URL, DispatchConfig, GeoFilter, HealthConfig, ListingsConfig, PollConfig, TelegramConfig,
	TokenConfig,
};
use jobwatch::{SeenPolicy, WatchConfig};

#[derive(Parser, Debug)]
#[command(name = "jobwatch")]
#[command(about = "Watch a job-listings API and push new postings to Telegram")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Telegram bot token
	#[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
	pub bot_token: String,

	/// Telegram chat receiving alerts
	#[arg(long, env = "TELEGRAM_CHAT_ID")]
	pub chat_id: String,

	/// Page whose scripts mint the API credential
	#[arg(long, env = "JOBWATCH_TARGET_URL", default_value = DEFAULT_TARGET_URL)]
	pub target_url: String,

	/// Listings GraphQL endpoint
	#[arg(long, env = "JOBWATCH_LISTINGS_ENDPOINT", default_value = DEFAULT_LISTINGS_ENDPOINT)]
	pub listings_endpoint: String,

	/// Chromium executable (searched on PATH when omitted)
	#[arg(long, env = "JOBWATCH_CHROME", value_name = "PATH")]
	pub chrome: Option<PathBuf>,

	/// Show the browser window during extraction
	#[arg(long)]
	pub headed: bool,

	/// Pass --no-sandbox to Chromium (containers running as root)
	#[arg(long)]
	pub no_sandbox: bool,

	/// Seconds to let the page settle before reading storage
	#[arg(long, default_value_t = 12, value_name = "SECS")]
	pub settle_secs: u64,

	/// Poll interval in milliseconds (floored at 500)
	#[arg(long, default_value_t = 1000, value_name = "MS")]
	pub poll_ms: u64,

	/// Proactive credential renewal period in minutes
	#[arg(long, default_value_t = 55, value_name = "MINS")]
	pub refresh_mins: u64,

	/// How the seen-set stays bounded
	#[arg(long, value_enum, default_value = "capacity")]
	pub seen_policy: SeenPolicyArg,

	/// Capacity policy: prune once the set grows past this
	#[arg(long, default_value_t = 1000)]
	pub seen_max: usize,

	/// Capacity policy: most recent ids kept after pruning
	#[arg(long, default_value_t = 500)]
	pub seen_keep: usize,

	/// Clear policy: seconds between full clears
	#[arg(long, default_value_t = 30, value_name = "SECS")]
	pub seen_clear_secs: u64,

	/// Most alerts sent per poll cycle
	#[arg(long, default_value_t = 10)]
	pub max_alerts: usize,

	/// Milliseconds between consecutive alerts
	#[arg(long, default_value_t = 1000, value_name = "MS")]
	pub send_delay_ms: u64,

	/// Only postings starting within this many days
	#[arg(long, default_value_t = 21, value_name = "DAYS")]
	pub date_window: u32,

	/// Weekly hours filter, e.g. 20-40
	#[arg(long, value_parser = parse_hours, value_name = "MIN-MAX")]
	pub hours: Option<(u32, u32)>,

	/// Search center latitude
	#[arg(long, requires = "lng", allow_hyphen_values = true)]
	pub lat: Option<f64>,

	/// Search center longitude
	#[arg(long, requires = "lat", allow_hyphen_values = true)]
	pub lng: Option<f64>,

	/// Search radius in miles
	#[arg(long, default_value_t = 30, value_name = "MILES")]
	pub distance: u32,

	/// Seconds between health summaries
	#[arg(long, default_value_t = 300, value_name = "SECS")]
	pub health_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SeenPolicyArg {
	/// Prune to the most recent ids past a size limit
	Capacity,
	/// Forget everything on a fixed timer
	Clear,
}

fn parse_hours(raw: &str) -> std::result::Result<(u32, u32), String> {
	let (min, max) = raw.split_once('-').ok_or_else(|| format!("expected MIN-MAX, got '{}'", raw))?;
	let min: u32 = min.trim().parse().map_err(|_| format!("invalid minimum hours '{}'", min))?;
	let max: u32 = max.trim().parse().map_err(|_| format!("invalid maximum hours '{}'", max))?;
	if min > max {
		return Err(format!("minimum hours {} exceeds maximum {}", min, max));
	}
	Ok((min, max))
}

impl Cli {
	/// Builds and validates the runtime configuration.
	pub fn into_config(self) -> Result<WatchConfig> {
		let seen = match self.seen_policy {
			SeenPolicyArg::Capacity => SeenPolicy::Capacity {
				max: self.seen_max,
				keep: self.seen_keep,
			},
			SeenPolicyArg::Clear => SeenPolicy::PeriodicClear {
				every: Duration::from_secs(self.seen_clear_secs),
			},
		};
		let geo = match (self.lat, self.lng) {
			(Some(lat), Some(lng)) => Some(GeoFilter {
				lat,
				lng,
				distance: self.distance,
			}),
			_ => None,
		};

		let config = WatchConfig {
			browser: BrowserConfig {
				target_url: self.target_url,
				executable: self.chrome,
				headless: !self.headed,
				no_sandbox: self.no_sandbox,
				settle: Duration::from_secs(self.settle_secs),
				..Default::default()
			},
			token: TokenConfig {
				refresh_interval: Duration::from_secs(self.refresh_mins.saturating_mul(60)),
				..Default::default()
			},
			listings: ListingsConfig {
				endpoint: self.listings_endpoint,
				date_window_days: self.date_window,
				hours_per_week: self.hours,
				geo,
				..Default::default()
			},
			poll: PollConfig {
				interval: Duration::from_millis(self.poll_ms),
			},
			seen,
			dispatch: DispatchConfig {
				max_per_cycle: self.max_alerts,
				send_delay: Duration::from_millis(self.send_delay_ms),
				..Default::default()
			},
			telegram: TelegramConfig {
				bot_token: self.bot_token,
				chat_id: self.chat_id,
				..Default::default()
			},
			health: HealthConfig {
				interval: Duration::from_secs(self.health_secs),
			},
		};
		config.validate().context("invalid configuration")?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(extra: &[&str]) -> Cli {
		let mut args = vec!["jobwatch", "--bot-token", "123:abc", "--chat-id", "-100200"];
		args.extend_from_slice(extra);
		Cli::try_parse_from(args).unwrap()
	}

	#[test]
	fn defaults_build_capacity_config() {
		let config = parse(&[]).into_config().unwrap();
		assert_eq!(config.seen, SeenPolicy::Capacity { max: 1000, keep: 500 });
		assert_eq!(config.poll.interval, Duration::from_secs(1));
		assert_eq!(config.token.refresh_interval, Duration::from_secs(55 * 60));
		assert!(config.browser.headless);
		assert_eq!(config.listings.geo, None);
	}

	#[test]
	fn clear_policy_and_filters_are_applied() {
		let config = parse(&["--seen-policy", "clear", "--seen-clear-secs", "45", "--hours", "20-40", "--lat", "39.5", "--lng", "-119.8", "-vv"])
			.into_config()
			.unwrap();
		assert_eq!(
			config.seen,
			SeenPolicy::PeriodicClear {
				every: Duration::from_secs(45)
			}
		);
		assert_eq!(config.listings.hours_per_week, Some((20, 40)));
		let geo = config.listings.geo.unwrap();
		assert_eq!(geo.lng, -119.8);
		assert_eq!(geo.distance, 30);
	}

	#[test]
	fn verbosity_counts() {
		assert_eq!(parse(&["-vv"]).verbose, 2);
	}

	#[test]
	fn bad_hours_are_rejected_at_parse_time() {
		let args = ["jobwatch", "--bot-token", "t", "--chat-id", "c", "--hours", "40-20"];
		assert!(Cli::try_parse_from(args).is_err());
		assert!(parse_hours("abc").is_err());
		assert_eq!(parse_hours(" 8 - 12 "), Ok((8, 12)));
	}

	#[test]
	fn latitude_requires_longitude() {
		let args = ["jobwatch", "--bot-token", "t", "--chat-id", "c", "--lat", "39.5"];
		assert!(Cli::try_parse_from(args).is_err());
	}

	#[test]
	fn invalid_capacity_fails_validation() {
		let err = parse(&["--seen-max", "10", "--seen-keep", "20"]).into_config().unwrap_err();
		assert!(format!("{:#}", err).contains("keep"));
	}

	#[test]
	fn zero_refresh_period_fails_validation() {
		assert!(parse(&["--refresh-mins", "0"]).into_config().is_err());
		assert!(parse(&["--health-secs", "0"]).into_config().is_err());
	}

	#[test]
	fn blank_secrets_fail_validation() {
		let cli = Cli::try_parse_from(["jobwatch", "--bot-token", " ", "--chat-id", "c"]).unwrap();
		assert!(cli.into_config().is_err());
	}
}
