//! Error taxonomy for the watcher.
//!
//! Steady-state failures are all recoverable: the poll loop logs them and
//! moves on. Only [`WatchError::is_fatal_at_startup`] variants stop the process,
//! and only while priming the first credential.

use std::time::Duration;

use jobwatch_cdp::CdpError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
	/// The headless browser could not be launched at all.
	#[error("browser driver unavailable: {0}")]
	DriverUnavailable(String),

	/// Every extraction attempt failed.
	#[error("credential extraction failed after {attempts} attempt(s): {last_error}")]
	ExtractionFailed { attempts: u32, last_error: String },

	/// Storage held nothing that looks like a bearer credential.
	#[error("no credential found in browser storage")]
	NotFound,

	/// An extracted credential is expired or about to expire.
	#[error("extracted credential expires too soon ({remaining_secs}s left)")]
	NearExpiry { remaining_secs: i64 },

	/// No usable credential right now; the caller should skip this cycle.
	#[error("no valid credential available: {0}")]
	TokenUnavailable(String),

	/// The listings API refused the credential (401/403 or an unauthorized GraphQL error).
	#[error("listings API rejected credential (status {status})")]
	ApiRejected { status: u16 },

	#[error("listings API transient error: {0}")]
	ApiTransient(String),

	#[error("messaging provider rate limited; retry after {retry_after:?}")]
	DeliveryRateLimited { retry_after: Option<Duration> },

	#[error("message delivery failed: {0}")]
	DeliveryFailed(String),

	/// A background task panicked; the process must stop.
	#[error("background task failed: {0}")]
	TaskFailed(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("browser session error: {0}")]
	Browser(#[source] CdpError),

	#[error(transparent)]
	Http(#[from] reqwest::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl WatchError {
	/// Failures that end the process when they happen before the first tick.
	pub fn is_fatal_at_startup(&self) -> bool {
		matches!(self, WatchError::DriverUnavailable(_) | WatchError::ExtractionFailed { .. })
	}

	pub fn is_auth_rejection(&self) -> bool {
		matches!(self, WatchError::ApiRejected { .. })
	}
}

impl From<CdpError> for WatchError {
	fn from(err: CdpError) -> Self {
		if err.is_launch_failure() {
			WatchError::DriverUnavailable(err.to_string())
		} else {
			WatchError::Browser(err)
		}
	}
}
