//! Error types for the CDP driver.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CdpError>;

#[derive(Debug, Error)]
pub enum CdpError {
	/// The browser process could not be started or never exposed its endpoint.
	#[error("browser launch failed: {0}")]
	Launch(String),

	#[error("DevTools endpoint not found: {0}")]
	Discovery(String),

	/// Error object returned by the browser for a command.
	#[error("CDP error {code} in {method}: {message}")]
	Protocol { method: String, code: i64, message: String },

	#[error("timed out after {timeout:?} waiting for {what}")]
	Timeout { what: String, timeout: Duration },

	#[error("navigation to {url} failed: {reason}")]
	Navigation { url: String, reason: String },

	#[error("CDP connection closed")]
	ChannelClosed,

	#[error("unexpected CDP payload: {0}")]
	Payload(String),

	#[error("websocket transport error: {0}")]
	Transport(#[from] tokio_tungstenite::tungstenite::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl CdpError {
	/// Returns `true` when the browser runtime itself is unusable, as opposed
	/// to a failure of one navigation or command.
	pub fn is_launch_failure(&self) -> bool {
		matches!(self, CdpError::Launch(_))
	}
}
