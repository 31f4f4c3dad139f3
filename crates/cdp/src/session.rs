//! Single-page headless browser session.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{CdpError, Result};
use crate::launcher::{self, LaunchOptions, LaunchedBrowser};
use crate::storage::{STORAGE_DUMP_SCRIPT, StorageSnapshot};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
	pub launch: LaunchOptions,
	/// Upper bound for `Page.navigate` plus the wait for `document.readyState`.
	pub navigation_timeout: Duration,
	/// Fixed wait after load so the page's own scripts can populate storage.
	pub settle: Duration,
	/// Upper bound for every other DevTools command.
	pub command_timeout: Duration,
	/// Overrides the `HeadlessChrome` user agent when set.
	pub user_agent: Option<String>,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			launch: LaunchOptions::default(),
			navigation_timeout: Duration::from_secs(30),
			settle: Duration::from_secs(12),
			command_timeout: Duration::from_secs(30),
			user_agent: None,
		}
	}
}

/// An isolated browser context with one attached page.
///
/// Obtained from [`HeadlessSession::start`] (launches its own browser) or
/// [`HeadlessSession::attach`] (uses an existing DevTools endpoint).
/// [`HeadlessSession::stop`] is idempotent; dropping the session also kills a
/// browser it launched.
pub struct HeadlessSession {
	options: SessionOptions,
	browser: Option<LaunchedBrowser>,
	connection: Option<Connection>,
	browser_context_id: String,
	target_id: String,
	page_session_id: String,
}

impl HeadlessSession {
	/// Launches a fresh browser and opens an isolated page in it.
	///
	/// Only spawn failures surface as [`CdpError::Launch`]. Page setup errors on a
	/// running browser keep their own variant; the browser is killed on the way out.
	pub async fn start(options: SessionOptions) -> Result<Self> {
		let browser = launcher::launch(&options.launch).await?;
		let ws_url = browser.info.web_socket_debugger_url.clone();

		Self::open(options, &ws_url, Some(browser)).await.inspect_err(|e| {
			warn!(target = "jobwatch.cdp", error = %e, "browser started but page setup failed");
		})
	}

	/// Opens an isolated page on an already running browser at `ws_url`.
	pub async fn attach(options: SessionOptions, ws_url: &str) -> Result<Self> {
		Self::open(options, ws_url, None).await
	}

	async fn open(options: SessionOptions, ws_url: &str, browser: Option<LaunchedBrowser>) -> Result<Self> {
		let connection = Connection::connect(ws_url, options.command_timeout).await?;

		let context = connection.send("Target.createBrowserContext", json!({ "disposeOnDetach": true })).await?;
		let browser_context_id = string_field(&context, "browserContextId")?;

		let target = connection
			.send(
				"Target.createTarget",
				json!({ "url": "about:blank", "browserContextId": browser_context_id }),
			)
			.await?;
		let target_id = string_field(&target, "targetId")?;

		let attached = connection
			.send("Target.attachToTarget", json!({ "targetId": target_id, "flatten": true }))
			.await?;
		let page_session_id = string_field(&attached, "sessionId")?;

		connection.send_to(Some(&page_session_id), "Page.enable", json!({})).await?;
		if let Some(user_agent) = &options.user_agent {
			connection
				.send_to(Some(&page_session_id), "Network.setUserAgentOverride", json!({ "userAgent": user_agent }))
				.await?;
		}

		debug!(
			target = "jobwatch.cdp",
			context = %browser_context_id,
			target_id = %target_id,
			"page session opened"
		);

		Ok(Self {
			options,
			browser,
			connection: Some(connection),
			browser_context_id,
			target_id,
			page_session_id,
		})
	}

	/// Navigates to `url`, waits for the document to load, then waits the settle period.
	pub async fn load_session(&self, url: &str) -> Result<()> {
		let timeout = self.options.navigation_timeout;
		let deadline = tokio::time::Instant::now() + timeout;

		let navigate = self.page_command("Page.navigate", json!({ "url": url }));
		let result = tokio::time::timeout(timeout, navigate).await.map_err(|_| CdpError::Timeout {
			what: format!("navigation to {}", url),
			timeout,
		})??;

		if let Some(reason) = result.get("errorText").and_then(Value::as_str).filter(|s| !s.is_empty()) {
			return Err(CdpError::Navigation {
				url: url.to_string(),
				reason: reason.to_string(),
			});
		}

		self.wait_for_load(url, deadline).await?;
		info!(target = "jobwatch.cdp", %url, settle = ?self.options.settle, "page loaded; settling");
		tokio::time::sleep(self.options.settle).await;
		Ok(())
	}

	async fn wait_for_load(&self, url: &str, deadline: tokio::time::Instant) -> Result<()> {
		loop {
			let state = self.evaluate("document.readyState").await?;
			if state.pointer("/result/value").and_then(Value::as_str) == Some("complete") {
				return Ok(());
			}
			if tokio::time::Instant::now() + READY_POLL_INTERVAL > deadline {
				return Err(CdpError::Timeout {
					what: format!("load of {}", url),
					timeout: self.options.navigation_timeout,
				});
			}
			tokio::time::sleep(READY_POLL_INTERVAL).await;
		}
	}

	/// Dumps `localStorage` and `sessionStorage` of the current page.
	pub async fn read_storage(&self) -> Result<StorageSnapshot> {
		let result = self.evaluate(STORAGE_DUMP_SCRIPT).await?;
		let snapshot = StorageSnapshot::from_evaluate_result(&result)?;
		debug!(
			target = "jobwatch.cdp",
			local = snapshot.local.len(),
			session = snapshot.session.len(),
			"storage read"
		);
		Ok(snapshot)
	}

	async fn evaluate(&self, expression: &str) -> Result<Value> {
		self.page_command("Runtime.evaluate", json!({ "expression": expression, "returnByValue": true }))
			.await
	}

	async fn page_command(&self, method: &str, params: Value) -> Result<Value> {
		let connection = self.connection.as_ref().ok_or(CdpError::ChannelClosed)?;
		connection.send_to(Some(&self.page_session_id), method, params).await
	}

	pub fn target_id(&self) -> &str {
		&self.target_id
	}

	/// Releases the page, the browser context and a launched browser process.
	pub async fn stop(&mut self) {
		if let Some(connection) = self.connection.take() {
			let dispose = connection.send(
				"Target.disposeBrowserContext",
				json!({ "browserContextId": self.browser_context_id }),
			);
			if tokio::time::timeout(CLOSE_TIMEOUT, dispose).await.is_err() {
				warn!(target = "jobwatch.cdp", "browser context dispose timed out");
			}
			if self.browser.is_some() {
				let _ = tokio::time::timeout(CLOSE_TIMEOUT, connection.send("Browser.close", json!({}))).await;
			}
			connection.close();
		}

		if let Some(browser) = self.browser.take() {
			browser.shutdown().await;
			debug!(target = "jobwatch.cdp", "browser stopped");
		}
	}
}

fn string_field(value: &Value, field: &str) -> Result<String> {
	value
		.get(field)
		.and_then(Value::as_str)
		.map(str::to_string)
		.ok_or_else(|| CdpError::Payload(format!("missing `{}` in {}", field, value)))
}
