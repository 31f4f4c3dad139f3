//! Browser process launch.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::{CdpError, Result};
use crate::finder::find_chrome_executable;
use crate::discovery::{CdpVersionInfo, EndpointDiscovery};
use crate::process::pick_free_port;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);
const VERSION_REQUEST_TIMEOUT: Duration = Duration::from_millis(400);

/// Knobs that shape the browser command line.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
	/// Explicit executable; discovered from well-known locations when unset.
	pub executable: Option<PathBuf>,
	pub headless: bool,
	/// Adds `--no-sandbox`, needed when running as root in containers.
	pub no_sandbox: bool,
	/// How long to wait for the debugging endpoint after spawning.
	pub startup_timeout: Duration,
	pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
	fn default() -> Self {
		Self {
			executable: None,
			headless: true,
			no_sandbox: false,
			startup_timeout: Duration::from_secs(15),
			extra_args: Vec::new(),
		}
	}
}

/// A running browser with remote debugging enabled.
///
/// The process is killed and its throwaway profile removed when this value
/// is dropped.
#[derive(Debug)]
pub struct LaunchedBrowser {
	child: Child,
	pub port: u16,
	pub info: CdpVersionInfo,
	_profile: TempDir,
}

impl LaunchedBrowser {
	/// Kills the process and waits for it to exit.
	pub async fn shutdown(mut self) {
		if let Err(e) = self.child.kill().await {
			debug!(target = "jobwatch.cdp", error = %e, "browser already exited");
		}
	}
}

/// Spawns a browser on a free port and waits until its DevTools endpoint answers.
pub async fn launch(options: &LaunchOptions) -> Result<LaunchedBrowser> {
	let executable = match &options.executable {
		Some(path) => path.clone(),
		None => find_chrome_executable().ok_or_else(|| {
			CdpError::Launch(
				"could not find a Chrome/Chromium executable; install Chromium or pass its path explicitly".into(),
			)
		})?,
	};

	let port = pick_free_port().map_err(|e| CdpError::Launch(format!("no free port for remote debugging: {}", e)))?;
	let profile = tempfile::Builder::new()
		.prefix("jobwatch-profile-")
		.tempdir()
		.map_err(|e| CdpError::Launch(format!("failed to create profile directory: {}", e)))?;

	let args = browser_args(options, port, profile.path());
	debug!(target = "jobwatch.cdp", executable = %executable.display(), ?args, "launching browser");

	let mut cmd = Command::new(&executable);
	cmd.args(&args)
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.kill_on_drop(true);

	#[cfg(unix)]
	cmd.process_group(0);

	let mut child = cmd
		.spawn()
		.map_err(|e| CdpError::Launch(format!("failed to launch {}: {}", executable.display(), e)))?;

	let discovery = EndpointDiscovery::new(VERSION_REQUEST_TIMEOUT)?;
	let deadline = tokio::time::Instant::now() + options.startup_timeout;
	let mut last_error = "endpoint not reachable".to_string();
	while tokio::time::Instant::now() < deadline {
		tokio::time::sleep(READY_POLL_INTERVAL).await;

		if let Ok(Some(status)) = child.try_wait() {
			return Err(CdpError::Launch(format!(
				"browser exited before its debugging endpoint became available (status: {}); \
				 missing shared libraries or sandbox restrictions are the usual cause",
				status
			)));
		}

		match discovery.version(port).await {
			Ok(info) => {
				info!(
					target = "jobwatch.cdp",
					port,
					browser = info.browser.as_deref().unwrap_or("unknown"),
					"browser launched"
				);
				return Ok(LaunchedBrowser {
					child,
					port,
					info,
					_profile: profile,
				});
			}
			Err(e) => last_error = e.to_string(),
		}
	}

	let _ = child.kill().await;
	Err(CdpError::Launch(format!(
		"debugging endpoint not available on port {} after {:?}: {}",
		port, options.startup_timeout, last_error
	)))
}

pub(crate) fn browser_args(options: &LaunchOptions, port: u16, profile: &Path) -> Vec<String> {
	let mut args = vec![
		format!("--remote-debugging-port={}", port),
		format!("--user-data-dir={}", profile.display()),
		"--no-first-run".to_string(),
		"--no-default-browser-check".to_string(),
		"--disable-gpu".to_string(),
		"--disable-dev-shm-usage".to_string(),
		"--disable-extensions".to_string(),
		"--disable-background-networking".to_string(),
	];

	if options.headless {
		args.push("--headless=new".to_string());
	}
	if options.no_sandbox {
		args.push("--no-sandbox".to_string());
	}
	args.extend(options.extra_args.iter().cloned());
	args.push("about:blank".to_string());
	args
}
