use anyhow::{Context, Result};
use jobwatch::{Monitor, WatchConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs the monitor until SIGINT/SIGTERM. Returns an error for anything fatal.
pub async fn run(config: WatchConfig) -> Result<()> {
	info!(
		target = "jobwatch",
		target_url = %config.browser.target_url,
		poll_ms = config.poll.effective_interval().as_millis() as u64,
		seen_policy = ?config.seen,
		"starting"
	);
	let monitor = Monitor::build(config).context("failed to set up monitor")?;

	let cancel = CancellationToken::new();
	let on_signal = cancel.clone();
	tokio::spawn(async move {
		shutdown_signal().await;
		info!(target = "jobwatch", "shutdown requested");
		on_signal.cancel();
	});

	monitor.run(cancel).await.context("monitor stopped with an error")
}

async fn shutdown_signal() {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(_) => std::future::pending::<()>().await,
		}
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}
}
