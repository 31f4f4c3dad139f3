//! Wires the components together and supervises their tasks.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::WatchConfig;
use crate::dispatch::{AlertDispatcher, Messenger, TelegramMessenger};
use crate::error::{Result, WatchError};
use crate::extractor::{BrowserStorage, CredentialProvider, TokenExtractor};
use crate::health::HealthReporter;
use crate::lifecycle::{TokenManager, run_refresh_timer};
use crate::listings::ListingsClient;
use crate::poller::{AlertBatch, PollEngine};
use crate::seen::{SeenSet, SharedSeenSet, run_periodic_clear};

pub struct Monitor {
	config: WatchConfig,
	tokens: Arc<TokenManager>,
	seen: SharedSeenSet,
	engine: Arc<PollEngine>,
	dispatcher: Arc<AlertDispatcher>,
	health: Arc<HealthReporter>,
	alerts: mpsc::UnboundedReceiver<AlertBatch>,
}

impl Monitor {
	/// Production wiring: browser-backed extraction, live listings API, Telegram delivery.
	pub fn build(config: WatchConfig) -> Result<Self> {
		config.validate()?;

		let listings = ListingsClient::new(config.listings.clone())?;
		let storage = BrowserStorage::new(config.browser.session_options(), config.browser.target_url.clone());
		let extractor = TokenExtractor::new(storage, listings.clone(), config.token.clone());
		let messenger = TelegramMessenger::new(config.telegram.clone())?;

		Ok(Self::from_parts(config, Arc::new(extractor), listings, Arc::new(messenger)))
	}

	/// Wiring with caller-supplied credential source and messenger.
	pub fn from_parts(config: WatchConfig, provider: Arc<dyn CredentialProvider>, listings: ListingsClient, messenger: Arc<dyn Messenger>) -> Self {
		let tokens = Arc::new(TokenManager::new(provider, config.token.guard_margin));
		let seen: SharedSeenSet = Arc::new(Mutex::new(SeenSet::new(config.seen)));
		let (tx, alerts) = mpsc::unbounded_channel();

		let job_url_base = listings.config().job_url_base.clone();
		let engine = Arc::new(PollEngine::new(Arc::clone(&tokens), listings, Arc::clone(&seen), tx, config.poll.effective_interval()));
		let dispatcher = Arc::new(AlertDispatcher::new(messenger, config.dispatch.clone(), job_url_base));
		let health = Arc::new(HealthReporter::new(Arc::clone(&tokens), Arc::clone(&seen), engine.stats(), dispatcher.stats()));

		Self {
			config,
			tokens,
			seen,
			engine,
			dispatcher,
			health,
			alerts,
		}
	}

	pub fn tokens(&self) -> Arc<TokenManager> {
		Arc::clone(&self.tokens)
	}

	pub fn health(&self) -> Arc<HealthReporter> {
		Arc::clone(&self.health)
	}

	/// Primes the credential, then runs every task until `cancel` fires.
	///
	/// A failed prime is returned as-is. A panicking task cancels the rest and
	/// yields [`WatchError::TaskFailed`].
	pub async fn run(self, cancel: CancellationToken) -> Result<()> {
		let credential = tokio::select! {
			_ = cancel.cancelled() => return Ok(()),
			primed = self.tokens.prime() => primed?,
		};
		info!(
			target = "jobwatch.token",
			expires_at = %credential.expires_at(),
			origin = %credential.origin(),
			"initial credential ready"
		);

		let mut tasks = JoinSet::new();
		tasks.spawn(Arc::clone(&self.engine).run(cancel.clone()));
		tasks.spawn(run_refresh_timer(Arc::clone(&self.tokens), self.config.token.refresh_interval, cancel.clone()));
		if let Some(every) = self.config.seen.clear_interval() {
			tasks.spawn(run_periodic_clear(Arc::clone(&self.seen), every, cancel.clone()));
		}
		tasks.spawn(Arc::clone(&self.dispatcher).run(self.alerts, cancel.clone()));
		tasks.spawn(Arc::clone(&self.health).run(self.config.health.interval, cancel.clone()));
		info!(target = "jobwatch.monitor", tasks = tasks.len(), seen_policy = ?self.config.seen, "monitor running");

		let mut failure = None;
		while let Some(joined) = tasks.join_next().await {
			match joined {
				Err(e) if e.is_panic() => {
					error!(target = "jobwatch.monitor", error = %e, "task panicked; shutting down");
					cancel.cancel();
					failure.get_or_insert_with(|| e.to_string());
				}
				_ => {}
			}
		}

		info!(target = "jobwatch.monitor", "monitor stopped");
		match failure {
			Some(reason) => Err(WatchError::TaskFailed(reason)),
			None => Ok(()),
		}
	}
}
