//! Credential lifecycle: validity tracking and single-flight renewal.
//!
//! ```text
//! Empty ──get/renew──▶ Extracting ──ok──▶ Valid ──time──▶ NearExpiry ──get──▶ Extracting
//!   ▲                      │                 │
//!   └────────fail──────────┘◀──invalidate────┘
//! ```
//!
//! Renewals are serialized by one async lock. A caller that queued behind an
//! in-flight renewal takes that renewal's outcome instead of starting another,
//! so any number of concurrent callers cost exactly one extraction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::{Result, WatchError};
use crate::extractor::CredentialProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
	Empty,
	Extracting,
	Valid,
	/// Held but inside the guard margin; the next request renews it.
	NearExpiry,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone)]
pub struct TokenStatus {
	pub phase: TokenPhase,
	pub expires_at: Option<DateTime<Utc>>,
	pub renewals: u64,
	pub extractions: u64,
	pub last_failure: Option<String>,
}

#[derive(Default)]
struct TokenState {
	credential: Option<Arc<Credential>>,
	extracting: bool,
	/// Completed renewal rounds, successful or not.
	rounds: u64,
	last_failure: Option<String>,
}

/// Owns the current credential and decides when to renew it.
pub struct TokenManager {
	provider: Arc<dyn CredentialProvider>,
	guard_margin: Duration,
	state: Mutex<TokenState>,
	renewal: tokio::sync::Mutex<()>,
	extractions: AtomicU64,
}

impl TokenManager {
	pub fn new(provider: Arc<dyn CredentialProvider>, guard_margin: Duration) -> Self {
		Self {
			provider,
			guard_margin,
			state: Mutex::new(TokenState::default()),
			renewal: tokio::sync::Mutex::new(()),
			extractions: AtomicU64::new(0),
		}
	}

	/// Returns a credential valid beyond the guard margin, renewing when needed.
	///
	/// Fails with [`WatchError::TokenUnavailable`] when renewal fails; the
	/// caller is expected to skip its cycle and try again later.
	pub async fn get_valid_token(&self) -> Result<Arc<Credential>> {
		let observed = {
			let state = self.state.lock();
			if let Some(credential) = self.usable(&state) {
				return Ok(credential);
			}
			state.rounds
		};

		let _renewal = self.renewal.lock().await;
		{
			let state = self.state.lock();
			if let Some(credential) = self.usable(&state) {
				return Ok(credential);
			}
			if state.rounds != observed {
				let reason = state.last_failure.clone().unwrap_or_else(|| "credential was invalidated".to_string());
				return Err(WatchError::TokenUnavailable(reason));
			}
		}

		self.renew_locked("on demand")
			.await
			.map_err(|e| WatchError::TokenUnavailable(e.to_string()))
	}

	/// Startup extraction. Errors are returned unchanged so the caller can treat them as fatal.
	pub async fn prime(&self) -> Result<Arc<Credential>> {
		let _renewal = self.renewal.lock().await;
		self.renew_locked("startup").await
	}

	/// Proactive renewal regardless of the current credential's validity.
	///
	/// Coalesces with a renewal that completed while this call was waiting.
	pub async fn renew(&self) -> Result<Arc<Credential>> {
		let observed = self.state.lock().rounds;
		let _renewal = self.renewal.lock().await;
		{
			let state = self.state.lock();
			if state.rounds != observed {
				debug!(target = "jobwatch.token", "renewal already ran while waiting; reusing its outcome");
				return self
					.usable(&state)
					.ok_or_else(|| WatchError::TokenUnavailable("concurrent renewal failed".into()));
			}
		}
		self.renew_locked("scheduled").await
	}

	/// Drops the current credential so the next request extracts a new one.
	pub fn invalidate(&self) {
		let mut state = self.state.lock();
		if let Some(old) = state.credential.take() {
			info!(target = "jobwatch.token", fingerprint = %old.fingerprint(), "credential invalidated");
		}
	}

	/// Drops `rejected` only if it is still the current credential.
	///
	/// A fetch that started before a renewal may report its stale credential as
	/// rejected; the replacement must survive that.
	pub fn invalidate_if(&self, rejected: &Arc<Credential>) {
		let mut state = self.state.lock();
		match &state.credential {
			Some(current) if Arc::ptr_eq(current, rejected) => {
				state.credential = None;
				info!(target = "jobwatch.token", fingerprint = %rejected.fingerprint(), "credential invalidated");
			}
			_ => debug!(target = "jobwatch.token", fingerprint = %rejected.fingerprint(), "rejected credential already replaced"),
		}
	}

	pub fn phase(&self) -> TokenPhase {
		let state = self.state.lock();
		self.phase_of(&state)
	}

	pub fn status(&self) -> TokenStatus {
		let state = self.state.lock();
		TokenStatus {
			phase: self.phase_of(&state),
			expires_at: state.credential.as_ref().map(|c| c.expires_at()),
			renewals: state.rounds,
			extractions: self.extractions.load(Ordering::Relaxed),
			last_failure: state.last_failure.clone(),
		}
	}

	fn phase_of(&self, state: &TokenState) -> TokenPhase {
		if state.extracting {
			return TokenPhase::Extracting;
		}
		match &state.credential {
			None => TokenPhase::Empty,
			Some(c) if c.is_usable(Utc::now(), self.guard_margin) => TokenPhase::Valid,
			Some(_) => TokenPhase::NearExpiry,
		}
	}

	fn usable(&self, state: &TokenState) -> Option<Arc<Credential>> {
		state
			.credential
			.as_ref()
			.filter(|c| c.is_usable(Utc::now(), self.guard_margin))
			.cloned()
	}

	/// Runs one extraction. Must be called with the renewal lock held.
	async fn renew_locked(&self, reason: &'static str) -> Result<Arc<Credential>> {
		let _mark = ExtractingMark::set(&self.state);
		info!(target = "jobwatch.token", reason, "renewing credential");

		let outcome = self.provider.extract_credential().await;
		self.extractions.fetch_add(1, Ordering::Relaxed);

		let mut state = self.state.lock();
		state.rounds += 1;
		let now = Utc::now();

		match outcome {
			Ok(credential) if credential.is_usable(now, self.guard_margin) => {
				let credential = Arc::new(credential);
				info!(
					target = "jobwatch.token",
					expires_at = %credential.expires_at(),
					remaining_secs = credential.remaining(now).num_seconds(),
					origin = %credential.origin(),
					"credential accepted"
				);
				state.credential = Some(Arc::clone(&credential));
				state.last_failure = None;
				Ok(credential)
			}
			Ok(credential) => {
				let remaining_secs = credential.remaining(now).num_seconds();
				warn!(target = "jobwatch.token", remaining_secs, "provider returned credential inside guard margin");
				state.last_failure = Some(format!("credential inside guard margin ({}s left)", remaining_secs));
				self.retain_if_usable(&mut state, now);
				Err(WatchError::NearExpiry { remaining_secs })
			}
			Err(e) => {
				warn!(target = "jobwatch.token", reason, error = %e, "credential renewal failed");
				state.last_failure = Some(e.to_string());
				self.retain_if_usable(&mut state, now);
				Err(e)
			}
		}
	}

	/// A failed renewal keeps a still-valid credential; anything else becomes `Empty`.
	fn retain_if_usable(&self, state: &mut TokenState, now: DateTime<Utc>) {
		if !state.credential.as_ref().is_some_and(|c| c.is_usable(now, self.guard_margin)) {
			state.credential = None;
		}
	}
}

/// Flags the state as `Extracting` for the lifetime of the value, even if the
/// renewal future is dropped part-way.
struct ExtractingMark<'a>(&'a Mutex<TokenState>);

impl<'a> ExtractingMark<'a> {
	fn set(state: &'a Mutex<TokenState>) -> Self {
		state.lock().extracting = true;
		Self(state)
	}
}

impl Drop for ExtractingMark<'_> {
	fn drop(&mut self) {
		self.0.lock().extracting = false;
	}
}

/// Renews the credential every `interval` until cancelled. Failures are logged only.
pub async fn run_refresh_timer(tokens: Arc<TokenManager>, interval: Duration, cancel: CancellationToken) {
	let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => {}
		}

		let renewed = tokio::select! {
			_ = cancel.cancelled() => break,
			renewed = tokens.renew() => renewed,
		};
		match renewed {
			Ok(credential) => debug!(target = "jobwatch.token", expires_at = %credential.expires_at(), "scheduled renewal done"),
			Err(e) => warn!(target = "jobwatch.token", error = %e, "scheduled renewal failed; polling will retry on demand"),
		}
	}
	debug!(target = "jobwatch.token", "refresh timer stopped");
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use async_trait::async_trait;
	use chrono::TimeDelta;

	use super::*;
	use crate::credential::{ExpiryBasis, TokenOrigin};

	const GUARD: Duration = Duration::from_secs(5 * 60);

	/// Hands out credentials with scripted lifetimes, numbered by call.
	struct FakeProvider {
		lifetimes: Mutex<Vec<Option<i64>>>,
		calls: AtomicUsize,
		delay: Duration,
	}

	impl FakeProvider {
		fn new(lifetimes: Vec<Option<i64>>, delay: Duration) -> Arc<Self> {
			Arc::new(Self {
				lifetimes: Mutex::new(lifetimes),
				calls: AtomicUsize::new(0),
				delay,
			})
		}
	}

	#[async_trait]
	impl CredentialProvider for FakeProvider {
		async fn extract_credential(&self) -> Result<Credential> {
			let n = self.calls.fetch_add(1, Ordering::SeqCst);
			tokio::time::sleep(self.delay).await;
			let lifetime = {
				let mut lifetimes = self.lifetimes.lock();
				if lifetimes.is_empty() { Some(60) } else { lifetimes.remove(0) }
			};
			match lifetime {
				Some(minutes) => {
					let now = Utc::now();
					Ok(Credential::new(
						format!("token-{}", n),
						now,
						now + TimeDelta::minutes(minutes),
						TokenOrigin::Direct,
						ExpiryBasis::Claims,
					))
				}
				None => Err(WatchError::ExtractionFailed {
					attempts: 3,
					last_error: "nothing in storage".into(),
				}),
			}
		}
	}

	#[tokio::test]
	async fn concurrent_requests_share_one_extraction() {
		let provider = FakeProvider::new(vec![Some(60)], Duration::from_millis(50));
		let tokens = Arc::new(TokenManager::new(provider.clone(), GUARD));

		let handles: Vec<_> = (0..8)
			.map(|_| {
				let tokens = Arc::clone(&tokens);
				tokio::spawn(async move { tokens.get_valid_token().await })
			})
			.collect();

		for handle in handles {
			assert_eq!(handle.await.unwrap().unwrap().bearer(), "token-0");
		}
		assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
		assert_eq!(tokens.phase(), TokenPhase::Valid);
	}

	#[tokio::test]
	async fn waiters_share_a_failed_outcome_too() {
		let provider = FakeProvider::new(vec![None, Some(60)], Duration::from_millis(50));
		let tokens = Arc::new(TokenManager::new(provider.clone(), GUARD));

		let handles: Vec<_> = (0..4)
			.map(|_| {
				let tokens = Arc::clone(&tokens);
				tokio::spawn(async move { tokens.get_valid_token().await })
			})
			.collect();

		for handle in handles {
			assert!(matches!(handle.await.unwrap(), Err(WatchError::TokenUnavailable(_))));
		}
		assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
		assert_eq!(tokens.phase(), TokenPhase::Empty);

		assert_eq!(tokens.get_valid_token().await.unwrap().bearer(), "token-1");
	}

	#[tokio::test]
	async fn credential_inside_guard_margin_triggers_renewal() {
		let provider = FakeProvider::new(vec![Some(60), Some(60)], Duration::ZERO);
		let tokens = TokenManager::new(provider.clone(), GUARD);

		// Seed a credential expiring in three minutes.
		{
			let now = Utc::now();
			tokens.state.lock().credential = Some(Arc::new(Credential::new(
				"short",
				now,
				now + TimeDelta::minutes(3),
				TokenOrigin::Direct,
				ExpiryBasis::Claims,
			)));
		}
		assert_eq!(tokens.phase(), TokenPhase::NearExpiry);

		let credential = tokens.get_valid_token().await.unwrap();
		assert_eq!(credential.bearer(), "token-0");
		assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn invalidated_credential_is_never_returned_again() {
		let provider = FakeProvider::new(vec![Some(60), Some(60)], Duration::ZERO);
		let tokens = TokenManager::new(provider, GUARD);

		let first = tokens.get_valid_token().await.unwrap();
		assert_eq!(tokens.get_valid_token().await.unwrap().bearer(), first.bearer());

		tokens.invalidate();
		assert_eq!(tokens.phase(), TokenPhase::Empty);
		let second = tokens.get_valid_token().await.unwrap();
		assert_ne!(second.bearer(), first.bearer());
	}

	#[tokio::test]
	async fn stale_rejection_leaves_renewed_credential_in_place() {
		let provider = FakeProvider::new(vec![Some(60), Some(60)], Duration::ZERO);
		let tokens = TokenManager::new(provider.clone(), GUARD);

		let stale = tokens.prime().await.unwrap();
		let renewed = tokens.renew().await.unwrap();

		tokens.invalidate_if(&stale);
		assert_eq!(tokens.phase(), TokenPhase::Valid);
		assert!(Arc::ptr_eq(&tokens.get_valid_token().await.unwrap(), &renewed));
		assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

		tokens.invalidate_if(&renewed);
		assert_eq!(tokens.phase(), TokenPhase::Empty);
	}

	#[tokio::test]
	async fn accepted_credentials_always_clear_the_guard_margin() {
		// Provider hands back a credential that is already inside the guard margin.
		let provider = FakeProvider::new(vec![Some(3)], Duration::ZERO);
		let tokens = TokenManager::new(provider, GUARD);

		assert!(matches!(tokens.get_valid_token().await, Err(WatchError::TokenUnavailable(_))));
		assert_eq!(tokens.phase(), TokenPhase::Empty);

		let credential = tokens.get_valid_token().await.unwrap();
		assert!(credential.is_usable(Utc::now(), GUARD));
	}

	#[tokio::test]
	async fn prime_surfaces_extraction_failure_unchanged() {
		let provider = FakeProvider::new(vec![None], Duration::ZERO);
		let tokens = TokenManager::new(provider, GUARD);

		let err = tokens.prime().await.unwrap_err();
		assert!(matches!(err, WatchError::ExtractionFailed { attempts: 3, .. }));
		assert!(err.is_fatal_at_startup());
		assert!(tokens.status().last_failure.is_some());
	}

	#[tokio::test]
	async fn failed_scheduled_renewal_keeps_valid_credential() {
		let provider = FakeProvider::new(vec![Some(60), None], Duration::ZERO);
		let tokens = TokenManager::new(provider.clone(), GUARD);

		let first = tokens.prime().await.unwrap();
		assert!(tokens.renew().await.is_err());
		assert_eq!(tokens.phase(), TokenPhase::Valid);
		assert_eq!(tokens.get_valid_token().await.unwrap().bearer(), first.bearer());
		assert_eq!(tokens.status().renewals, 2);
	}

	#[tokio::test]
	async fn scheduled_renewal_replaces_credential() {
		let provider = FakeProvider::new(vec![Some(60), Some(60)], Duration::ZERO);
		let tokens = TokenManager::new(provider, GUARD);

		let first = tokens.prime().await.unwrap();
		let second = tokens.renew().await.unwrap();
		assert_ne!(first.bearer(), second.bearer());
		assert_eq!(tokens.get_valid_token().await.unwrap().bearer(), second.bearer());
	}

	#[tokio::test]
	async fn refresh_timer_renews_until_cancelled() {
		let provider = FakeProvider::new(Vec::new(), Duration::ZERO);
		let tokens = Arc::new(TokenManager::new(provider.clone(), GUARD));
		let cancel = CancellationToken::new();

		let timer = tokio::spawn(run_refresh_timer(Arc::clone(&tokens), Duration::from_millis(20), cancel.clone()));
		tokio::time::sleep(Duration::from_millis(110)).await;
		cancel.cancel();
		timer.await.unwrap();

		let calls = provider.calls.load(Ordering::SeqCst);
		assert!(calls >= 2, "expected several renewals, got {calls}");
		assert_eq!(tokens.phase(), TokenPhase::Valid);
	}
}
