//! Bearer credential extraction from a headless browser session.
//!
//! The target site mints its API credential client-side and parks it in web
//! storage. Each extraction attempt opens a fresh browser, lets the page
//! settle, scans storage, decodes the candidate's expiry and proves it against
//! the live API before handing it out.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobwatch_cdp::{HeadlessSession, SessionOptions, StorageSnapshot};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::TokenConfig;
use crate::credential::{Credential, TokenOrigin};
use crate::error::{Result, WatchError};

/// Three base64url segments with a JSON-header prefix (`{"` encodes to `eyJ`).
static TOKEN_SIGNATURE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+").expect("token signature regex should compile"));

/// Source of fresh, verified credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
	async fn extract_credential(&self) -> Result<Credential>;
}

/// Source of raw web storage to search.
#[async_trait]
pub trait StorageProvider: Send + Sync {
	async fn snapshot(&self) -> Result<StorageSnapshot>;
}

/// Live check that a candidate credential is accepted by the API.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
	async fn verify(&self, credential: &Credential) -> Result<()>;
}

/// Storage read from a brand-new headless browser per call.
pub struct BrowserStorage {
	options: SessionOptions,
	target_url: String,
}

impl BrowserStorage {
	pub fn new(options: SessionOptions, target_url: impl Into<String>) -> Self {
		Self {
			options,
			target_url: target_url.into(),
		}
	}
}

#[async_trait]
impl StorageProvider for BrowserStorage {
	async fn snapshot(&self) -> Result<StorageSnapshot> {
		let mut session = HeadlessSession::start(self.options.clone()).await?;
		let outcome = async {
			session.load_session(&self.target_url).await?;
			session.read_storage().await
		}
		.await;
		session.stop().await;
		Ok(outcome?)
	}
}

/// Extractor with bounded retries and the near-expiry policy.
pub struct TokenExtractor<S, V> {
	storage: S,
	verifier: V,
	config: TokenConfig,
}

impl<S: StorageProvider, V: CredentialVerifier> TokenExtractor<S, V> {
	pub fn new(storage: S, verifier: V, config: TokenConfig) -> Self {
		Self { storage, verifier, config }
	}

	async fn attempt(&self, last_resort: bool) -> Result<Credential> {
		let snapshot = self.storage.snapshot().await?;
		let (token, origin) = find_token(&snapshot, &self.config).ok_or(WatchError::NotFound)?;

		let now = Utc::now();
		let credential = Credential::from_bearer(token, origin, self.config.assumed_validity, now);
		debug!(
			target = "jobwatch.token",
			origin = %credential.origin(),
			expires_at = %credential.expires_at(),
			basis = ?credential.basis(),
			"candidate credential found"
		);

		check_freshness(&credential, now, &self.config, last_resort)?;
		self.verifier.verify(&credential).await?;
		Ok(credential)
	}
}

#[async_trait]
impl<S: StorageProvider, V: CredentialVerifier> CredentialProvider for TokenExtractor<S, V> {
	async fn extract_credential(&self) -> Result<Credential> {
		let attempts = self.config.max_attempts.max(1);
		let mut last_error = String::from("no attempt made");

		for attempt in 1..=attempts {
			match self.attempt(attempt == attempts).await {
				Ok(credential) => {
					info!(
						target = "jobwatch.token",
						attempt,
						origin = %credential.origin(),
						expires_at = %credential.expires_at(),
						fingerprint = %credential.fingerprint(),
						"credential extracted and verified"
					);
					return Ok(credential);
				}
				Err(WatchError::DriverUnavailable(msg)) => return Err(WatchError::DriverUnavailable(msg)),
				Err(e) => {
					warn!(target = "jobwatch.token", attempt, attempts, error = %e, "extraction attempt failed");
					last_error = e.to_string();
				}
			}

			if attempt < attempts {
				tokio::time::sleep(self.config.retry_delay).await;
			}
		}

		Err(WatchError::ExtractionFailed { attempts, last_error })
	}
}

/// Rejects expired or soon-to-expire candidates.
///
/// On the last attempt a candidate inside the near-expiry window is still
/// accepted while it clears the lifecycle guard margin.
pub(crate) fn check_freshness(credential: &Credential, now: DateTime<Utc>, config: &TokenConfig, last_resort: bool) -> Result<()> {
	if credential.is_usable(now, config.near_expiry_window) {
		return Ok(());
	}

	let remaining_secs = credential.remaining(now).num_seconds();
	if last_resort && credential.is_usable(now, config.guard_margin) {
		warn!(
			target = "jobwatch.token",
			remaining_secs, "accepting short-lived credential on final attempt"
		);
		return Ok(());
	}

	Err(WatchError::NearExpiry { remaining_secs })
}

/// Searches storage in priority order; the first hit wins.
///
/// 1. the well-known key in `localStorage`
/// 2. any `localStorage` value containing a token-shaped string
/// 3. the same two checks against `sessionStorage`
pub fn find_token(snapshot: &StorageSnapshot, config: &TokenConfig) -> Option<(String, TokenOrigin)> {
	let key = config.storage_key.as_str();
	let min_len = config.min_token_len;

	if let Some(token) = snapshot.local.get(key).and_then(|v| token_from_known_key(v, min_len)) {
		return Some((token, TokenOrigin::LocalKey(key.to_string())));
	}
	if let Some((name, token)) = scan(snapshot.local.iter(), min_len) {
		return Some((token, TokenOrigin::LocalScan(name)));
	}
	if let Some(token) = snapshot.session.get(key).and_then(|v| token_from_known_key(v, min_len)) {
		return Some((token, TokenOrigin::SessionKey(key.to_string())));
	}
	scan(snapshot.session.iter(), min_len).map(|(name, token)| (token, TokenOrigin::SessionScan(name)))
}

fn scan<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>, min_len: usize) -> Option<(String, String)> {
	entries.into_iter().find_map(|(name, value)| signature_match(value, min_len).map(|token| (name.clone(), token)))
}

/// The well-known key may hold an opaque token, so a plain long value is accepted too.
fn token_from_known_key(value: &str, min_len: usize) -> Option<String> {
	if let Some(token) = signature_match(value, min_len) {
		return Some(token);
	}
	let unwrapped = unwrap_value(value);
	(unwrapped.len() >= min_len && !unwrapped.contains(char::is_whitespace)).then(|| unwrapped.to_string())
}

fn signature_match(value: &str, min_len: usize) -> Option<String> {
	TOKEN_SIGNATURE
		.find_iter(value)
		.map(|m| m.as_str())
		.find(|candidate| candidate.len() >= min_len)
		.map(str::to_string)
}

fn unwrap_value(value: &str) -> &str {
	let value = value.trim().trim_matches('"');
	value.strip_prefix("Bearer ").unwrap_or(value).trim()
}
