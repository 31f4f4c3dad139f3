//! Bearer credential and its decoded validity window.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

/// Where a credential was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOrigin {
	/// The well-known key in `localStorage`.
	LocalKey(String),
	/// Signature match in some other `localStorage` entry.
	LocalScan(String),
	SessionKey(String),
	SessionScan(String),
	/// Supplied without browser extraction.
	Direct,
}

impl fmt::Display for TokenOrigin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TokenOrigin::LocalKey(key) => write!(f, "localStorage[{}]", key),
			TokenOrigin::LocalScan(key) => write!(f, "localStorage scan ({})", key),
			TokenOrigin::SessionKey(key) => write!(f, "sessionStorage[{}]", key),
			TokenOrigin::SessionScan(key) => write!(f, "sessionStorage scan ({})", key),
			TokenOrigin::Direct => f.write_str("direct"),
		}
	}
}

/// Whether the expiry came from the token itself or was assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryBasis {
	Claims,
	Assumed,
}

/// Immutable bearer credential. Renewal replaces it wholesale.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	bearer: String,
	issued_at: DateTime<Utc>,
	expires_at: DateTime<Utc>,
	origin: TokenOrigin,
	basis: ExpiryBasis,
}

impl Credential {
	pub fn new(bearer: impl Into<String>, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>, origin: TokenOrigin, basis: ExpiryBasis) -> Self {
		Self {
			bearer: bearer.into(),
			issued_at,
			expires_at,
			origin,
			basis,
		}
	}

	/// Builds a credential from a raw token, reading `iat`/`exp` from its claims.
	///
	/// Undecodable claims fall back to `now + assumed_validity`.
	pub fn from_bearer(bearer: impl Into<String>, origin: TokenOrigin, assumed_validity: Duration, now: DateTime<Utc>) -> Self {
		let bearer = bearer.into();
		let claims = decode_claims(&bearer).unwrap_or_default();

		let (expires_at, basis) = match claims.exp {
			Some(exp) => (exp, ExpiryBasis::Claims),
			None => (
				now.checked_add_signed(to_delta(assumed_validity)).unwrap_or(DateTime::<Utc>::MAX_UTC),
				ExpiryBasis::Assumed,
			),
		};

		Self {
			bearer,
			issued_at: claims.iat.unwrap_or(now),
			expires_at,
			origin,
			basis,
		}
	}

	pub fn bearer(&self) -> &str {
		&self.bearer
	}

	pub fn issued_at(&self) -> DateTime<Utc> {
		self.issued_at
	}

	pub fn expires_at(&self) -> DateTime<Utc> {
		self.expires_at
	}

	pub fn origin(&self) -> &TokenOrigin {
		&self.origin
	}

	pub fn basis(&self) -> ExpiryBasis {
		self.basis
	}

	/// Time left before the real expiry (negative once expired).
	pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
		self.expires_at - now
	}

	/// `true` while `now < expiry - guard`.
	pub fn is_usable(&self, now: DateTime<Utc>, guard: Duration) -> bool {
		self.expires_at
			.checked_sub_signed(to_delta(guard))
			.is_some_and(|deadline| now < deadline)
	}

	/// Short suffix safe to log.
	pub fn fingerprint(&self) -> String {
		let tail: String = self.bearer.chars().rev().take(6).collect::<Vec<_>>().into_iter().rev().collect();
		format!("…{}", tail)
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credential")
			.field("bearer", &self.fingerprint())
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("origin", &self.origin)
			.field("basis", &self.basis)
			.finish()
	}
}

/// Timestamps recovered from a token's payload segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Claims {
	pub iat: Option<DateTime<Utc>>,
	pub exp: Option<DateTime<Utc>>,
}

/// Decodes the middle segment of a three-segment token as JSON claims.
///
/// Returns `None` when the token does not have three segments or the payload
/// is not base64 JSON.
pub fn decode_claims(token: &str) -> Option<Claims> {
	let mut segments = token.split('.');
	let (_, payload, _) = (segments.next()?, segments.next()?, segments.next()?);
	if segments.next().is_some() {
		return None;
	}

	let payload = payload.trim_end_matches('=');
	let bytes = URL_SAFE_NO_PAD.decode(payload).or_else(|_| STANDARD_NO_PAD.decode(payload)).ok()?;
	let value: Value = serde_json::from_slice(&bytes).ok()?;
	if !value.is_object() {
		return None;
	}

	Some(Claims {
		iat: value.get("iat").and_then(timestamp),
		exp: value.get("exp").and_then(timestamp),
	})
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
	let secs = match value {
		Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
		Value::String(s) => s.parse().ok()?,
		_ => return None,
	};
	DateTime::from_timestamp(secs, 0)
}

pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
	TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	/// Builds an unsigned token whose payload carries the given claims.
	pub(crate) fn token_with_claims(claims: Value) -> String {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
		let signature = "c2lnbmF0dXJlLXBsYWNlaG9sZGVyLWZvci10ZXN0cy1vbmx5LXBhZGRpbmctcGFkZGluZw";
		format!("{}.{}.{}", header, payload, signature)
	}

	fn at(secs: i64) -> DateTime<Utc> {
		DateTime::from_timestamp(secs, 0).unwrap()
	}

	#[test]
	fn claims_are_decoded_from_payload_segment() {
		let token = token_with_claims(serde_json::json!({"iat": 1_700_000_000, "exp": 1_700_003_600, "sub": "anon"}));
		let claims = decode_claims(&token).unwrap();
		assert_eq!(claims.iat, Some(at(1_700_000_000)));
		assert_eq!(claims.exp, Some(at(1_700_003_600)));
	}

	#[test]
	fn padded_and_string_claims_are_tolerated() {
		let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":"1700003600"}"#);
		let token = format!("eyJh.{}.sig", payload);
		assert_eq!(decode_claims(&token).unwrap().exp, Some(at(1_700_003_600)));
	}

	#[test]
	fn malformed_tokens_have_no_claims() {
		assert_eq!(decode_claims("not-a-token"), None);
		assert_eq!(decode_claims("a.b.c.d"), None);
		assert_eq!(decode_claims("eyJh.!!!.sig"), None);
		let array_payload = URL_SAFE_NO_PAD.encode("[1,2]");
		assert_eq!(decode_claims(&format!("h.{}.s", array_payload)), None);
	}

	#[test]
	fn undecodable_token_gets_assumed_window() {
		let now = at(1_700_000_000);
		let credential = Credential::from_bearer("opaque.value.here", TokenOrigin::Direct, Duration::from_secs(55 * 60), now);
		assert_eq!(credential.basis(), ExpiryBasis::Assumed);
		assert_eq!(credential.issued_at(), now);
		assert_eq!(credential.expires_at(), now + TimeDelta::minutes(55));
	}

	#[test]
	fn usable_respects_guard_margin() {
		let now = at(1_700_000_000);
		let credential = Credential::new("t", now, now + TimeDelta::minutes(3), TokenOrigin::Direct, ExpiryBasis::Claims);
		assert!(credential.is_usable(now, Duration::from_secs(60)));
		assert!(!credential.is_usable(now, Duration::from_secs(5 * 60)));
		assert_eq!(credential.remaining(now), TimeDelta::minutes(3));
	}

	#[test]
	fn debug_output_never_contains_bearer() {
		let token = token_with_claims(serde_json::json!({"exp": 1_700_003_600}));
		let credential = Credential::from_bearer(token.clone(), TokenOrigin::LocalKey("sessionToken".into()), Duration::ZERO, Utc::now());
		let rendered = format!("{:?}", credential);
		assert!(!rendered.contains(&token));
		assert!(rendered.contains(&credential.fingerprint()));
	}
}
