//! In-process fakes for the listings API, the Telegram Bot API and the credential source.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use chrono::{TimeDelta, Utc};
use jobwatch::config::{ListingsConfig, TelegramConfig};
use jobwatch::{Credential, CredentialProvider, ExpiryBasis, TokenOrigin};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Hands out `token-0`, `token-1`, ... each valid for an hour.
#[derive(Default)]
pub struct DirectProvider {
	pub calls: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for DirectProvider {
	async fn extract_credential(&self) -> jobwatch::Result<Credential> {
		let n = self.calls.fetch_add(1, Ordering::SeqCst);
		let now = Utc::now();
		Ok(Credential::new(format!("token-{}", n), now, now + TimeDelta::hours(1), TokenOrigin::Direct, ExpiryBasis::Claims))
	}
}

impl DirectProvider {
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

pub fn job_card(id: &str) -> Value {
	json!({
		"jobId": id,
		"jobTitle": format!("Role {}", id),
		"city": "Reno",
		"state": "NV",
		"totalPayRateMin": 18.5,
		"totalPayRateMax": 21.0,
		"currencyCode": "USD",
		"scheduleCount": 2,
		"employmentType": "Full Time"
	})
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListingsMode {
	Serve,
	/// 401 for this bearer only.
	RejectBearer(String),
	RejectAll,
	/// 200 carrying an AppSync unauthorized error for this bearer.
	GraphQlUnauthorized(String),
	Status(u16),
}

pub struct FakeListings {
	pub addr: SocketAddr,
	pub hits: AtomicUsize,
	pub auth_headers: Mutex<Vec<String>>,
	pub origins: Mutex<Vec<Option<String>>>,
	pub bodies: Mutex<Vec<Value>>,
	pub mode: Mutex<ListingsMode>,
	pub cards: Mutex<Vec<Value>>,
}

impl FakeListings {
	pub async fn spawn(ids: &[&str]) -> Arc<Self> {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let api = Arc::new(Self {
			addr: listener.local_addr().unwrap(),
			hits: AtomicUsize::new(0),
			auth_headers: Mutex::new(Vec::new()),
			origins: Mutex::new(Vec::new()),
			bodies: Mutex::new(Vec::new()),
			mode: Mutex::new(ListingsMode::Serve),
			cards: Mutex::new(ids.iter().map(|id| job_card(id)).collect()),
		});
		let app = Router::new().route("/graphql", post(graphql)).with_state(Arc::clone(&api));
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
		api
	}

	pub fn config(&self) -> ListingsConfig {
		ListingsConfig {
			endpoint: format!("http://{}/graphql", self.addr),
			request_timeout: Duration::from_secs(2),
			..Default::default()
		}
	}

	pub fn set_mode(&self, mode: ListingsMode) {
		*self.mode.lock() = mode;
	}

	pub fn set_ids(&self, ids: &[&str]) {
		*self.cards.lock() = ids.iter().map(|id| job_card(id)).collect();
	}

	pub fn hits(&self) -> usize {
		self.hits.load(Ordering::SeqCst)
	}
}

async fn graphql(State(api): State<Arc<FakeListings>>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
	api.hits.fetch_add(1, Ordering::SeqCst);
	let auth = headers
		.get("authorization")
		.and_then(|v| v.to_str().ok())
		.unwrap_or_default()
		.to_string();
	api.auth_headers.lock().push(auth.clone());
	api.origins.lock().push(headers.get("origin").and_then(|v| v.to_str().ok()).map(str::to_string));
	api.bodies.lock().push(body);

	let bearer = auth.strip_prefix("Bearer ").unwrap_or_default();
	let unauthorized = (
		StatusCode::UNAUTHORIZED,
		Json(json!({ "errors": [{ "errorType": "UnauthorizedException", "message": "Unauthorized" }] })),
	);
	let mode = api.mode.lock().clone();
	match mode {
		ListingsMode::RejectAll => return unauthorized,
		ListingsMode::RejectBearer(ref rejected) if rejected == bearer => return unauthorized,
		ListingsMode::GraphQlUnauthorized(ref rejected) if rejected == bearer => {
			return (
				StatusCode::OK,
				Json(json!({ "data": null, "errors": [{ "errorType": "UnauthorizedException", "message": "Valid authorization header not provided." }] })),
			);
		}
		ListingsMode::Status(code) => {
			let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
			return (status, Json(json!({ "message": "upstream unavailable" })));
		}
		_ => {}
	}

	let cards = api.cards.lock().clone();
	(
		StatusCode::OK,
		Json(json!({ "data": { "searchJobCardsByLocation": { "nextToken": null, "jobCards": cards } } })),
	)
}

pub const BOT_TOKEN: &str = "123456:TEST-TOKEN";
pub const CHAT_ID: &str = "-1001234";

/// Records every `sendMessage` call; scripted replies by message content.
pub struct FakeTelegram {
	pub addr: SocketAddr,
	pub paths: Mutex<Vec<String>>,
	pub messages: Mutex<Vec<Value>>,
	/// First message containing this text gets a 429.
	pub throttle_once: Mutex<Option<String>>,
	pub retry_after: Mutex<Option<u64>>,
	/// Messages containing this text always get a 400.
	pub reject: Mutex<Option<String>>,
}

impl FakeTelegram {
	pub async fn spawn() -> Arc<Self> {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let bot = Arc::new(Self {
			addr: listener.local_addr().unwrap(),
			paths: Mutex::new(Vec::new()),
			messages: Mutex::new(Vec::new()),
			throttle_once: Mutex::new(None),
			retry_after: Mutex::new(None),
			reject: Mutex::new(None),
		});
		let app = Router::new().fallback(send_message).with_state(Arc::clone(&bot));
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
		bot
	}

	pub fn config(&self) -> TelegramConfig {
		TelegramConfig {
			api_base: format!("http://{}", self.addr),
			bot_token: BOT_TOKEN.to_string(),
			chat_id: CHAT_ID.to_string(),
			request_timeout: Duration::from_secs(2),
		}
	}

	pub fn texts(&self) -> Vec<String> {
		self.messages
			.lock()
			.iter()
			.map(|m| m["text"].as_str().unwrap_or_default().to_string())
			.collect()
	}
}

async fn send_message(State(bot): State<Arc<FakeTelegram>>, uri: Uri, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
	bot.paths.lock().push(uri.path().to_string());
	let text = body["text"].as_str().unwrap_or_default().to_string();
	bot.messages.lock().push(body);

	{
		let mut throttle = bot.throttle_once.lock();
		if throttle.as_deref().is_some_and(|needle| text.contains(needle)) {
			*throttle = None;
			let mut reply = json!({ "ok": false, "error_code": 429, "description": "Too Many Requests" });
			if let Some(secs) = *bot.retry_after.lock() {
				reply["parameters"] = json!({ "retry_after": secs });
			}
			return (StatusCode::TOO_MANY_REQUESTS, Json(reply));
		}
	}
	if bot.reject.lock().as_deref().is_some_and(|needle| text.contains(needle)) {
		return (
			StatusCode::BAD_REQUEST,
			Json(json!({ "ok": false, "error_code": 400, "description": "Bad Request: chat not found" })),
		);
	}

	(StatusCode::OK, Json(json!({ "ok": true, "result": { "message_id": 1 } })))
}
