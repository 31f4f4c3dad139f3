//! Alert delivery through the Telegram client against a fake Bot API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{BOT_TOKEN, CHAT_ID, FakeTelegram};
use jobwatch::config::DispatchConfig;
use jobwatch::dispatch::DeliveryReport;
use jobwatch::{AlertDispatcher, Listing, Messenger, TelegramMessenger, WatchError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn quick() -> DispatchConfig {
	DispatchConfig {
		max_per_cycle: 10,
		send_delay: Duration::ZERO,
		rate_limit_cooldown: Duration::from_millis(20),
		max_rate_limit_retries: 5,
	}
}

fn batch(ids: &[&str]) -> Vec<Listing> {
	ids.iter().map(|id| Listing::with_id(*id, format!("Role {}", id))).collect()
}

async fn dispatcher(bot: &FakeTelegram) -> AlertDispatcher {
	let messenger = TelegramMessenger::new(bot.config()).unwrap();
	AlertDispatcher::new(Arc::new(messenger), quick(), "https://jobs.test/?id=")
}

#[tokio::test]
async fn send_message_payload_is_html_to_configured_chat() {
	common::init_tracing();
	let bot = FakeTelegram::spawn().await;
	let messenger = TelegramMessenger::new(bot.config()).unwrap();

	messenger.send("<b>hello</b>").await.unwrap();

	assert_eq!(bot.paths.lock().as_slice(), [format!("/bot{}/sendMessage", BOT_TOKEN)]);
	let message = bot.messages.lock()[0].clone();
	assert_eq!(message["chat_id"], CHAT_ID);
	assert_eq!(message["text"], "<b>hello</b>");
	assert_eq!(message["parse_mode"], "HTML");
	assert_eq!(message["disable_web_page_preview"], true);
}

#[tokio::test]
async fn rate_limit_on_second_item_resends_only_that_item() {
	let bot = FakeTelegram::spawn().await;
	*bot.throttle_once.lock() = Some("Role J2".into());
	let dispatcher = dispatcher(&bot).await;

	let report = dispatcher.deliver(&batch(&["J1", "J2", "J3"])).await;

	assert_eq!(
		report,
		DeliveryReport {
			sent: 3,
			failed: 0,
			dropped: 0,
			rate_limited: 1
		}
	);
	let order: Vec<String> = bot
		.texts()
		.iter()
		.map(|t| t.lines().next().unwrap_or_default().to_string())
		.collect();
	assert_eq!(order, ["<b>Role J1</b>", "<b>Role J2</b>", "<b>Role J2</b>", "<b>Role J3</b>"]);
}

#[tokio::test]
async fn retry_after_hint_is_surfaced() {
	let bot = FakeTelegram::spawn().await;
	*bot.throttle_once.lock() = Some("ping".into());
	*bot.retry_after.lock() = Some(7);
	let messenger = TelegramMessenger::new(bot.config()).unwrap();

	let err = messenger.send("ping").await.unwrap_err();
	assert!(matches!(
		err,
		WatchError::DeliveryRateLimited {
			retry_after: Some(d)
		} if d == Duration::from_secs(7)
	));
}

#[tokio::test]
async fn rejected_message_is_skipped() {
	let bot = FakeTelegram::spawn().await;
	*bot.reject.lock() = Some("Role J2".into());
	let dispatcher = dispatcher(&bot).await;

	let report = dispatcher.deliver(&batch(&["J1", "J2", "J3"])).await;
	assert_eq!(report.sent, 2);
	assert_eq!(report.failed, 1);
	assert_eq!(bot.texts().len(), 3);

	let bot_direct = TelegramMessenger::new(bot.config()).unwrap();
	let err = bot_direct.send("Role J2 again").await.unwrap_err();
	match err {
		WatchError::DeliveryFailed(reason) => {
			assert!(reason.contains("chat not found"));
			assert!(!reason.contains(BOT_TOKEN));
		}
		other => panic!("unexpected error: {other}"),
	}
}

#[tokio::test]
async fn unreachable_api_error_hides_bot_token() {
	let port = jobwatch_cdp::process::pick_free_port().unwrap();
	let mut config = FakeTelegram::spawn().await.config();
	config.api_base = format!("http://127.0.0.1:{}", port);
	let messenger = TelegramMessenger::new(config).unwrap();

	match messenger.send("hello").await {
		Err(WatchError::DeliveryFailed(reason)) => assert!(!reason.contains(BOT_TOKEN), "{reason}"),
		other => panic!("unexpected outcome: {other:?}"),
	}
}

#[tokio::test]
async fn dispatcher_task_drains_channel_until_cancelled() {
	let bot = FakeTelegram::spawn().await;
	let dispatcher = Arc::new(dispatcher(&bot).await);
	let (tx, rx) = mpsc::unbounded_channel();
	let cancel = CancellationToken::new();
	let task = tokio::spawn(Arc::clone(&dispatcher).run(rx, cancel.clone()));

	tx.send(batch(&["A"])).unwrap();
	tx.send(batch(&["B", "C"])).unwrap();
	for _ in 0..50 {
		if bot.texts().len() == 3 {
			break;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	cancel.cancel();
	task.await.unwrap();

	assert_eq!(bot.texts().len(), 3);
	assert_eq!(dispatcher.stats().snapshot().sent, 3);
}
