//! JSON-RPC connection over the browser's DevTools WebSocket.
//!
//! Requests carry a sequential `id`; responses are correlated back to the
//! waiting caller through a oneshot channel. Messages without an `id` are
//! events and are only logged. Commands addressed to a page target carry the
//! flat-mode `sessionId` returned by `Target.attachToTarget`.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send`] with method and params
//! 2. Connection allocates an id and parks a oneshot sender under it
//! 3. The writer task serializes the request onto the socket
//! 4. The reader task receives the response and completes the oneshot
//! 5. Caller observes the result, or a timeout after `command_timeout`

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{CdpError, Result};

type Callbacks = Arc<Mutex<HashMap<u64, Pending>>>;

struct Pending {
	method: String,
	tx: oneshot::Sender<Result<Value>>,
}

/// Outbound command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<'a> {
	pub id: u64,
	pub method: &'a str,
	pub params: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<&'a str>,
}

/// Error object attached to a failed command response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
	pub code: i64,
	pub message: String,
}

/// Inbound message; responses have an `id`, events do not.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
	Response {
		id: u64,
		#[serde(default)]
		result: Option<Value>,
		#[serde(default)]
		error: Option<ErrorPayload>,
	},
	Event {
		method: String,
		#[serde(default)]
		params: Value,
		#[serde(default, rename = "sessionId")]
		session_id: Option<String>,
	},
}

/// Live DevTools connection. Dropping it stops the socket tasks.
pub struct Connection {
	last_id: AtomicU64,
	callbacks: Callbacks,
	outbound: mpsc::UnboundedSender<Message>,
	command_timeout: Duration,
	reader: JoinHandle<()>,
	writer: JoinHandle<()>,
}

impl Connection {
	/// Opens the WebSocket at `ws_url` and spawns the reader/writer tasks.
	pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
		let (socket, _) = tokio::time::timeout(command_timeout, tokio_tungstenite::connect_async(ws_url))
			.await
			.map_err(|_| CdpError::Timeout {
				what: format!("websocket handshake with {}", ws_url),
				timeout: command_timeout,
			})??;
		debug!(target = "jobwatch.cdp", %ws_url, "devtools socket connected");

		let (mut ws_tx, mut ws_rx) = socket.split();
		let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
		let callbacks: Callbacks = Arc::new(Mutex::new(HashMap::new()));

		let writer = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = ws_tx.send(message).await {
					debug!(target = "jobwatch.cdp", error = %e, "devtools socket write failed");
					break;
				}
			}
			let _ = ws_tx.close().await;
		});

		let reader_callbacks = Arc::clone(&callbacks);
		let reader = tokio::spawn(async move {
			while let Some(frame) = ws_rx.next().await {
				match frame {
					Ok(Message::Text(text)) => match serde_json::from_str::<Incoming>(&text) {
						Ok(incoming) => dispatch(&reader_callbacks, incoming),
						Err(e) => warn!(target = "jobwatch.cdp", error = %e, "unparseable devtools message"),
					},
					Ok(Message::Close(_)) => break,
					Ok(_) => {}
					Err(e) => {
						debug!(target = "jobwatch.cdp", error = %e, "devtools socket read failed");
						break;
					}
				}
			}
			// Dropping the parked senders wakes every waiter with ChannelClosed.
			reader_callbacks.lock().clear();
			debug!(target = "jobwatch.cdp", "devtools message loop ended");
		});

		Ok(Self {
			last_id: AtomicU64::new(1),
			callbacks,
			outbound,
			command_timeout,
			reader,
			writer,
		})
	}

	/// Sends a browser-level command.
	pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
		self.send_to(None, method, params).await
	}

	/// Sends a command, scoped to a flat-mode target session when `session_id` is set.
	pub async fn send_to(&self, session_id: Option<&str>, method: &str, params: Value) -> Result<Value> {
		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(
			id,
			Pending {
				method: method.to_string(),
				tx,
			},
		);

		let request = Request {
			id,
			method,
			params,
			session_id,
		};
		let payload = serde_json::to_string(&request)?;
		trace!(target = "jobwatch.cdp", id, method, "sending devtools command");

		if self.outbound.send(Message::Text(payload.into())).is_err() {
			self.callbacks.lock().remove(&id);
			return Err(CdpError::ChannelClosed);
		}

		match tokio::time::timeout(self.command_timeout, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(CdpError::ChannelClosed),
			Err(_) => {
				self.callbacks.lock().remove(&id);
				Err(CdpError::Timeout {
					what: method.to_string(),
					timeout: self.command_timeout,
				})
			}
		}
	}

	/// Number of commands still waiting for a response.
	pub fn pending(&self) -> usize {
		self.callbacks.lock().len()
	}

	/// Stops the socket tasks; pending commands fail with [`CdpError::ChannelClosed`].
	pub fn close(&self) {
		self.reader.abort();
		self.writer.abort();
		self.callbacks.lock().clear();
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.close();
	}
}

fn dispatch(callbacks: &Callbacks, incoming: Incoming) {
	match incoming {
		Incoming::Response { id, result, error } => {
			let Some(pending) = callbacks.lock().remove(&id) else {
				debug!(target = "jobwatch.cdp", id, "response for unknown or expired request");
				return;
			};
			let outcome = match error {
				Some(error) => Err(CdpError::Protocol {
					method: pending.method,
					code: error.code,
					message: error.message,
				}),
				None => Ok(result.unwrap_or(Value::Null)),
			};
			// Receiver may have timed out already.
			let _ = pending.tx.send(outcome);
		}
		Incoming::Event { method, session_id, .. } => {
			trace!(target = "jobwatch.cdp", %method, session = ?session_id, "devtools event");
		}
	}
}
