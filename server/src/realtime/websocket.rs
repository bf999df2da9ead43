//! WebSocket wire protocol and connection handling.
//!
//! Inbound: `{"type":"subscribe","channel":...}`, `{"type":"unsubscribe",
//! "channel":...}`, `{"type":"pong"}`. Outbound: `subscribed`,
//! `unsubscribed`, `message`, `ping`, `error`. Connections are attached to
//! the hub of the site their Host header resolves to.

use axum::{
	extract::State,
	extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
	http::HeaderMap,
	response::Response,
};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::alias;
use crate::prelude::*;
use crate::realtime::Hub;
use crate::realtime::hub::{ClientHandle, Delivery, HubEvent, SEND_QUEUE_SIZE};
use fazt_types::utils::random_id;

/// Largest inbound frame accepted.
pub const READ_LIMIT: usize = 512 * 1024;
/// Application ping plus protocol ping cadence.
pub const PING_PERIOD: Duration = Duration::from_secs(30);
/// Grace period after a ping before the connection is considered dead.
pub const PONG_WAIT: Duration = Duration::from_secs(10);
/// Outbound frame write deadline.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// A message from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsInbound {
	Subscribe { channel: String },
	Unsubscribe { channel: String },
	Pong,
}

/// A message to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsOutbound {
	Subscribed { channel: String },
	Unsubscribed { channel: String },
	Message {
		#[serde(skip_serializing_if = "Option::is_none")]
		channel: Option<String>,
		data: serde_json::Value,
		timestamp: i64,
	},
	Ping,
	Error { error: String },
}

impl WsOutbound {
	pub fn to_frame(&self) -> FzResult<Arc<str>> {
		Ok(serde_json::to_string(self)?.into())
	}

	/// Channel message frame, serialized once for the whole fan-out.
	pub fn message_frame(channel: &str, data: &serde_json::Value) -> FzResult<Arc<str>> {
		Self::Message {
			channel: Some(channel.to_string()),
			data: data.clone(),
			timestamp: Timestamp::now_millis(),
		}
		.to_frame()
	}

	/// Hub-wide message frame without a channel.
	pub fn message_frame_all(data: &serde_json::Value) -> FzResult<Arc<str>> {
		Self::Message { channel: None, data: data.clone(), timestamp: Timestamp::now_millis() }
			.to_frame()
	}
}

/// Origin policy: accept an absent Origin, localhost origins, and origins
/// whose host matches the request's Host (ports stripped on both sides).
pub fn origin_allowed(origin: Option<&str>, host: &str) -> bool {
	let Some(origin) = origin else { return true };
	if origin.is_empty() {
		return true;
	}
	let Ok(parsed) = url::Url::parse(origin) else { return false };
	let Some(origin_host) = parsed.host_str() else { return false };
	if origin_host == "localhost" || origin_host == "127.0.0.1" {
		return true;
	}
	let request_host = host.rsplit_once(':').map_or(host, |(h, _)| h);
	origin_host == request_host
}

async fn close_with_error(mut socket: WebSocket, code: u16, reason: &'static str) {
	let _ = socket
		.send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
		.await;
	let _ = socket.close().await;
}

/// WebSocket upgrade handler. Resolves the Host to a site and attaches the
/// connection to that site's hub.
pub async fn get_ws(
	ws: WebSocketUpgrade,
	State(app): State<App>,
	headers: HeaderMap,
) -> Response {
	let host = headers
		.get(axum::http::header::HOST)
		.and_then(|h| h.to_str().ok())
		.unwrap_or_default()
		.to_string();
	let origin = headers.get(axum::http::header::ORIGIN).and_then(|h| h.to_str().ok());

	if !origin_allowed(origin, &host) {
		warn!("WebSocket rejected - origin {:?} not allowed for host {}", origin, host);
		return ws.on_upgrade(|socket| close_with_error(socket, 4403, "Origin not allowed"));
	}

	// WS only attaches to sites that actually serve an app (or the root
	// site); redirect and reserved aliases have no hub.
	let site_id = match alias::resolve(&app, &host, "ws", "/").await {
		alias::Resolution::App { site_id } => site_id.to_string(),
		alias::Resolution::Root => crate::vfs::SITE_ROOT.to_string(),
		alias::Resolution::Redirect { .. } | alias::Resolution::Reserved => {
			return ws.on_upgrade(|socket| close_with_error(socket, 4404, "No site here"));
		}
	};

	let ws = ws.max_message_size(READ_LIMIT);
	debug!("WebSocket upgrade for site '{}'", site_id);
	let hub = app.hubs.get_hub(&site_id);
	ws.on_upgrade(move |socket| handle_connection(socket, hub))
}

/// Drive one client connection: register with the hub, pump the send queue
/// out, parse and dispatch inbound messages, ping on a timer, and clean up
/// on the way out.
pub async fn handle_connection(ws: WebSocket, hub: Arc<Hub>) {
	let client_id: Box<str> = match random_id() {
		Ok(id) => id.into(),
		Err(_) => return,
	};
	info!("WS connect: {} (site={})", client_id, hub.site_id());

	let (queue_tx, mut queue_rx) = tokio::sync::mpsc::channel::<Delivery>(SEND_QUEUE_SIZE);
	let events = hub.events();
	let _ = events.send(HubEvent::Register(ClientHandle {
		client_id: client_id.clone(),
		tx: queue_tx,
		channels: HashSet::new(),
		connected_at: Timestamp::now(),
	}));

	let (mut ws_tx, mut ws_rx) = ws.split();

	// Writer task: drains the send queue, coalescing bursts into one frame,
	// and pings on the period.
	let writer_task = tokio::spawn(async move {
		let mut interval = tokio::time::interval(PING_PERIOD);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		// The first tick fires immediately; skip it
		interval.tick().await;
		loop {
			tokio::select! {
				delivery = queue_rx.recv() => {
					match delivery {
						Some(Delivery::Frame(frame)) => {
							// Coalesce whatever else is already queued
							let mut payload = frame.to_string();
							let mut pending_close = None;
							while let Ok(more) = queue_rx.try_recv() {
								match more {
									Delivery::Frame(more) => {
										payload.push('\n');
										payload.push_str(&more);
									}
									Delivery::Close(reason) => {
										pending_close = Some(reason);
										break;
									}
								}
							}
							let send = ws_tx.send(Message::Text(payload.into()));
							if tokio::time::timeout(WRITE_WAIT, send).await.map_or(true, |r| r.is_err()) {
								return;
							}
							if let Some(reason) = pending_close {
								let _ = ws_tx
									.send(Message::Close(Some(CloseFrame { code: 4000, reason: reason.to_string().into() })))
									.await;
								return;
							}
						}
						Some(Delivery::Close(reason)) => {
							if let Ok(frame) = (WsOutbound::Error { error: reason.to_string() }).to_frame() {
								let _ = ws_tx.send(Message::Text(frame.to_string().into())).await;
							}
							let _ = ws_tx
								.send(Message::Close(Some(CloseFrame { code: 4000, reason: reason.to_string().into() })))
								.await;
							return;
						}
						None => return,
					}
				}
				_ = interval.tick() => {
					let Ok(frame) = WsOutbound::Ping.to_frame() else { return };
					if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
						return;
					}
					if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
						return;
					}
				}
			}
		}
	});

	// Reader loop: the read deadline is the ping period plus the pong grace;
	// any inbound frame (including pong) resets it.
	let read_deadline = PING_PERIOD + PONG_WAIT;
	loop {
		let frame = match tokio::time::timeout(read_deadline, ws_rx.next()).await {
			Ok(Some(Ok(frame))) => frame,
			Ok(Some(Err(err))) => {
				debug!("WS read error for {}: {}", client_id, err);
				break;
			}
			Ok(None) => break,
			Err(_) => {
				debug!("WS read deadline expired for {}", client_id);
				break;
			}
		};

		match frame {
			Message::Text(text) => {
				match serde_json::from_str::<WsInbound>(&text) {
					Ok(WsInbound::Subscribe { channel }) => {
						if hub.subscribe(&client_id, &channel) {
							if let Ok(frame) = (WsOutbound::Subscribed { channel }).to_frame() {
								hub.send_to_client(&client_id, frame);
							}
						}
					}
					Ok(WsInbound::Unsubscribe { channel }) => {
						if hub.unsubscribe(&client_id, &channel) {
							if let Ok(frame) = (WsOutbound::Unsubscribed { channel }).to_frame() {
								hub.send_to_client(&client_id, frame);
							}
						}
					}
					Ok(WsInbound::Pong) => {
						// Deadline already reset by receiving the frame
					}
					Err(err) => {
						debug!("WS bad message from {}: {}", client_id, err);
						if let Ok(frame) =
							(WsOutbound::Error { error: "unknown message type".into() }).to_frame()
						{
							hub.send_to_client(&client_id, frame);
						}
					}
				}
			}
			Message::Pong(_) => {
				// Protocol-level pong, resets the deadline like any frame
			}
			Message::Close(_) => break,
			Message::Ping(_) | Message::Binary(_) => {}
		}
	}

	// Cleanup: channels the client was in are dropped with it
	let _ = events.send(HubEvent::Unregister(client_id.clone()));
	writer_task.abort();
	info!("WS disconnect: {} (site={})", client_id, hub.site_id());
}


// vim: ts=4
