//! The per-site hub: client registry, channel subscriptions, and fan-out.
//!
//! A single event loop serializes register/unregister/legacy-broadcast
//! events, taking the hub lock only while mutating `clients` and `channels`.
//! Read operations take a read lock and iterate. Delivery to each client is
//! a non-blocking enqueue onto its bounded send queue; a slow consumer loses
//! the message, never blocks the broadcaster.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use crate::prelude::*;
use crate::realtime::websocket::WsOutbound;

/// Per-client send queue depth.
pub const SEND_QUEUE_SIZE: usize = 256;

/// What travels down a client's send queue: a pre-serialized frame (one
/// serialization per broadcast regardless of fan-out) or a close request.
#[derive(Debug, Clone)]
pub enum Delivery {
	Frame(Arc<str>),
	Close(Box<str>),
}

/// Hub-side handle of a connected client.
#[derive(Debug)]
pub struct ClientHandle {
	pub client_id: Box<str>,
	pub tx: tokio::sync::mpsc::Sender<Delivery>,
	pub channels: HashSet<Box<str>>,
	pub connected_at: Timestamp,
}

#[derive(Debug, Default)]
struct HubInner {
	clients: HashMap<Box<str>, ClientHandle>,
	channels: HashMap<Box<str>, HashSet<Box<str>>>,
}

#[derive(Debug)]
pub enum HubEvent {
	Register(ClientHandle),
	Unregister(Box<str>),
	/// Legacy fire-and-forget broadcast to every client.
	Broadcast(serde_json::Value),
	Shutdown,
}

#[derive(Debug)]
pub struct Hub {
	site_id: Box<str>,
	inner: RwLock<HubInner>,
	event_tx: flume::Sender<HubEvent>,
}

impl Hub {
	/// Create the hub and spawn its event loop.
	pub fn start(site_id: &str) -> Arc<Self> {
		let (event_tx, event_rx) = flume::unbounded();
		let hub = Arc::new(Self {
			site_id: site_id.into(),
			inner: RwLock::new(HubInner::default()),
			event_tx,
		});

		let weak: Weak<Hub> = Arc::downgrade(&hub);
		tokio::spawn(async move {
			while let Ok(event) = event_rx.recv_async().await {
				let Some(hub) = weak.upgrade() else { break };
				match event {
					HubEvent::Register(client) => hub.handle_register(client),
					HubEvent::Unregister(client_id) => hub.handle_unregister(&client_id),
					HubEvent::Broadcast(data) => {
						hub.broadcast_all(&data);
					}
					HubEvent::Shutdown => {
						hub.disconnect_all("hub shutting down");
						break;
					}
				}
			}
		});

		hub
	}

	pub fn site_id(&self) -> &str {
		&self.site_id
	}

	pub fn events(&self) -> flume::Sender<HubEvent> {
		self.event_tx.clone()
	}

	pub fn shutdown(&self) {
		let _ = self.event_tx.send(HubEvent::Shutdown);
	}

	// Event loop mutations
	//**********************

	fn handle_register(&self, client: ClientHandle) {
		let mut inner = self.inner.write();
		debug!("hub[{}]: register client {}", self.site_id, client.client_id);
		inner.clients.insert(client.client_id.clone(), client);
	}

	fn handle_unregister(&self, client_id: &str) {
		let mut inner = self.inner.write();
		let Some(client) = inner.clients.remove(client_id) else { return };
		debug!("hub[{}]: unregister client {}", self.site_id, client_id);
		// Drop the client from every channel it was in; empty channels lose
		// their key entirely.
		for channel in client.channels {
			if let Some(subscribers) = inner.channels.get_mut(&channel) {
				subscribers.remove(client_id);
				if subscribers.is_empty() {
					inner.channels.remove(&channel);
				}
			}
		}
	}

	fn disconnect_all(&self, reason: &str) {
		let mut inner = self.inner.write();
		for client in inner.clients.values() {
			let _ = client.tx.try_send(Delivery::Close(reason.into()));
		}
		inner.clients.clear();
		inner.channels.clear();
	}

	// Subscription bookkeeping (called from the client reader loop)
	//***************************************************************

	/// Subscribe a client to a channel. Idempotent. Returns false when the
	/// client is unknown.
	pub fn subscribe(&self, client_id: &str, channel: &str) -> bool {
		let mut inner = self.inner.write();
		let Some(client) = inner.clients.get_mut(client_id) else { return false };
		client.channels.insert(channel.into());
		inner.channels.entry(channel.into()).or_default().insert(client_id.into());
		true
	}

	/// Unsubscribe a client from a channel. A no-op for channels the client
	/// is not in. Drops the channel key once its subscriber set is empty.
	pub fn unsubscribe(&self, client_id: &str, channel: &str) -> bool {
		let mut inner = self.inner.write();
		let Some(client) = inner.clients.get_mut(client_id) else { return false };
		client.channels.remove(channel);
		if let Some(subscribers) = inner.channels.get_mut(channel) {
			subscribers.remove(client_id);
			if subscribers.is_empty() {
				inner.channels.remove(channel);
			}
		}
		true
	}

	// Read-side operations
	//**********************

	/// Fan a message out to a channel. Serializes once; a client with a full
	/// queue is skipped. Returns the number of clients enqueued to.
	pub fn broadcast_to_channel(&self, channel: &str, data: &serde_json::Value) -> usize {
		let frame = match WsOutbound::message_frame(channel, data) {
			Ok(frame) => frame,
			Err(err) => {
				warn!("hub[{}]: unserializable broadcast: {}", self.site_id, err);
				return 0;
			}
		};

		let inner = self.inner.read();
		let Some(subscribers) = inner.channels.get(channel) else { return 0 };
		let mut delivered = 0;
		for client_id in subscribers {
			if let Some(client) = inner.clients.get(client_id) {
				match client.tx.try_send(Delivery::Frame(frame.clone())) {
					Ok(()) => delivered += 1,
					Err(_) => {
						debug!(
							"hub[{}]: dropping message for slow client {}",
							self.site_id, client_id
						);
					}
				}
			}
		}
		delivered
	}

	/// Fan a message out to every client in the hub regardless of
	/// subscriptions. Same backpressure policy as channel broadcast.
	pub fn broadcast_all(&self, data: &serde_json::Value) -> usize {
		let frame = match WsOutbound::message_frame_all(data) {
			Ok(frame) => frame,
			Err(err) => {
				warn!("hub[{}]: unserializable broadcast: {}", self.site_id, err);
				return 0;
			}
		};

		let inner = self.inner.read();
		let mut delivered = 0;
		for client in inner.clients.values() {
			if client.tx.try_send(Delivery::Frame(frame.clone())).is_ok() {
				delivered += 1;
			}
		}
		delivered
	}

	pub fn subscribers(&self, channel: &str) -> Vec<Box<str>> {
		let inner = self.inner.read();
		inner
			.channels
			.get(channel)
			.map(|set| set.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Subscriber count of a channel, or total client count when no channel
	/// is given.
	pub fn count(&self, channel: Option<&str>) -> usize {
		let inner = self.inner.read();
		match channel {
			Some(channel) => inner.channels.get(channel).map_or(0, HashSet::len),
			None => inner.clients.len(),
		}
	}

	pub fn channel_count(&self, channel: &str) -> usize {
		self.count(Some(channel))
	}

	pub fn client_count(&self) -> usize {
		self.count(None)
	}

	pub fn has_channel(&self, channel: &str) -> bool {
		self.inner.read().channels.contains_key(channel)
	}

	/// Ask a client to disconnect. Returns whether the client was known.
	pub fn kick_client(&self, client_id: &str, reason: Option<&str>) -> bool {
		let inner = self.inner.read();
		let Some(client) = inner.clients.get(client_id) else { return false };
		let _ = client.tx.try_send(Delivery::Close(reason.unwrap_or("kicked").into()));
		true
	}

	/// Send an already-serialized frame to a single client.
	pub fn send_to_client(&self, client_id: &str, frame: Arc<str>) -> bool {
		let inner = self.inner.read();
		let Some(client) = inner.clients.get(client_id) else { return false };
		client.tx.try_send(Delivery::Frame(frame)).is_ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn test_client(id: &str) -> (ClientHandle, tokio::sync::mpsc::Receiver<Delivery>) {
		let (tx, rx) = tokio::sync::mpsc::channel(SEND_QUEUE_SIZE);
		(
			ClientHandle {
				client_id: id.into(),
				tx,
				channels: HashSet::new(),
				connected_at: Timestamp::now(),
			},
			rx,
		)
	}

	#[tokio::test]
	async fn test_subscribe_unsubscribe_and_cleanup() {
		let hub = Hub::start("site1");
		let (client, _rx) = test_client("c1");
		hub.handle_register(client);

		assert!(hub.subscribe("c1", "chat"));
		// Repeated subscribe is idempotent
		assert!(hub.subscribe("c1", "chat"));
		assert_eq!(hub.channel_count("chat"), 1);

		// Unsubscribing an un-subscribed channel is a no-op
		assert!(hub.unsubscribe("c1", "other"));
		assert_eq!(hub.channel_count("chat"), 1);

		assert!(hub.unsubscribe("c1", "chat"));
		assert_eq!(hub.channel_count("chat"), 0);
		// Empty channels lose their key
		assert!(!hub.has_channel("chat"));
	}

	#[tokio::test]
	async fn test_disconnect_cleans_channels() {
		let hub = Hub::start("site1");
		let (client, _rx) = test_client("c1");
		hub.handle_register(client);
		hub.subscribe("c1", "a");
		hub.subscribe("c1", "b");

		hub.handle_unregister("c1");
		assert!(!hub.has_channel("a"));
		assert!(!hub.has_channel("b"));
		assert_eq!(hub.client_count(), 0);
	}

	#[tokio::test]
	async fn test_channel_broadcast_reaches_subscribers_only() {
		let hub = Hub::start("site1");
		let (c1, mut rx1) = test_client("c1");
		let (c2, mut rx2) = test_client("c2");
		hub.handle_register(c1);
		hub.handle_register(c2);
		hub.subscribe("c1", "chat");

		let delivered = hub.broadcast_to_channel("chat", &json!({"x": 1}));
		assert_eq!(delivered, 1);

		let Delivery::Frame(frame) = rx1.recv().await.unwrap() else {
			panic!("expected frame");
		};
		let msg: serde_json::Value = serde_json::from_str(&frame).unwrap();
		assert_eq!(msg["type"], "message");
		assert_eq!(msg["channel"], "chat");
		assert_eq!(msg["data"]["x"], 1);
		assert!(msg["timestamp"].is_i64());

		// The unsubscribed client got nothing
		assert!(rx2.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_broadcast_all_ignores_subscriptions() {
		let hub = Hub::start("site1");
		let (c1, mut rx1) = test_client("c1");
		let (c2, mut rx2) = test_client("c2");
		hub.handle_register(c1);
		hub.handle_register(c2);
		hub.subscribe("c1", "chat");

		let delivered = hub.broadcast_all(&json!("hello"));
		assert_eq!(delivered, 2);
		assert!(matches!(rx1.recv().await, Some(Delivery::Frame(_))));
		assert!(matches!(rx2.recv().await, Some(Delivery::Frame(_))));
	}

	#[tokio::test]
	async fn test_slow_consumer_dropped_not_blocking() {
		let hub = Hub::start("site1");
		// Queue of one slot to force overflow
		let (tx, mut rx) = tokio::sync::mpsc::channel(1);
		hub.handle_register(ClientHandle {
			client_id: "slow".into(),
			tx,
			channels: HashSet::new(),
			connected_at: Timestamp::now(),
		});
		hub.subscribe("slow", "chat");

		assert_eq!(hub.broadcast_to_channel("chat", &json!(1)), 1);
		// Queue is now full; the next broadcast drops for this client
		assert_eq!(hub.broadcast_to_channel("chat", &json!(2)), 0);

		// Only the first message made it
		let Delivery::Frame(frame) = rx.recv().await.unwrap() else { panic!() };
		assert!(frame.contains("1"));
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_hub_isolation() {
		let hub_a = Hub::start("site-a");
		let hub_b = Hub::start("site-b");
		let (ca, mut rx_a) = test_client("c1");
		let (cb, mut rx_b) = test_client("c1");
		hub_a.handle_register(ca);
		hub_b.handle_register(cb);
		hub_a.subscribe("c1", "chat");
		hub_b.subscribe("c1", "chat");

		hub_a.broadcast_to_channel("chat", &json!({"site": "a"}));

		assert!(matches!(rx_a.recv().await, Some(Delivery::Frame(_))));
		// The same-named channel on the other site's hub hears nothing
		assert!(rx_b.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_subscribers_and_kick() {
		let hub = Hub::start("site1");
		let (c1, mut rx1) = test_client("c1");
		hub.handle_register(c1);
		hub.subscribe("c1", "chat");

		assert_eq!(hub.subscribers("chat"), vec![Box::from("c1")]);
		assert!(hub.kick_client("c1", Some("bye")));
		assert!(!hub.kick_client("missing", None));
		assert!(matches!(rx1.recv().await, Some(Delivery::Close(reason)) if reason.as_ref() == "bye"));
	}
}

// vim: ts=4
