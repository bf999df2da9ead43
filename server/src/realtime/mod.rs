//! Per-site realtime: WebSocket hubs with channel fan-out.
//!
//! The manager maps `site_id -> Hub`. Hubs are created lazily on the first
//! connect or the first serverless broadcast for a site, and torn down when
//! the site is deleted. No cross-site lock is ever taken: each hub is its
//! own serialization domain.

pub mod hub;
pub mod websocket;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::prelude::*;
pub use hub::Hub;

#[derive(Debug, Default)]
pub struct HubManager {
	hubs: RwLock<HashMap<Box<str>, Arc<Hub>>>,
}

impl HubManager {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Return the hub for a site, creating and starting it if needed.
	pub fn get_hub(&self, site_id: &str) -> Arc<Hub> {
		if let Some(hub) = self.hubs.read().get(site_id) {
			return hub.clone();
		}
		let mut hubs = self.hubs.write();
		// Raced another creator between the locks
		if let Some(hub) = hubs.get(site_id) {
			return hub.clone();
		}
		info!("starting hub for site '{}'", site_id);
		let hub = Hub::start(site_id);
		hubs.insert(site_id.into(), hub.clone());
		hub
	}

	/// Peek without creating.
	pub fn find_hub(&self, site_id: &str) -> Option<Arc<Hub>> {
		self.hubs.read().get(site_id).cloned()
	}

	/// Stop and drop a site's hub. Connected clients are disconnected.
	pub fn remove_hub(&self, site_id: &str) {
		if let Some(hub) = self.hubs.write().remove(site_id) {
			info!("removing hub for site '{}'", site_id);
			hub.shutdown();
		}
	}

	pub fn hub_count(&self) -> usize {
		self.hubs.read().len()
	}
}


// vim: ts=4
