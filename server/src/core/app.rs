//! App state type

use std::sync::Arc;

use crate::admin;
use crate::core::webserver;
use crate::core::write_queue::{DEFAULT_QUEUE_CAPACITY, WriteQueue};
use crate::egress::EgressProxy;
use crate::prelude::*;
use crate::realtime::HubManager;
use crate::routes;
use crate::runtime::{JsRuntime, MAX_VMS};
use crate::vfs::{FileCache, Vfs, seed};
use fazt_types::store_adapter::StoreAdapter;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Long-lived process singletons, modeled as explicit services so tests can
/// spin up isolated instances.
#[derive(Debug)]
pub struct AppState {
	pub store: Arc<dyn StoreAdapter>,
	pub queue: Arc<WriteQueue>,
	pub vfs: Arc<Vfs>,
	pub hubs: Arc<HubManager>,
	pub egress: Arc<EgressProxy>,
	pub runtime: Arc<JsRuntime>,
	pub opts: AppBuilderOpts,
}

pub type App = Arc<AppState>;

#[derive(Debug)]
pub struct AppBuilderOpts {
	listen: Box<str>,
	pub base_domain: Option<Box<str>>,
	/// Disable HTTP caching (for development)
	pub disable_cache: bool,
	/// Permit plain-http egress targets (for development)
	pub allow_http_egress: bool,
	pub write_queue_capacity: usize,
	pub max_vms: usize,
}

impl Default for AppBuilderOpts {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:8080".into(),
			base_domain: None,
			disable_cache: false,
			allow_http_egress: false,
			write_queue_capacity: DEFAULT_QUEUE_CAPACITY,
			max_vms: MAX_VMS,
		}
	}
}

pub struct AppBuilder {
	opts: AppBuilderOpts,
	store: Option<Arc<dyn StoreAdapter>>,
}

impl AppBuilder {
	pub fn new() -> Self {
		tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_target(false)
			.init();
		AppBuilder {
			opts: AppBuilderOpts::default(),
			store: None,
		}
	}

	// Opts
	pub fn listen(&mut self, listen: impl Into<Box<str>>) -> &mut Self {
		self.opts.listen = listen.into();
		self
	}
	pub fn base_domain(&mut self, base_domain: impl Into<Box<str>>) -> &mut Self {
		self.opts.base_domain = Some(base_domain.into());
		self
	}
	pub fn disable_cache(&mut self, disable: bool) -> &mut Self {
		self.opts.disable_cache = disable;
		self
	}
	pub fn allow_http_egress(&mut self, allow: bool) -> &mut Self {
		self.opts.allow_http_egress = allow;
		self
	}
	pub fn write_queue_capacity(&mut self, capacity: usize) -> &mut Self {
		self.opts.write_queue_capacity = capacity;
		self
	}
	pub fn max_vms(&mut self, max_vms: usize) -> &mut Self {
		self.opts.max_vms = max_vms;
		self
	}

	// Adapter
	pub fn store_adapter(&mut self, store: Arc<dyn StoreAdapter>) -> &mut Self {
		self.store = Some(store);
		self
	}

	pub async fn run(self) -> FzResult<()> {
		info!("  __               _   ");
		info!(" / _|  __ _  ____ | |_ ");
		info!("| |_  / _` ||_  / | __|");
		info!("|  _|| (_| | / /  | |_ ");
		info!("|_|   \\__,_|/___|  \\__|");
		info!("V{}", VERSION);
		info!("");

		rustls::crypto::CryptoProvider::install_default(
			rustls::crypto::aws_lc_rs::default_provider(),
		)
		.map_err(|e| {
			error!("FATAL: Failed to install default crypto provider: {:?}", e);
			Error::Internal("Failed to install default crypto provider".to_string())
		})?;

		let Some(store) = self.store else {
			error!("FATAL: No store adapter configured");
			return Err(Error::Internal("No store adapter configured".to_string()));
		};

		let cache = FileCache::new();
		let queue = WriteQueue::start(store.clone(), self.opts.write_queue_capacity, cache.clone());
		let vfs = Vfs::new(store.clone(), queue.clone(), cache);
		let hubs = HubManager::new();
		let egress = EgressProxy::new(store.clone(), self.opts.allow_http_egress)?;
		let runtime = JsRuntime::new(self.opts.max_vms);

		let app: App = Arc::new(AppState {
			store,
			queue,
			vfs,
			hubs,
			egress,
			runtime,
			opts: self.opts,
		});

		// System sites back the landing and not-found pages
		seed::seed_system_sites(&app.vfs).await?;

		// First run mints an admin API key and logs it once
		admin::bootstrap_api_key(&app).await?;

		let (api_router, app_router) = routes::init(app.clone());
		let server =
			webserver::create_server(app.clone(), &app.opts.listen, api_router, app_router)
				.await?;

		server.await.map_err(|e| {
			error!("FATAL: server task failed: {}", e);
			Error::Internal("server task failed".to_string())
		})??;

		Ok(())
	}
}

impl Default for AppBuilder {
	fn default() -> Self {
		Self::new()
	}
}

// vim: ts=4
