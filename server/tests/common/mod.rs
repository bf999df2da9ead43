//! Shared test fixtures: a full kernel service stack over a temporary
//! SQLite store.

use std::sync::Arc;
use tempfile::TempDir;

use fazt::core::app::{AppBuilderOpts, AppState};
use fazt::core::budget::RequestBudget;
use fazt::core::write_queue::WriteQueue;
use fazt::egress::EgressProxy;
use fazt::realtime::HubManager;
use fazt::runtime::JsRuntime;
use fazt::vfs::{FileCache, Vfs};
use fazt::{App, StoreAdapter};
use fazt_store_adapter_sqlite::StoreAdapterSqlite;
use fazt_types::types::{AliasRecord, AliasTarget, AppRecord, Provenance, Timestamp, Visibility};

pub async fn test_app() -> (App, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let store: Arc<dyn StoreAdapter> = Arc::new(
		StoreAdapterSqlite::new(temp_dir.path()).await.expect("Failed to create adapter"),
	);
	let cache = FileCache::new();
	let queue = WriteQueue::start(store.clone(), 256, cache.clone());
	let vfs = Vfs::new(store.clone(), queue.clone(), cache);
	let hubs = HubManager::new();
	let egress = EgressProxy::new(store.clone(), false).expect("Failed to create egress proxy");
	let runtime = JsRuntime::new(4);

	let app: App = Arc::new(AppState {
		store,
		queue,
		vfs,
		hubs,
		egress,
		runtime,
		opts: AppBuilderOpts::default(),
	});
	(app, temp_dir)
}

/// Register an app record plus an `app`-type alias for it.
pub async fn seed_app(app: &App, app_id: &str, subdomain: &str) {
	let budget = RequestBudget::new();
	let now = Timestamp::now();
	let record = AppRecord {
		app_id: app_id.into(),
		title: None,
		visibility: Visibility::Public,
		provenance: Provenance::default(),
		forked_from_id: None,
		env: Default::default(),
		created_at: now,
		updated_at: now,
	};
	app.queue
		.submit(fazt::core::write_queue::WriteOp::CreateApp(record), &budget)
		.await
		.expect("Should create app");
	app.queue
		.submit(
			fazt::core::write_queue::WriteOp::UpsertAlias(AliasRecord {
				subdomain: subdomain.into(),
				target: AliasTarget::App { app_id: app_id.into() },
				created_at: now,
				updated_at: now,
			}),
			&budget,
		)
		.await
		.expect("Should create alias");
}

/// Write one file into a site through the VFS.
pub async fn seed_file(app: &App, site_id: &str, path: &str, content: &[u8], mime: &str) {
	let budget = RequestBudget::new();
	let write = Vfs::prepare_write(site_id, path, content.to_vec(), mime, Some(site_id));
	app.vfs.write_file(write, &budget).await.expect("Should write file");
}
