//! SQLite implementation of the Fazt store adapter.
//!
//! Two pools are held: `db` with a single connection carries every mutation
//! (the kernel's write queue is the only caller, so the store sees writes
//! strictly in submission order), and `dbr` is a read-only pool that request
//! paths hit directly without ever touching the queue.

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool, SqliteRow};
use std::{path::Path, time::Duration};

use fazt::prelude::*;
use fazt::store_adapter::StoreAdapter;
use fazt::types::{
	ActivityEntry, AliasRecord, AllowlistEntry, ApiKeyRecord, AppPatch, AppRecord, BlobRecord,
	DeploymentRecord, DocRecord, FileInfo, FileRecord, FileWrite, SecretMeta, SecretRecord,
};

mod admin;
mod alias;
mod app;
mod file;
mod schema;
mod secret;
mod storage;

use schema::init_db;

// Helper functions
//******************

fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

/// Map an sqlx error to the kernel taxonomy. SQLITE_BUSY surfaces as the
/// retryable `StorageBusy` so the write queue can signal admission failure.
pub(crate) fn map_db_err(err: sqlx::Error) -> Error {
	if let sqlx::Error::RowNotFound = err {
		return Error::NotFound;
	}
	if let Some(db_err) = err.as_database_error() {
		let code = db_err.code();
		let code = code.as_deref().unwrap_or("");
		if code == "5" || code == "517" || db_err.message().contains("database is locked") {
			warn!("DB busy: {}", db_err.message());
			return Error::StorageBusy;
		}
		if code.starts_with("19") || code == "1555" || code == "2067" {
			return Error::Conflict(db_err.message().to_string());
		}
	}
	inspect(&err);
	Error::DbError
}

pub(crate) fn map_res<T, F>(row: Result<SqliteRow, sqlx::Error>, f: F) -> FzResult<T>
where
	F: FnOnce(SqliteRow) -> Result<T, sqlx::Error>,
{
	match row {
		Ok(row) => f(row).inspect_err(inspect).map_err(|_| Error::DbError),
		Err(err) => Err(map_db_err(err)),
	}
}

pub(crate) fn collect_res<T>(
	iter: impl Iterator<Item = Result<T, sqlx::Error>>,
) -> FzResult<Vec<T>> {
	let mut items = Vec::new();
	for item in iter {
		items.push(item.inspect_err(inspect).map_err(|_| Error::DbError)?);
	}
	Ok(items)
}

#[derive(Debug)]
pub struct StoreAdapterSqlite {
	/// Single-connection writer pool. Mutations only.
	db: SqlitePool,
	/// Read-only reader pool. Never blocked by the writer (WAL).
	dbr: SqlitePool,
}

impl StoreAdapterSqlite {
	pub async fn new(path: impl AsRef<Path>) -> FzResult<Self> {
		let db_path = path.as_ref().join("fazt.db");
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(&db_path)
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal)
			// A short busy timeout: contention is surfaced to the write
			// queue as a retryable error instead of stalling the writer.
			.busy_timeout(Duration::from_millis(250));

		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts.clone())
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		let dbr = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts.read_only(true))
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		init_db(&db).await.inspect_err(inspect).or(Err(Error::DbError))?;

		info!("Store opened at {}", db_path.display());
		Ok(Self { db, dbr })
	}
}

#[async_trait]
impl StoreAdapter for StoreAdapterSqlite {
	// Files
	//*******
	async fn write_file(&self, f: &FileWrite) -> FzResult<()> {
		file::write(&self.db, f).await
	}

	async fn write_files(&self, files: &[FileWrite]) -> FzResult<()> {
		file::write_batch(&self.db, files).await
	}

	async fn read_file(&self, site_id: &str, path: &str) -> FzResult<FileRecord> {
		file::read(&self.dbr, site_id, path).await
	}

	async fn read_file_by_app(&self, app_id: &str, path: &str) -> FzResult<FileRecord> {
		file::read_by_app(&self.dbr, app_id, path).await
	}

	async fn file_exists(&self, site_id: &str, path: &str) -> FzResult<bool> {
		file::exists(&self.dbr, site_id, path).await
	}

	async fn list_files(&self, site_id: &str) -> FzResult<Vec<FileInfo>> {
		file::list(&self.dbr, site_id).await
	}

	async fn delete_site_files(&self, site_id: &str) -> FzResult<u64> {
		file::delete_site(&self.db, site_id).await
	}

	// Apps
	//******
	async fn create_app(&self, app: &AppRecord) -> FzResult<()> {
		app::create(&self.db, app).await
	}

	async fn read_app(&self, app_id: &str) -> FzResult<AppRecord> {
		app::read(&self.dbr, app_id).await
	}

	async fn update_app(&self, app_id: &str, patch: &AppPatch) -> FzResult<()> {
		app::update(&self.db, app_id, patch).await
	}

	async fn delete_app(&self, app_id: &str) -> FzResult<()> {
		app::delete(&self.db, app_id).await
	}

	async fn list_apps(&self) -> FzResult<Vec<AppRecord>> {
		app::list(&self.dbr).await
	}

	// Aliases
	//*********
	async fn upsert_alias(&self, alias: &AliasRecord) -> FzResult<()> {
		alias::upsert(&self.db, alias).await
	}

	async fn read_alias(&self, subdomain: &str) -> FzResult<AliasRecord> {
		alias::read(&self.dbr, subdomain).await
	}

	async fn delete_alias(&self, subdomain: &str) -> FzResult<()> {
		alias::delete(&self.db, subdomain).await
	}

	async fn list_aliases(&self) -> FzResult<Vec<AliasRecord>> {
		alias::list(&self.dbr).await
	}

	// Capability storage
	//********************
	async fn kv_get(&self, site_id: &str, key: &str) -> FzResult<Option<serde_json::Value>> {
		storage::kv_get(&self.dbr, site_id, key).await
	}

	async fn kv_set(&self, site_id: &str, key: &str, value: &serde_json::Value) -> FzResult<()> {
		storage::kv_set(&self.db, site_id, key, value).await
	}

	async fn kv_del(&self, site_id: &str, key: &str) -> FzResult<()> {
		storage::kv_del(&self.db, site_id, key).await
	}

	async fn doc_insert(
		&self,
		site_id: &str,
		collection: &str,
		doc_id: &str,
		data: &serde_json::Value,
	) -> FzResult<()> {
		storage::doc_insert(&self.db, site_id, collection, doc_id, data).await
	}

	async fn doc_query(
		&self,
		site_id: &str,
		collection: &str,
		limit: u32,
	) -> FzResult<Vec<DocRecord>> {
		storage::doc_query(&self.dbr, site_id, collection, limit).await
	}

	async fn doc_update(
		&self,
		site_id: &str,
		collection: &str,
		doc_id: &str,
		data: &serde_json::Value,
	) -> FzResult<()> {
		storage::doc_update(&self.db, site_id, collection, doc_id, data).await
	}

	async fn doc_delete(&self, site_id: &str, collection: &str, doc_id: &str) -> FzResult<()> {
		storage::doc_delete(&self.db, site_id, collection, doc_id).await
	}

	async fn blob_put(
		&self,
		site_id: &str,
		key: &str,
		content: &[u8],
		mime_type: Option<&str>,
	) -> FzResult<()> {
		storage::blob_put(&self.db, site_id, key, content, mime_type).await
	}

	async fn blob_get(&self, site_id: &str, key: &str) -> FzResult<Option<BlobRecord>> {
		storage::blob_get(&self.dbr, site_id, key).await
	}

	async fn blob_del(&self, site_id: &str, key: &str) -> FzResult<()> {
		storage::blob_del(&self.db, site_id, key).await
	}

	// Secrets
	//*********
	async fn put_secret(&self, secret: &SecretRecord) -> FzResult<()> {
		secret::put(&self.db, secret).await
	}

	async fn read_secret(&self, name: &str, app_id: Option<&str>) -> FzResult<SecretRecord> {
		secret::read(&self.dbr, name, app_id).await
	}

	async fn list_secrets(&self) -> FzResult<Vec<SecretMeta>> {
		secret::list(&self.dbr).await
	}

	async fn delete_secret(&self, name: &str) -> FzResult<()> {
		secret::delete(&self.db, name).await
	}

	// Allowlist
	//***********
	async fn add_allowlist(&self, entry: &AllowlistEntry) -> FzResult<i64> {
		admin::allowlist_add(&self.db, entry).await
	}

	async fn list_allowlist(&self) -> FzResult<Vec<AllowlistEntry>> {
		admin::allowlist_list(&self.dbr).await
	}

	async fn delete_allowlist(&self, entry_id: i64) -> FzResult<()> {
		admin::allowlist_delete(&self.db, entry_id).await
	}

	async fn lookup_allowlist(
		&self,
		app_id: &str,
		domain: &str,
	) -> FzResult<Option<AllowlistEntry>> {
		admin::allowlist_lookup(&self.dbr, app_id, domain).await
	}

	// API keys
	//**********
	async fn create_api_key(&self, key: &ApiKeyRecord) -> FzResult<()> {
		admin::api_key_create(&self.db, key).await
	}

	async fn read_api_key(&self, key_id: &str) -> FzResult<ApiKeyRecord> {
		admin::api_key_read(&self.dbr, key_id).await
	}

	async fn touch_api_key(&self, key_id: &str) -> FzResult<()> {
		admin::api_key_touch(&self.db, key_id).await
	}

	async fn count_api_keys(&self) -> FzResult<u64> {
		admin::api_key_count(&self.dbr).await
	}

	// Deployments and activity
	//**************************
	async fn record_deployment(&self, deployment: &DeploymentRecord) -> FzResult<()> {
		admin::deployment_record(&self.db, deployment).await
	}

	async fn append_activity(&self, entry: &ActivityEntry) -> FzResult<()> {
		admin::activity_append(&self.db, entry).await
	}

	async fn list_activity(&self, limit: u32, offset: u32) -> FzResult<Vec<ActivityEntry>> {
		admin::activity_list(&self.dbr, limit, offset).await
	}
}

// vim: ts=4
