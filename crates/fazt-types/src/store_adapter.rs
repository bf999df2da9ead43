//! Adapter that manages all persistent state. Files, apps, aliases, secrets,
//! the egress allowlist, API keys, deployments, and the storage tables backing
//! the JS capability namespaces.
//!
//! The adapter exposes plain reads and plain mutations. Serialization of
//! mutations is the kernel's job (the write queue submits them one at a
//! time); the adapter only promises that a mutation observed as committed is
//! visible to every subsequent read.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::FzResult;
use crate::types::{
	ActivityEntry, AliasRecord, AllowlistEntry, ApiKeyRecord, AppPatch, AppRecord, BlobRecord,
	DeploymentRecord, DocRecord, FileInfo, FileRecord, FileWrite, SecretMeta, SecretRecord,
};

#[async_trait]
pub trait StoreAdapter: Debug + Send + Sync {
	// Files
	//*******
	/// Insert-or-replace a single file row.
	async fn write_file(&self, file: &FileWrite) -> FzResult<()>;
	/// Insert-or-replace a batch of file rows in one transaction (deploys).
	async fn write_files(&self, files: &[FileWrite]) -> FzResult<()>;
	async fn read_file(&self, site_id: &str, path: &str) -> FzResult<FileRecord>;
	/// Read a file through the `app_id` back-reference instead of the site key.
	async fn read_file_by_app(&self, app_id: &str, path: &str) -> FzResult<FileRecord>;
	async fn file_exists(&self, site_id: &str, path: &str) -> FzResult<bool>;
	async fn list_files(&self, site_id: &str) -> FzResult<Vec<FileInfo>>;
	/// Range-delete every file of a site. Returns the number of rows removed.
	async fn delete_site_files(&self, site_id: &str) -> FzResult<u64>;

	// Apps
	//******
	async fn create_app(&self, app: &AppRecord) -> FzResult<()>;
	async fn read_app(&self, app_id: &str) -> FzResult<AppRecord>;
	async fn update_app(&self, app_id: &str, patch: &AppPatch) -> FzResult<()>;
	async fn delete_app(&self, app_id: &str) -> FzResult<()>;
	async fn list_apps(&self) -> FzResult<Vec<AppRecord>>;

	// Aliases
	//*********
	async fn upsert_alias(&self, alias: &AliasRecord) -> FzResult<()>;
	async fn read_alias(&self, subdomain: &str) -> FzResult<AliasRecord>;
	async fn delete_alias(&self, subdomain: &str) -> FzResult<()>;
	async fn list_aliases(&self) -> FzResult<Vec<AliasRecord>>;

	// Key-value storage (fazt.storage.kv)
	//*************************************
	async fn kv_get(&self, site_id: &str, key: &str) -> FzResult<Option<serde_json::Value>>;
	async fn kv_set(&self, site_id: &str, key: &str, value: &serde_json::Value) -> FzResult<()>;
	async fn kv_del(&self, site_id: &str, key: &str) -> FzResult<()>;

	// Document storage (fazt.storage.docs)
	//**************************************
	async fn doc_insert(
		&self,
		site_id: &str,
		collection: &str,
		doc_id: &str,
		data: &serde_json::Value,
	) -> FzResult<()>;
	async fn doc_query(
		&self,
		site_id: &str,
		collection: &str,
		limit: u32,
	) -> FzResult<Vec<DocRecord>>;
	async fn doc_update(
		&self,
		site_id: &str,
		collection: &str,
		doc_id: &str,
		data: &serde_json::Value,
	) -> FzResult<()>;
	async fn doc_delete(&self, site_id: &str, collection: &str, doc_id: &str) -> FzResult<()>;

	// Blob storage (fazt.storage.blobs)
	//***********************************
	async fn blob_put(
		&self,
		site_id: &str,
		key: &str,
		content: &[u8],
		mime_type: Option<&str>,
	) -> FzResult<()>;
	async fn blob_get(&self, site_id: &str, key: &str) -> FzResult<Option<BlobRecord>>;
	async fn blob_del(&self, site_id: &str, key: &str) -> FzResult<()>;

	// Secrets
	//*********
	async fn put_secret(&self, secret: &SecretRecord) -> FzResult<()>;
	/// Resolve a secret by name, preferring an app-scoped entry over a global one.
	async fn read_secret(&self, name: &str, app_id: Option<&str>) -> FzResult<SecretRecord>;
	async fn list_secrets(&self) -> FzResult<Vec<SecretMeta>>;
	async fn delete_secret(&self, name: &str) -> FzResult<()>;

	// Egress allowlist
	//******************
	async fn add_allowlist(&self, entry: &AllowlistEntry) -> FzResult<i64>;
	async fn list_allowlist(&self) -> FzResult<Vec<AllowlistEntry>>;
	async fn delete_allowlist(&self, entry_id: i64) -> FzResult<()>;
	/// Look up the entry applying to `(app_id, domain)`: the app-scoped entry
	/// wins over a global one.
	async fn lookup_allowlist(
		&self,
		app_id: &str,
		domain: &str,
	) -> FzResult<Option<AllowlistEntry>>;

	// API keys
	//**********
	async fn create_api_key(&self, key: &ApiKeyRecord) -> FzResult<()>;
	async fn read_api_key(&self, key_id: &str) -> FzResult<ApiKeyRecord>;
	async fn touch_api_key(&self, key_id: &str) -> FzResult<()>;
	async fn count_api_keys(&self) -> FzResult<u64>;

	// Deployments and the activity log
	//**********************************
	async fn record_deployment(&self, deployment: &DeploymentRecord) -> FzResult<()>;
	async fn append_activity(&self, entry: &ActivityEntry) -> FzResult<()>;
	async fn list_activity(&self, limit: u32, offset: u32) -> FzResult<Vec<ActivityEntry>>;
}

// vim: ts=4
