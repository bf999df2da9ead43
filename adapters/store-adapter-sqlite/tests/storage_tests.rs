//! Capability storage and admin table tests
//!
//! Covers kv/docs/blobs, secrets resolution, allowlist precedence, API keys,
//! and activity log paging.

use fazt::store_adapter::StoreAdapter;
use fazt::types::{
	ActivityEntry, AllowlistEntry, ApiKeyRecord, SecretInjection, SecretRecord, Timestamp,
};
use fazt_store_adapter_sqlite::StoreAdapterSqlite;
use serde_json::json;
use tempfile::TempDir;

async fn create_test_adapter() -> (StoreAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter =
		StoreAdapterSqlite::new(temp_dir.path()).await.expect("Failed to create adapter");
	(adapter, temp_dir)
}

#[tokio::test]
async fn test_kv_roundtrip_and_isolation() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.kv_set("site1", "counter", &json!(41)).await.unwrap();
	adapter.kv_set("site1", "counter", &json!(42)).await.unwrap();
	adapter.kv_set("site2", "counter", &json!(7)).await.unwrap();

	assert_eq!(adapter.kv_get("site1", "counter").await.unwrap(), Some(json!(42)));
	assert_eq!(adapter.kv_get("site2", "counter").await.unwrap(), Some(json!(7)));
	assert_eq!(adapter.kv_get("site1", "missing").await.unwrap(), None);

	adapter.kv_del("site1", "counter").await.unwrap();
	assert_eq!(adapter.kv_get("site1", "counter").await.unwrap(), None);
	// Deleting site1's key leaves site2 alone
	assert_eq!(adapter.kv_get("site2", "counter").await.unwrap(), Some(json!(7)));
}

#[tokio::test]
async fn test_docs_crud() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter
		.doc_insert("site1", "notes", "d1", &json!({"text": "first"}))
		.await
		.unwrap();
	adapter
		.doc_insert("site1", "notes", "d2", &json!({"text": "second"}))
		.await
		.unwrap();

	let docs = adapter.doc_query("site1", "notes", 100).await.unwrap();
	assert_eq!(docs.len(), 2);

	adapter
		.doc_update("site1", "notes", "d1", &json!({"text": "edited"}))
		.await
		.unwrap();
	let docs = adapter.doc_query("site1", "notes", 100).await.unwrap();
	let d1 = docs.iter().find(|d| d.doc_id.as_ref() == "d1").unwrap();
	assert_eq!(d1.data["text"], "edited");

	adapter.doc_delete("site1", "notes", "d2").await.unwrap();
	assert_eq!(adapter.doc_query("site1", "notes", 100).await.unwrap().len(), 1);

	// Updating a missing doc reports not-found
	assert!(adapter.doc_update("site1", "notes", "nope", &json!({})).await.is_err());
}

#[tokio::test]
async fn test_blobs_roundtrip() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.blob_put("site1", "avatar", b"\x89PNG...", Some("image/png")).await.unwrap();
	let blob = adapter.blob_get("site1", "avatar").await.unwrap().unwrap();
	assert_eq!(blob.content, b"\x89PNG...");
	assert_eq!(blob.mime_type.as_deref(), Some("image/png"));

	adapter.blob_del("site1", "avatar").await.unwrap();
	assert!(adapter.blob_get("site1", "avatar").await.unwrap().is_none());
}

#[tokio::test]
async fn test_secret_scope_precedence() {
	let (adapter, _temp) = create_test_adapter().await;
	let now = Timestamp::now();

	adapter
		.put_secret(&SecretRecord {
			name: "api_token".into(),
			value: "global-value".into(),
			inject_as: SecretInjection::Bearer,
			inject_key: None,
			domain: None,
			app_id: None,
			created_at: now,
		})
		.await
		.unwrap();
	adapter
		.put_secret(&SecretRecord {
			name: "api_token".into(),
			value: "scoped-value".into(),
			inject_as: SecretInjection::Header,
			inject_key: Some("X-Token".into()),
			domain: Some("api.example.com".into()),
			app_id: Some("app1".into()),
			created_at: now,
		})
		.await
		.unwrap();

	// App-scoped entry wins for app1
	let s = adapter.read_secret("api_token", Some("app1")).await.unwrap();
	assert_eq!(s.value.as_ref(), "scoped-value");
	assert_eq!(s.inject_as, SecretInjection::Header);

	// Other apps fall back to the global entry
	let s = adapter.read_secret("api_token", Some("app2")).await.unwrap();
	assert_eq!(s.value.as_ref(), "global-value");

	// Listing never exposes values
	let listed = adapter.list_secrets().await.unwrap();
	assert_eq!(listed.len(), 2);
	let json = serde_json::to_string(&listed).unwrap();
	assert!(!json.contains("global-value"));
	assert!(!json.contains("scoped-value"));
}

#[tokio::test]
async fn test_allowlist_precedence() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter
		.add_allowlist(&AllowlistEntry {
			entry_id: 0,
			app_id: None,
			domain: "api.example.com".into(),
			max_response: Some(1024),
			timeout_ms: None,
			rate_limit: None,
			rate_burst: None,
			cache_ttl: None,
		})
		.await
		.unwrap();
	adapter
		.add_allowlist(&AllowlistEntry {
			entry_id: 0,
			app_id: Some("app1".into()),
			domain: "api.example.com".into(),
			max_response: Some(4096),
			timeout_ms: Some(2000),
			rate_limit: Some(10),
			rate_burst: Some(20),
			cache_ttl: None,
		})
		.await
		.unwrap();

	// App-scoped entry wins for app1
	let entry = adapter.lookup_allowlist("app1", "api.example.com").await.unwrap().unwrap();
	assert_eq!(entry.max_response, Some(4096));
	assert_eq!(entry.rate_limit, Some(10));

	// Other apps get the global entry
	let entry = adapter.lookup_allowlist("app2", "api.example.com").await.unwrap().unwrap();
	assert_eq!(entry.max_response, Some(1024));

	// Missing domain means no entry at all
	assert!(adapter.lookup_allowlist("app1", "other.example.com").await.unwrap().is_none());

	let listed = adapter.list_allowlist().await.unwrap();
	assert_eq!(listed.len(), 2);
	adapter.delete_allowlist(listed[0].entry_id).await.unwrap();
	assert_eq!(adapter.list_allowlist().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_api_keys() {
	let (adapter, _temp) = create_test_adapter().await;

	assert_eq!(adapter.count_api_keys().await.unwrap(), 0);
	adapter
		.create_api_key(&ApiKeyRecord {
			key_id: "k1".into(),
			secret_hash: "abcd".into(),
			description: "bootstrap".into(),
			created_at: Timestamp::now(),
			last_used_at: None,
		})
		.await
		.unwrap();
	assert_eq!(adapter.count_api_keys().await.unwrap(), 1);

	let key = adapter.read_api_key("k1").await.unwrap();
	assert_eq!(key.secret_hash.as_ref(), "abcd");
	assert!(key.last_used_at.is_none());

	adapter.touch_api_key("k1").await.unwrap();
	let key = adapter.read_api_key("k1").await.unwrap();
	assert!(key.last_used_at.is_some());
}

#[tokio::test]
async fn test_activity_log_paging() {
	let (adapter, _temp) = create_test_adapter().await;

	for i in 0..5 {
		adapter
			.append_activity(&ActivityEntry {
				entry_id: 0,
				ts: Timestamp::now(),
				kind: "deploy".into(),
				subject: format!("app{}", i).into(),
				detail: None,
			})
			.await
			.unwrap();
	}

	let page = adapter.list_activity(2, 0).await.unwrap();
	assert_eq!(page.len(), 2);
	// Newest first
	assert_eq!(page[0].subject.as_ref(), "app4");

	let page = adapter.list_activity(2, 4).await.unwrap();
	assert_eq!(page.len(), 1);
	assert_eq!(page[0].subject.as_ref(), "app0");
}
