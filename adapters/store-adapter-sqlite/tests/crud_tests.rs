//! Store adapter CRUD operation tests
//!
//! Tests file, app, and alias operations against a fresh SQLite store.

use fazt::store_adapter::StoreAdapter;
use fazt::types::{
	AliasRecord, AliasTarget, AppPatch, AppRecord, FileWrite, Patch, Provenance, SplitTarget,
	Timestamp, Visibility,
};
use fazt::utils::sha256_hex;
use fazt_store_adapter_sqlite::StoreAdapterSqlite;
use tempfile::TempDir;

async fn create_test_adapter() -> (StoreAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter =
		StoreAdapterSqlite::new(temp_dir.path()).await.expect("Failed to create adapter");
	(adapter, temp_dir)
}

fn file_write(site_id: &str, path: &str, content: &[u8]) -> FileWrite {
	FileWrite {
		site_id: site_id.into(),
		path: path.into(),
		content: content.to_vec(),
		mime_type: "text/html".into(),
		hash: sha256_hex(content).into(),
		app_id: Some(site_id.into()),
	}
}

#[tokio::test]
async fn test_write_and_read_file() {
	let (adapter, _temp) = create_test_adapter().await;

	let f = file_write("app1", "index.html", b"<h1>Hi</h1>");
	adapter.write_file(&f).await.expect("Should write file");

	let record = adapter.read_file("app1", "index.html").await.expect("Should read file");
	assert_eq!(record.content, b"<h1>Hi</h1>");
	assert_eq!(record.hash.as_ref(), sha256_hex(b"<h1>Hi</h1>"));
	assert_eq!(record.size_bytes, 11);
	assert_eq!(record.mime_type.as_ref(), "text/html");
}

#[tokio::test]
async fn test_upsert_replaces_content_and_hash() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.write_file(&file_write("app1", "index.html", b"one")).await.unwrap();
	adapter.write_file(&file_write("app1", "index.html", b"two")).await.unwrap();

	let record = adapter.read_file("app1", "index.html").await.unwrap();
	assert_eq!(record.content, b"two");
	assert_eq!(record.hash.as_ref(), sha256_hex(b"two"));
}

#[tokio::test]
async fn test_file_exists_and_delete_site() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.write_file(&file_write("app1", "index.html", b"x")).await.unwrap();
	adapter.write_file(&file_write("app1", "assets/app-abc123.js", b"y")).await.unwrap();
	adapter.write_file(&file_write("app2", "index.html", b"z")).await.unwrap();

	assert!(adapter.file_exists("app1", "index.html").await.unwrap());
	assert!(!adapter.file_exists("app1", "missing.html").await.unwrap());

	let removed = adapter.delete_site_files("app1").await.unwrap();
	assert_eq!(removed, 2);
	assert!(!adapter.file_exists("app1", "index.html").await.unwrap());
	// Other sites are untouched by the range delete
	assert!(adapter.file_exists("app2", "index.html").await.unwrap());
}

#[tokio::test]
async fn test_write_batch_is_atomic_per_deploy() {
	let (adapter, _temp) = create_test_adapter().await;

	let files = vec![
		file_write("app1", "index.html", b"a"),
		file_write("app1", "about.html", b"b"),
		file_write("app1", "assets/main-1f2e3d.css", b"c"),
	];
	adapter.write_files(&files).await.unwrap();

	let listed = adapter.list_files("app1").await.unwrap();
	assert_eq!(listed.len(), 3);
}

#[tokio::test]
async fn test_read_file_by_app() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.write_file(&file_write("app1", "index.html", b"via-app")).await.unwrap();
	let record = adapter.read_file_by_app("app1", "index.html").await.unwrap();
	assert_eq!(record.content, b"via-app");
}

#[tokio::test]
async fn test_app_crud() {
	let (adapter, _temp) = create_test_adapter().await;

	let app = AppRecord {
		app_id: "a1b2c3".into(),
		title: Some("My App".into()),
		visibility: Visibility::Public,
		provenance: Provenance {
			source: Some("cli".into()),
			..Provenance::default()
		},
		forked_from_id: None,
		env: [("GREETING".into(), "hello".into())].into_iter().collect(),
		created_at: Timestamp::now(),
		updated_at: Timestamp::now(),
	};
	adapter.create_app(&app).await.expect("Should create app");

	let read = adapter.read_app("a1b2c3").await.unwrap();
	assert_eq!(read.title.as_deref(), Some("My App"));
	assert_eq!(read.env.get("GREETING").map(AsRef::as_ref), Some("hello"));
	assert_eq!(read.provenance.source.as_deref(), Some("cli"));

	let patch = AppPatch {
		title: Patch::Value("Renamed".into()),
		visibility: Patch::Value(Visibility::Private),
		env: Patch::Undefined,
	};
	adapter.update_app("a1b2c3", &patch).await.unwrap();
	let read = adapter.read_app("a1b2c3").await.unwrap();
	assert_eq!(read.title.as_deref(), Some("Renamed"));
	assert_eq!(read.visibility, Visibility::Private);
	// Untouched fields survive the patch
	assert_eq!(read.env.get("GREETING").map(AsRef::as_ref), Some("hello"));

	adapter.delete_app("a1b2c3").await.unwrap();
	assert!(adapter.read_app("a1b2c3").await.is_err());
}

#[tokio::test]
async fn test_alias_targets_roundtrip() {
	let (adapter, _temp) = create_test_adapter().await;
	let now = Timestamp::now();

	let aliases = vec![
		AliasRecord {
			subdomain: "myapp".into(),
			target: AliasTarget::App { app_id: "a1".into() },
			created_at: now,
			updated_at: now,
		},
		AliasRecord {
			subdomain: "old".into(),
			target: AliasTarget::Redirect { url: "https://new.example.com".into() },
			created_at: now,
			updated_at: now,
		},
		AliasRecord {
			subdomain: "held".into(),
			target: AliasTarget::Reserved,
			created_at: now,
			updated_at: now,
		},
		AliasRecord {
			subdomain: "canary".into(),
			target: AliasTarget::Split {
				targets: vec![
					SplitTarget { app_id: "a1".into(), weight: 90 },
					SplitTarget { app_id: "a2".into(), weight: 10 },
				],
			},
			created_at: now,
			updated_at: now,
		},
	];
	for alias in &aliases {
		adapter.upsert_alias(alias).await.unwrap();
	}

	match adapter.read_alias("myapp").await.unwrap().target {
		AliasTarget::App { app_id } => assert_eq!(app_id.as_ref(), "a1"),
		other => panic!("expected app target, got {:?}", other),
	}
	match adapter.read_alias("old").await.unwrap().target {
		AliasTarget::Redirect { url } => assert_eq!(url.as_ref(), "https://new.example.com"),
		other => panic!("expected redirect target, got {:?}", other),
	}
	assert!(matches!(adapter.read_alias("held").await.unwrap().target, AliasTarget::Reserved));
	match adapter.read_alias("canary").await.unwrap().target {
		AliasTarget::Split { targets } => {
			assert_eq!(targets.len(), 2);
			assert_eq!(targets[0].weight, 90);
		}
		other => panic!("expected split target, got {:?}", other),
	}

	assert_eq!(adapter.list_aliases().await.unwrap().len(), 4);
	adapter.delete_alias("held").await.unwrap();
	assert!(adapter.read_alias("held").await.is_err());
}

#[tokio::test]
async fn test_alias_upsert_retargets() {
	let (adapter, _temp) = create_test_adapter().await;
	let now = Timestamp::now();

	let mut alias = AliasRecord {
		subdomain: "myapp".into(),
		target: AliasTarget::App { app_id: "a1".into() },
		created_at: now,
		updated_at: now,
	};
	adapter.upsert_alias(&alias).await.unwrap();

	alias.target = AliasTarget::App { app_id: "a2".into() };
	adapter.upsert_alias(&alias).await.unwrap();

	match adapter.read_alias("myapp").await.unwrap().target {
		AliasTarget::App { app_id } => assert_eq!(app_id.as_ref(), "a2"),
		other => panic!("expected app target, got {:?}", other),
	}
}
