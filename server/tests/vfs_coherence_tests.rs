//! VFS cache coherence tests
//!
//! A completed write must be observable by the next read of the same key,
//! whether or not the key was cached before the write.

mod common;

use common::{seed_file, test_app};
use fazt::core::budget::RequestBudget;
use fazt::vfs::Vfs;
use fazt_types::utils::sha256_hex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_then_read_sees_new_content() {
	let (app, _temp) = test_app().await;

	seed_file(&app, "site1", "index.html", b"version one", "text/html").await;

	// Prime the cache
	let first = app.vfs.read_file("site1", "index.html").await.unwrap();
	assert_eq!(first.hash.as_ref(), sha256_hex(b"version one"));

	// Overwrite; the cached entry must not survive the commit
	seed_file(&app, "site1", "index.html", b"version two", "text/html").await;

	let second = app.vfs.read_file("site1", "index.html").await.unwrap();
	assert_eq!(second.content, b"version two");
	assert_eq!(second.hash.as_ref(), sha256_hex(b"version two"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completed_write_visible_to_other_tasks_under_racing_reads() {
	let (app, _temp) = test_app().await;
	seed_file(&app, "site1", "page.html", b"version 0", "text/html").await;

	// A background reader hammers the cache the whole time, so every write
	// races cache hits and repopulating misses
	let reader_app = app.clone();
	let stop = Arc::new(AtomicBool::new(false));
	let reader_stop = stop.clone();
	let reader = tokio::spawn(async move {
		while !reader_stop.load(Ordering::Relaxed) {
			if let Ok(file) = reader_app.vfs.read_file("site1", "page.html").await {
				assert_eq!(file.hash.as_ref(), sha256_hex(&file.content));
			}
			tokio::task::yield_now().await;
		}
	});

	for i in 1..=40u32 {
		let content = format!("version {}", i);
		seed_file(&app, "site1", "page.html", content.as_bytes(), "text/html").await;

		// Once the write has returned, the next read on ANY task must see
		// the new content, cached or not
		let check_app = app.clone();
		let expected = content.clone();
		tokio::spawn(async move {
			let file = check_app.vfs.read_file("site1", "page.html").await.unwrap();
			assert_eq!(
				file.content,
				expected.as_bytes(),
				"stale read after completed write of {:?}",
				expected
			);
			assert_eq!(file.hash.as_ref(), sha256_hex(expected.as_bytes()));
		})
		.await
		.unwrap();
	}

	stop.store(true, Ordering::Relaxed);
	reader.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_is_cached_between_writes() {
	let (app, _temp) = test_app().await;

	seed_file(&app, "site1", "a.txt", b"aaa", "text/plain").await;
	assert_eq!(app.vfs.cached_entry_count(), 0);
	let _ = app.vfs.read_file("site1", "a.txt").await.unwrap();
	assert_eq!(app.vfs.cached_entry_count(), 1);

	// Cache-first exists
	assert!(app.vfs.exists("site1", "a.txt").await.unwrap());
	assert!(!app.vfs.exists("site1", "missing.txt").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_site_purges_cache_and_rows() {
	let (app, _temp) = test_app().await;

	seed_file(&app, "site1", "index.html", b"one", "text/html").await;
	seed_file(&app, "site1", "about.html", b"two", "text/html").await;
	seed_file(&app, "site2", "index.html", b"other", "text/html").await;

	// Cache all three
	let _ = app.vfs.read_file("site1", "index.html").await.unwrap();
	let _ = app.vfs.read_file("site1", "about.html").await.unwrap();
	let _ = app.vfs.read_file("site2", "index.html").await.unwrap();

	let budget = RequestBudget::new();
	let removed = app.vfs.delete_site("site1", &budget).await.unwrap();
	assert_eq!(removed, 2);

	assert!(app.vfs.read_file("site1", "index.html").await.is_err());
	assert!(app.vfs.read_file("site1", "about.html").await.is_err());
	// The other site's entry survives, still cached
	assert!(app.vfs.read_file("site2", "index.html").await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_write_invalidates_every_key() {
	let (app, _temp) = test_app().await;

	seed_file(&app, "site1", "a.html", b"a1", "text/html").await;
	seed_file(&app, "site1", "b.html", b"b1", "text/html").await;
	let _ = app.vfs.read_file("site1", "a.html").await.unwrap();
	let _ = app.vfs.read_file("site1", "b.html").await.unwrap();

	let budget = RequestBudget::new();
	let files = vec![
		Vfs::prepare_write("site1", "a.html", b"a2".to_vec(), "text/html", None),
		Vfs::prepare_write("site1", "b.html", b"b2".to_vec(), "text/html", None),
	];
	app.vfs.write_files(files, &budget).await.unwrap();

	assert_eq!(app.vfs.read_file("site1", "a.html").await.unwrap().content, b"a2");
	assert_eq!(app.vfs.read_file("site1", "b.html").await.unwrap().content, b"b2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsafe_paths_never_land_in_store() {
	let (app, _temp) = test_app().await;
	let budget = RequestBudget::new();

	for bad in ["../escape.html", "a/../../b.html", "/absolute.html", ""] {
		let write = Vfs::prepare_write("site1", bad, b"x".to_vec(), "text/html", None);
		assert!(
			app.vfs.write_file(write, &budget).await.is_err(),
			"path {:?} must be refused",
			bad
		);
	}
	// Nothing was written for the traversal attempts
	assert!(!app.vfs.exists("site1", "../escape.html").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_storage_admission_honors_budget() {
	let (app, _temp) = test_app().await;

	// A spent budget is refused before the queue is even touched
	let spent = RequestBudget::with_timeout(std::time::Duration::ZERO);
	let write = Vfs::prepare_write("site1", "x.txt", b"x".to_vec(), "text/plain", None);
	let err = app.vfs.write_file(write, &spent).await.unwrap_err();
	assert!(err.retryable(), "admission failure must be retryable, got {:?}", err);

	// Nothing was written
	assert!(!app.vfs.exists("site1", "x.txt").await.unwrap());
}
