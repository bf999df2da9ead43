//! Bounded in-memory cache for VFS content.
//!
//! Entries are keyed by `"site:path"` and bounded by a simple count; on
//! overflow the whole map is cleared. Invalidation is driven by the write
//! queue consumer, in the same task as the commit. A generation counter,
//! bumped under the write lock on every invalidation, keeps a read that
//! loaded a row before a commit from inserting that row afterwards: the
//! reader snapshots the generation before loading and the insert is refused
//! if any invalidation landed in between.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::prelude::*;
use fazt_types::types::FileRecord;

/// Cache entry count bound. On overflow the whole map is cleared; the policy
/// is intentionally coarse so it can never serve a stale entry.
pub const CACHE_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone)]
pub struct CachedFile {
	pub content: Vec<u8>,
	pub size_bytes: u64,
	pub mime_type: Box<str>,
	pub hash: Box<str>,
	pub mtime: Timestamp,
}

impl From<FileRecord> for CachedFile {
	fn from(record: FileRecord) -> Self {
		Self {
			size_bytes: record.size_bytes,
			mime_type: record.mime_type,
			hash: record.hash,
			mtime: record.updated_at,
			content: record.content,
		}
	}
}

pub fn cache_key(site_id: &str, path: &str) -> Box<str> {
	format!("{}:{}", site_id, path).into()
}

#[derive(Debug, Default)]
pub struct FileCache {
	entries: RwLock<HashMap<Box<str>, Arc<CachedFile>>>,
	generation: AtomicU64,
}

impl FileCache {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Snapshot the generation before loading from the store; hand it back
	/// to `put_if_fresh` so a load that raced a commit is never cached.
	pub fn begin_read(&self) -> u64 {
		self.generation.load(Ordering::Acquire)
	}

	pub fn get(&self, key: &str) -> Option<Arc<CachedFile>> {
		self.entries.read().get(key).cloned()
	}

	pub fn contains(&self, key: &str) -> bool {
		self.entries.read().contains_key(key)
	}

	/// Insert unless an invalidation landed since `begin_read`.
	pub fn put_if_fresh(&self, key: Box<str>, file: Arc<CachedFile>, read_generation: u64) {
		let mut entries = self.entries.write();
		if self.generation.load(Ordering::Acquire) != read_generation {
			return;
		}
		if entries.len() >= CACHE_MAX_ENTRIES {
			debug!("vfs cache full, clearing {} entries", entries.len());
			entries.clear();
		}
		entries.insert(key, file);
	}

	/// Drop a set of keys. The generation bump happens under the write lock
	/// so it is ordered against every in-flight `put_if_fresh`.
	pub fn invalidate_keys(&self, keys: &[Box<str>]) {
		let mut entries = self.entries.write();
		self.generation.fetch_add(1, Ordering::Release);
		for key in keys {
			entries.remove(key);
		}
	}

	/// Drop every entry of one site.
	pub fn purge_site(&self, site_id: &str) {
		let prefix = format!("{}:", site_id);
		let mut entries = self.entries.write();
		self.generation.fetch_add(1, Ordering::Release);
		entries.retain(|key, _| !key.starts_with(&prefix));
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cached(content: &[u8]) -> Arc<CachedFile> {
		Arc::new(CachedFile {
			content: content.to_vec(),
			size_bytes: content.len() as u64,
			mime_type: "text/plain".into(),
			hash: "h".into(),
			mtime: Timestamp::now(),
		})
	}

	#[test]
	fn test_cache_key_shape() {
		assert_eq!(cache_key("app1", "index.html").as_ref(), "app1:index.html");
	}

	#[test]
	fn test_put_get_roundtrip() {
		let cache = FileCache::new();
		let generation = cache.begin_read();
		cache.put_if_fresh(cache_key("s", "a"), cached(b"x"), generation);
		assert!(cache.get("s:a").is_some());
		assert!(cache.contains("s:a"));
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn test_invalidation_refuses_stale_insert() {
		let cache = FileCache::new();
		// A reader snapshots the generation, then a write invalidates the
		// key before the reader gets to insert
		let generation = cache.begin_read();
		cache.invalidate_keys(&[cache_key("s", "a")]);
		cache.put_if_fresh(cache_key("s", "a"), cached(b"stale"), generation);
		assert!(cache.get("s:a").is_none());

		// A fresh read after the invalidation inserts normally
		let generation = cache.begin_read();
		cache.put_if_fresh(cache_key("s", "a"), cached(b"current"), generation);
		assert_eq!(cache.get("s:a").unwrap().content, b"current");
	}

	#[test]
	fn test_invalidate_keys_removes_entries() {
		let cache = FileCache::new();
		let generation = cache.begin_read();
		cache.put_if_fresh(cache_key("s", "a"), cached(b"x"), generation);
		cache.put_if_fresh(cache_key("s", "b"), cached(b"y"), generation);
		cache.invalidate_keys(&[cache_key("s", "a")]);
		assert!(cache.get("s:a").is_none());
		assert!(cache.get("s:b").is_some());
	}

	#[test]
	fn test_purge_site_only_touches_that_site() {
		let cache = FileCache::new();
		let generation = cache.begin_read();
		cache.put_if_fresh(cache_key("s1", "a"), cached(b"x"), generation);
		cache.put_if_fresh(cache_key("s1", "b"), cached(b"y"), generation);
		cache.put_if_fresh(cache_key("s2", "a"), cached(b"z"), generation);
		cache.purge_site("s1");
		assert!(cache.get("s1:a").is_none());
		assert!(cache.get("s1:b").is_none());
		assert!(cache.get("s2:a").is_some());
	}

	#[test]
	fn test_overflow_clears_wholesale() {
		let cache = FileCache::new();
		let generation = cache.begin_read();
		for i in 0..CACHE_MAX_ENTRIES {
			cache.put_if_fresh(cache_key("s", &i.to_string()), cached(b"x"), generation);
		}
		assert_eq!(cache.len(), CACHE_MAX_ENTRIES);
		cache.put_if_fresh(cache_key("s", "overflow"), cached(b"x"), generation);
		// The map was cleared and only the newest entry remains
		assert_eq!(cache.len(), 1);
		assert!(cache.contains("s:overflow"));
	}
}

// vim: ts=4
