//! Database-backed virtual file system with a bounded read-through cache.
//!
//! Files are keyed by `(site_id, path)`. Reads are cache-first and safe to
//! race. Writes are serialized through the write queue, whose consumer
//! invalidates the affected cache entries in the same task as the commit,
//! so a read that follows a completed write always sees the new content.

pub mod cache;
pub mod seed;

use std::sync::Arc;

use crate::core::budget::RequestBudget;
use crate::core::write_queue::{WriteOp, WriteOutcome, WriteQueue};
use crate::prelude::*;
use cache::cache_key;
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::types::{FileRecord, FileWrite};
use fazt_types::utils::sha256_hex;

pub use cache::{CACHE_MAX_ENTRIES, CachedFile, FileCache};

/// Reserved site id backing the landing page.
pub const SITE_ROOT: &str = "root";
/// Reserved site id backing the not-found page.
pub const SITE_NOT_FOUND: &str = "404";

/// Paths stored in the VFS are forward-slashed, relative, and never contain
/// `..` segments. Writes violating this are refused outright.
pub fn validate_vfs_path(path: &str) -> FzResult<()> {
	if path.is_empty() {
		return Err(Error::Validation("empty file path".into()));
	}
	if path.starts_with('/') {
		return Err(Error::Validation(format!("absolute file path: {}", path)));
	}
	if path.contains('\\') {
		return Err(Error::Validation(format!("backslash in file path: {}", path)));
	}
	if path.split('/').any(|segment| segment == "..") {
		return Err(Error::Validation(format!("file path escapes site root: {}", path)));
	}
	Ok(())
}

#[derive(Debug)]
pub struct Vfs {
	store: Arc<dyn StoreAdapter>,
	queue: Arc<WriteQueue>,
	cache: Arc<FileCache>,
}

impl Vfs {
	pub fn new(
		store: Arc<dyn StoreAdapter>,
		queue: Arc<WriteQueue>,
		cache: Arc<FileCache>,
	) -> Arc<Self> {
		Arc::new(Self { store, queue, cache })
	}

	/// Build a `FileWrite` with the content hash computed over the full byte
	/// stream.
	pub fn prepare_write(
		site_id: &str,
		path: &str,
		content: Vec<u8>,
		mime_type: &str,
		app_id: Option<&str>,
	) -> FileWrite {
		let hash = sha256_hex(&content);
		FileWrite {
			site_id: site_id.into(),
			path: path.into(),
			mime_type: mime_type.into(),
			hash: hash.into(),
			app_id: app_id.map(Into::into),
			content,
		}
	}

	/// Cache-first read. On miss the row is loaded from the store and the
	/// cache is populated, unless a commit invalidated the key in between.
	pub async fn read_file(&self, site_id: &str, path: &str) -> FzResult<Arc<CachedFile>> {
		let key = cache_key(site_id, path);
		let generation = self.cache.begin_read();
		if let Some(hit) = self.cache.get(&key) {
			return Ok(hit);
		}

		let record = self.store.read_file(site_id, path).await?;
		let file = Arc::new(CachedFile::from(record));
		self.cache.put_if_fresh(key, file.clone(), generation);
		Ok(file)
	}

	/// Read through the `app_id` back-reference. Not cached: this is an
	/// admin-side access path, never the serving hot path.
	pub async fn read_file_by_app(&self, app_id: &str, path: &str) -> FzResult<FileRecord> {
		self.store.read_file_by_app(app_id, path).await
	}

	pub async fn exists(&self, site_id: &str, path: &str) -> FzResult<bool> {
		if self.cache.contains(&cache_key(site_id, path)) {
			return Ok(true);
		}
		self.store.file_exists(site_id, path).await
	}

	/// Upsert one file through the write queue. The queue consumer
	/// invalidates the cache entry in the same task as the commit, so the
	/// write is observable by the next read once this returns.
	pub async fn write_file(&self, file: FileWrite, budget: &RequestBudget) -> FzResult<()> {
		validate_vfs_path(&file.path)?;
		self.queue.submit(WriteOp::WriteFile(file), budget).await?;
		Ok(())
	}

	/// Batch upsert (one transaction) used by deploys.
	pub async fn write_files(&self, files: Vec<FileWrite>, budget: &RequestBudget) -> FzResult<()> {
		for file in &files {
			validate_vfs_path(&file.path)?;
		}
		self.queue.submit(WriteOp::WriteFiles(files), budget).await?;
		Ok(())
	}

	/// Range-delete a site's files. The queue consumer purges the site's
	/// cache entries alongside the delete.
	pub async fn delete_site(&self, site_id: &str, budget: &RequestBudget) -> FzResult<u64> {
		let outcome = self
			.queue
			.submit(WriteOp::DeleteSiteFiles(site_id.into()), budget)
			.await?;
		match outcome {
			WriteOutcome::Deleted(n) => Ok(n),
			_ => Ok(0),
		}
	}

	/// Number of live cache entries. Introspection for tests and the admin
	/// status endpoint.
	pub fn cached_entry_count(&self) -> usize {
		self.cache.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_prepare_write_hashes_content() {
		let fw = Vfs::prepare_write("app1", "index.html", b"<h1>Hi</h1>".to_vec(), "text/html", None);
		assert_eq!(fw.hash.as_ref(), sha256_hex(b"<h1>Hi</h1>"));
		assert_eq!(fw.site_id.as_ref(), "app1");
	}

	#[test]
	fn test_validate_vfs_path() {
		assert!(validate_vfs_path("index.html").is_ok());
		assert!(validate_vfs_path("a/b/c.js").is_ok());
		assert!(validate_vfs_path("").is_err());
		assert!(validate_vfs_path("/abs.html").is_err());
		assert!(validate_vfs_path("a/../b.html").is_err());
		assert!(validate_vfs_path("..").is_err());
		assert!(validate_vfs_path("win\\path.js").is_err());
	}
}

// vim: ts=4
