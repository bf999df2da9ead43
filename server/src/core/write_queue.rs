//! Single-writer serializer in front of the persistent store.
//!
//! Every mutation in the process goes through this queue, so the store
//! observes writes strictly in submission order. Producers are admission
//! controlled: a submit fails fast with a retryable error when the queue is
//! full, when the store signals busy, or when the request's storage budget
//! is already spent. Readers never touch the queue.
//!
//! The consumer also owns VFS cache invalidation for file mutations: entries
//! are dropped in the same task as the commit, before the submitter's result
//! resolves, so no other task can read a stale entry after a write it
//! observed as completed.

use flume::{Receiver, Sender};
use futures::channel::oneshot;
use std::sync::Arc;

use crate::core::budget::RequestBudget;
use crate::prelude::*;
use crate::vfs::cache::{FileCache, cache_key};
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::types::{
	ActivityEntry, AliasRecord, AllowlistEntry, ApiKeyRecord, AppPatch, AppRecord,
	DeploymentRecord, FileWrite, SecretRecord,
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A persistent mutation. One variant per store adapter mutation so the
/// consumer stays a plain match.
#[derive(Debug)]
pub enum WriteOp {
	WriteFile(FileWrite),
	WriteFiles(Vec<FileWrite>),
	DeleteSiteFiles(Box<str>),
	CreateApp(AppRecord),
	UpdateApp { app_id: Box<str>, patch: AppPatch },
	DeleteApp(Box<str>),
	UpsertAlias(AliasRecord),
	DeleteAlias(Box<str>),
	KvSet { site_id: Box<str>, key: Box<str>, value: serde_json::Value },
	KvDel { site_id: Box<str>, key: Box<str> },
	DocInsert { site_id: Box<str>, collection: Box<str>, doc_id: Box<str>, data: serde_json::Value },
	DocUpdate { site_id: Box<str>, collection: Box<str>, doc_id: Box<str>, data: serde_json::Value },
	DocDelete { site_id: Box<str>, collection: Box<str>, doc_id: Box<str> },
	BlobPut { site_id: Box<str>, key: Box<str>, content: Vec<u8>, mime_type: Option<Box<str>> },
	BlobDel { site_id: Box<str>, key: Box<str> },
	PutSecret(SecretRecord),
	DeleteSecret(Box<str>),
	AllowlistAdd(AllowlistEntry),
	AllowlistDelete(i64),
	CreateApiKey(ApiKeyRecord),
	TouchApiKey(Box<str>),
	RecordDeployment(DeploymentRecord),
	AppendActivity(ActivityEntry),
}

#[derive(Debug)]
pub enum WriteOutcome {
	Done,
	/// Rows affected by a range delete.
	Deleted(u64),
	/// Row id produced by an insert.
	Id(i64),
}

struct WriteJob {
	op: WriteOp,
	done: oneshot::Sender<FzResult<WriteOutcome>>,
}

pub struct WriteQueue {
	tx: Sender<WriteJob>,
}

impl WriteQueue {
	/// Create the queue and spawn its single consumer task.
	pub fn start(
		store: Arc<dyn StoreAdapter>,
		capacity: usize,
		cache: Arc<FileCache>,
	) -> Arc<Self> {
		let (tx, rx) = flume::bounded::<WriteJob>(capacity);
		tokio::spawn(consume(store, cache, rx));
		Arc::new(Self { tx })
	}

	/// Submit a mutation. Fails fast with `StorageBusy` when the queue is at
	/// capacity or the budget can no longer cover a store round-trip.
	pub async fn submit(&self, op: WriteOp, budget: &RequestBudget) -> FzResult<WriteOutcome> {
		if !budget.storage_admissible() {
			debug!("write admission refused: storage budget spent");
			return Err(Error::StorageBusy);
		}
		let (done, result) = oneshot::channel();
		self.tx.try_send(WriteJob { op, done }).map_err(|err| match err {
			flume::TrySendError::Full(_) => {
				debug!("write admission refused: queue full");
				Error::StorageBusy
			}
			flume::TrySendError::Disconnected(_) => {
				Error::Internal("write queue consumer gone".into())
			}
		})?;
		result.await.map_err(|_| Error::Internal("write queue dropped result".into()))?
	}
}

impl std::fmt::Debug for WriteQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WriteQueue").field("queued", &self.tx.len()).finish()
	}
}

/// Cache entries a mutation makes stale.
enum Invalidation {
	None,
	Keys(Vec<Box<str>>),
	Site(Box<str>),
}

fn invalidation_for(op: &WriteOp) -> Invalidation {
	match op {
		WriteOp::WriteFile(f) => Invalidation::Keys(vec![cache_key(&f.site_id, &f.path)]),
		WriteOp::WriteFiles(files) => {
			Invalidation::Keys(files.iter().map(|f| cache_key(&f.site_id, &f.path)).collect())
		}
		WriteOp::DeleteSiteFiles(site_id) => Invalidation::Site(site_id.clone()),
		_ => Invalidation::None,
	}
}

fn apply_invalidation(cache: &FileCache, invalidation: &Invalidation) {
	match invalidation {
		Invalidation::None => {}
		Invalidation::Keys(keys) => cache.invalidate_keys(keys),
		Invalidation::Site(site_id) => cache.purge_site(site_id),
	}
}

async fn consume(store: Arc<dyn StoreAdapter>, cache: Arc<FileCache>, rx: Receiver<WriteJob>) {
	while let Ok(job) = rx.recv_async().await {
		let invalidation = invalidation_for(&job.op);
		// Stale entries drop before the commit, and again after it for any
		// that slipped back in between; the cache's generation check keeps a
		// read of the old row from being cached past this point.
		apply_invalidation(&cache, &invalidation);
		let result = apply(&store, job.op).await;
		if result.is_ok() {
			apply_invalidation(&cache, &invalidation);
		}
		if let Err(err) = &result {
			warn!("write failed: {}", err);
		}
		// The submitter may have given up on the deadline; that is fine, the
		// mutation itself has already committed.
		let _ = job.done.send(result);
	}
	info!("write queue consumer stopped");
}

async fn apply(store: &Arc<dyn StoreAdapter>, op: WriteOp) -> FzResult<WriteOutcome> {
	match op {
		WriteOp::WriteFile(f) => store.write_file(&f).await.map(|()| WriteOutcome::Done),
		WriteOp::WriteFiles(files) => {
			store.write_files(&files).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::DeleteSiteFiles(site_id) => {
			store.delete_site_files(&site_id).await.map(WriteOutcome::Deleted)
		}
		WriteOp::CreateApp(app) => store.create_app(&app).await.map(|()| WriteOutcome::Done),
		WriteOp::UpdateApp { app_id, patch } => {
			store.update_app(&app_id, &patch).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::DeleteApp(app_id) => store.delete_app(&app_id).await.map(|()| WriteOutcome::Done),
		WriteOp::UpsertAlias(alias) => {
			store.upsert_alias(&alias).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::DeleteAlias(subdomain) => {
			store.delete_alias(&subdomain).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::KvSet { site_id, key, value } => {
			store.kv_set(&site_id, &key, &value).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::KvDel { site_id, key } => {
			store.kv_del(&site_id, &key).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::DocInsert { site_id, collection, doc_id, data } => store
			.doc_insert(&site_id, &collection, &doc_id, &data)
			.await
			.map(|()| WriteOutcome::Done),
		WriteOp::DocUpdate { site_id, collection, doc_id, data } => store
			.doc_update(&site_id, &collection, &doc_id, &data)
			.await
			.map(|()| WriteOutcome::Done),
		WriteOp::DocDelete { site_id, collection, doc_id } => {
			store.doc_delete(&site_id, &collection, &doc_id).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::BlobPut { site_id, key, content, mime_type } => store
			.blob_put(&site_id, &key, &content, mime_type.as_deref())
			.await
			.map(|()| WriteOutcome::Done),
		WriteOp::BlobDel { site_id, key } => {
			store.blob_del(&site_id, &key).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::PutSecret(secret) => store.put_secret(&secret).await.map(|()| WriteOutcome::Done),
		WriteOp::DeleteSecret(name) => {
			store.delete_secret(&name).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::AllowlistAdd(entry) => store.add_allowlist(&entry).await.map(WriteOutcome::Id),
		WriteOp::AllowlistDelete(entry_id) => {
			store.delete_allowlist(entry_id).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::CreateApiKey(key) => store.create_api_key(&key).await.map(|()| WriteOutcome::Done),
		WriteOp::TouchApiKey(key_id) => {
			store.touch_api_key(&key_id).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::RecordDeployment(deployment) => {
			store.record_deployment(&deployment).await.map(|()| WriteOutcome::Done)
		}
		WriteOp::AppendActivity(entry) => {
			store.append_activity(&entry).await.map(|()| WriteOutcome::Done)
		}
	}
}

// vim: ts=4
