//! Capability storage tables: kv, docs, blobs.
//!
//! These back the `fazt.storage.*` namespaces. Every row is keyed by the
//! owning site so handlers can never reach across sites.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use fazt::prelude::*;
use fazt::types::{BlobRecord, DocRecord, Timestamp};

use crate::{collect_res, map_db_err};

// Key-value
//***********

pub(crate) async fn kv_get(
	db: &SqlitePool,
	site_id: &str,
	key: &str,
) -> FzResult<Option<serde_json::Value>> {
	let row = sqlx::query("SELECT value FROM kv WHERE site_id = ? AND key = ?")
		.bind(site_id)
		.bind(key)
		.fetch_optional(db)
		.await
		.map_err(map_db_err)?;

	Ok(row.and_then(|r| {
		let value: Option<String> = r.get("value");
		value.and_then(|v| serde_json::from_str(&v).ok())
	}))
}

pub(crate) async fn kv_set(
	db: &SqlitePool,
	site_id: &str,
	key: &str,
	value: &serde_json::Value,
) -> FzResult<()> {
	sqlx::query(
		"INSERT OR REPLACE INTO kv (site_id, key, value, updated_at)
		VALUES (?, ?, ?, unixepoch())",
	)
	.bind(site_id)
	.bind(key)
	.bind(value.to_string())
	.execute(db)
	.await
	.map_err(map_db_err)?;
	Ok(())
}

pub(crate) async fn kv_del(db: &SqlitePool, site_id: &str, key: &str) -> FzResult<()> {
	sqlx::query("DELETE FROM kv WHERE site_id = ? AND key = ?")
		.bind(site_id)
		.bind(key)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(())
}

// Documents
//***********

fn row_to_doc(row: SqliteRow) -> Result<DocRecord, sqlx::Error> {
	let data: String = row.get("data");
	Ok(DocRecord {
		doc_id: row.get::<String, _>("doc_id").into(),
		collection: row.get::<String, _>("collection").into(),
		data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
		created_at: Timestamp(row.get::<i64, _>("created_at")),
		updated_at: Timestamp(row.get::<i64, _>("updated_at")),
	})
}

pub(crate) async fn doc_insert(
	db: &SqlitePool,
	site_id: &str,
	collection: &str,
	doc_id: &str,
	data: &serde_json::Value,
) -> FzResult<()> {
	sqlx::query("INSERT INTO docs (site_id, collection, doc_id, data) VALUES (?, ?, ?, ?)")
		.bind(site_id)
		.bind(collection)
		.bind(doc_id)
		.bind(data.to_string())
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(())
}

pub(crate) async fn doc_query(
	db: &SqlitePool,
	site_id: &str,
	collection: &str,
	limit: u32,
) -> FzResult<Vec<DocRecord>> {
	let rows = sqlx::query(
		"SELECT * FROM docs WHERE site_id = ? AND collection = ? ORDER BY created_at LIMIT ?",
	)
	.bind(site_id)
	.bind(collection)
	.bind(i64::from(limit))
	.fetch_all(db)
	.await
	.map_err(map_db_err)?;
	collect_res(rows.into_iter().map(row_to_doc))
}

pub(crate) async fn doc_update(
	db: &SqlitePool,
	site_id: &str,
	collection: &str,
	doc_id: &str,
	data: &serde_json::Value,
) -> FzResult<()> {
	let res = sqlx::query(
		"UPDATE docs SET data = ?, updated_at = unixepoch()
		WHERE site_id = ? AND collection = ? AND doc_id = ?",
	)
	.bind(data.to_string())
	.bind(site_id)
	.bind(collection)
	.bind(doc_id)
	.execute(db)
	.await
	.map_err(map_db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn doc_delete(
	db: &SqlitePool,
	site_id: &str,
	collection: &str,
	doc_id: &str,
) -> FzResult<()> {
	sqlx::query("DELETE FROM docs WHERE site_id = ? AND collection = ? AND doc_id = ?")
		.bind(site_id)
		.bind(collection)
		.bind(doc_id)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(())
}

// Blobs
//*******

pub(crate) async fn blob_put(
	db: &SqlitePool,
	site_id: &str,
	key: &str,
	content: &[u8],
	mime_type: Option<&str>,
) -> FzResult<()> {
	sqlx::query("INSERT OR REPLACE INTO blobs (site_id, key, content, mime_type) VALUES (?, ?, ?, ?)")
		.bind(site_id)
		.bind(key)
		.bind(content)
		.bind(mime_type)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(())
}

pub(crate) async fn blob_get(
	db: &SqlitePool,
	site_id: &str,
	key: &str,
) -> FzResult<Option<BlobRecord>> {
	let row = sqlx::query("SELECT * FROM blobs WHERE site_id = ? AND key = ?")
		.bind(site_id)
		.bind(key)
		.fetch_optional(db)
		.await
		.map_err(map_db_err)?;

	Ok(row.map(|r| BlobRecord {
		key: r.get::<String, _>("key").into(),
		content: r.get::<Vec<u8>, _>("content"),
		mime_type: r.get::<Option<String>, _>("mime_type").map(Into::into),
		created_at: Timestamp(r.get::<i64, _>("created_at")),
	}))
}

pub(crate) async fn blob_del(db: &SqlitePool, site_id: &str, key: &str) -> FzResult<()> {
	sqlx::query("DELETE FROM blobs WHERE site_id = ? AND key = ?")
		.bind(site_id)
		.bind(key)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(())
}

// vim: ts=4
