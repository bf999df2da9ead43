//! File rows: the persistent half of the VFS.
//!
//! The composite key is `(site_id, path)`. Upserts keep `created_at` and
//! bump `updated_at`; the `hash` column always matches the current content.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use fazt::prelude::*;
use fazt::types::{FileInfo, FileRecord, FileWrite, Timestamp};

use crate::{collect_res, map_db_err, map_res};

fn row_to_record(row: SqliteRow) -> Result<FileRecord, sqlx::Error> {
	Ok(FileRecord {
		site_id: row.get::<String, _>("site_id").into(),
		path: row.get::<String, _>("path").into(),
		content: row.get::<Vec<u8>, _>("content"),
		size_bytes: row.get::<i64, _>("size_bytes") as u64,
		mime_type: row.get::<String, _>("mime_type").into(),
		hash: row.get::<String, _>("hash").into(),
		app_id: row.get::<Option<String>, _>("app_id").map(Into::into),
		created_at: Timestamp(row.get::<i64, _>("created_at")),
		updated_at: Timestamp(row.get::<i64, _>("updated_at")),
	})
}

async fn write_one(tx: &mut sqlx::SqliteConnection, f: &FileWrite) -> Result<(), sqlx::Error> {
	sqlx::query(
		"INSERT INTO files (site_id, path, content, size_bytes, mime_type, hash, app_id)
		VALUES (?, ?, ?, ?, ?, ?, ?)
		ON CONFLICT(site_id, path) DO UPDATE SET
			content = excluded.content,
			size_bytes = excluded.size_bytes,
			mime_type = excluded.mime_type,
			hash = excluded.hash,
			app_id = excluded.app_id,
			updated_at = unixepoch()",
	)
	.bind(f.site_id.as_ref())
	.bind(f.path.as_ref())
	.bind(f.content.as_slice())
	.bind(f.content.len() as i64)
	.bind(f.mime_type.as_ref())
	.bind(f.hash.as_ref())
	.bind(f.app_id.as_deref())
	.execute(&mut *tx)
	.await?;
	Ok(())
}

pub(crate) async fn write(db: &SqlitePool, f: &FileWrite) -> FzResult<()> {
	let mut conn = db.acquire().await.map_err(map_db_err)?;
	write_one(&mut conn, f).await.map_err(map_db_err)
}

/// Batch write in a single transaction, used by deploys so an archive lands
/// atomically.
pub(crate) async fn write_batch(db: &SqlitePool, files: &[FileWrite]) -> FzResult<()> {
	let mut tx = db.begin().await.map_err(map_db_err)?;
	for f in files {
		write_one(&mut tx, f).await.map_err(map_db_err)?;
	}
	tx.commit().await.map_err(map_db_err)
}

pub(crate) async fn read(db: &SqlitePool, site_id: &str, path: &str) -> FzResult<FileRecord> {
	let row = sqlx::query("SELECT * FROM files WHERE site_id = ? AND path = ?")
		.bind(site_id)
		.bind(path)
		.fetch_one(db)
		.await;
	map_res(row, row_to_record)
}

pub(crate) async fn read_by_app(db: &SqlitePool, app_id: &str, path: &str) -> FzResult<FileRecord> {
	let row = sqlx::query("SELECT * FROM files WHERE app_id = ? AND path = ?")
		.bind(app_id)
		.bind(path)
		.fetch_one(db)
		.await;
	map_res(row, row_to_record)
}

pub(crate) async fn exists(db: &SqlitePool, site_id: &str, path: &str) -> FzResult<bool> {
	let row = sqlx::query("SELECT COUNT(*) AS n FROM files WHERE site_id = ? AND path = ?")
		.bind(site_id)
		.bind(path)
		.fetch_one(db)
		.await;
	map_res(row, |r| Ok(r.get::<i64, _>("n") > 0))
}

pub(crate) async fn list(db: &SqlitePool, site_id: &str) -> FzResult<Vec<FileInfo>> {
	let rows = sqlx::query(
		"SELECT path, size_bytes, mime_type, hash FROM files WHERE site_id = ? ORDER BY path",
	)
	.bind(site_id)
	.fetch_all(db)
	.await
	.map_err(map_db_err)?;

	collect_res(rows.into_iter().map(|row| {
		Ok(FileInfo {
			path: row.get::<String, _>("path").into(),
			size_bytes: row.get::<i64, _>("size_bytes") as u64,
			mime_type: row.get::<String, _>("mime_type").into(),
			hash: row.get::<String, _>("hash").into(),
		})
	}))
}

pub(crate) async fn delete_site(db: &SqlitePool, site_id: &str) -> FzResult<u64> {
	let res = sqlx::query("DELETE FROM files WHERE site_id = ?")
		.bind(site_id)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(res.rows_affected())
}

// vim: ts=4
