//! Admin surface rows: the egress allowlist, API keys, deployments, and the
//! activity log.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use fazt::prelude::*;
use fazt::types::{ActivityEntry, AllowlistEntry, ApiKeyRecord, DeploymentRecord, Timestamp};

use crate::{collect_res, map_db_err, map_res};

// Allowlist
//***********

fn row_to_allowlist(row: SqliteRow) -> Result<AllowlistEntry, sqlx::Error> {
	Ok(AllowlistEntry {
		entry_id: row.get::<i64, _>("entry_id"),
		app_id: row.get::<Option<String>, _>("app_id").map(Into::into),
		domain: row.get::<String, _>("domain").into(),
		max_response: row.get::<Option<i64>, _>("max_response").map(|v| v as u64),
		timeout_ms: row.get::<Option<i64>, _>("timeout_ms").map(|v| v as u64),
		rate_limit: row.get::<Option<i64>, _>("rate_limit").map(|v| v as u32),
		rate_burst: row.get::<Option<i64>, _>("rate_burst").map(|v| v as u32),
		cache_ttl: row.get::<Option<i64>, _>("cache_ttl").map(|v| v as u64),
	})
}

pub(crate) async fn allowlist_add(db: &SqlitePool, entry: &AllowlistEntry) -> FzResult<i64> {
	let res = sqlx::query(
		"INSERT INTO net_allowlist
			(app_id, domain, max_response, timeout_ms, rate_limit, rate_burst, cache_ttl)
		VALUES (?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(entry.app_id.as_deref())
	.bind(entry.domain.as_ref())
	.bind(entry.max_response.map(|v| v as i64))
	.bind(entry.timeout_ms.map(|v| v as i64))
	.bind(entry.rate_limit.map(i64::from))
	.bind(entry.rate_burst.map(i64::from))
	.bind(entry.cache_ttl.map(|v| v as i64))
	.execute(db)
	.await
	.map_err(map_db_err)?;
	Ok(res.last_insert_rowid())
}

pub(crate) async fn allowlist_list(db: &SqlitePool) -> FzResult<Vec<AllowlistEntry>> {
	let rows = sqlx::query("SELECT * FROM net_allowlist ORDER BY domain")
		.fetch_all(db)
		.await
		.map_err(map_db_err)?;
	collect_res(rows.into_iter().map(row_to_allowlist))
}

pub(crate) async fn allowlist_delete(db: &SqlitePool, entry_id: i64) -> FzResult<()> {
	let res = sqlx::query("DELETE FROM net_allowlist WHERE entry_id = ?")
		.bind(entry_id)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

/// App-scoped entries win over global entries for the same domain.
pub(crate) async fn allowlist_lookup(
	db: &SqlitePool,
	app_id: &str,
	domain: &str,
) -> FzResult<Option<AllowlistEntry>> {
	let row = sqlx::query(
		"SELECT * FROM net_allowlist
		WHERE domain = ? AND (app_id = ? OR app_id IS NULL)
		ORDER BY app_id IS NULL LIMIT 1",
	)
	.bind(domain)
	.bind(app_id)
	.fetch_optional(db)
	.await
	.map_err(map_db_err)?;
	match row {
		Some(row) => Ok(Some(map_res(Ok(row), row_to_allowlist)?)),
		None => Ok(None),
	}
}

// API keys
//**********

pub(crate) async fn api_key_create(db: &SqlitePool, key: &ApiKeyRecord) -> FzResult<()> {
	sqlx::query("INSERT INTO api_keys (key_id, secret_hash, description) VALUES (?, ?, ?)")
		.bind(key.key_id.as_ref())
		.bind(key.secret_hash.as_ref())
		.bind(key.description.as_ref())
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(())
}

pub(crate) async fn api_key_read(db: &SqlitePool, key_id: &str) -> FzResult<ApiKeyRecord> {
	let row = sqlx::query("SELECT * FROM api_keys WHERE key_id = ?")
		.bind(key_id)
		.fetch_one(db)
		.await;
	map_res(row, |row| {
		Ok(ApiKeyRecord {
			key_id: row.get::<String, _>("key_id").into(),
			secret_hash: row.get::<String, _>("secret_hash").into(),
			description: row.get::<String, _>("description").into(),
			created_at: Timestamp(row.get::<i64, _>("created_at")),
			last_used_at: row.get::<Option<i64>, _>("last_used_at").map(Timestamp),
		})
	})
}

pub(crate) async fn api_key_touch(db: &SqlitePool, key_id: &str) -> FzResult<()> {
	sqlx::query("UPDATE api_keys SET last_used_at = unixepoch() WHERE key_id = ?")
		.bind(key_id)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(())
}

pub(crate) async fn api_key_count(db: &SqlitePool) -> FzResult<u64> {
	let row = sqlx::query("SELECT COUNT(*) AS n FROM api_keys").fetch_one(db).await;
	map_res(row, |r| Ok(r.get::<i64, _>("n") as u64))
}

// Deployments
//*************

pub(crate) async fn deployment_record(
	db: &SqlitePool,
	deployment: &DeploymentRecord,
) -> FzResult<()> {
	sqlx::query(
		"INSERT INTO deployments (deploy_id, app_id, file_count, total_bytes) VALUES (?, ?, ?, ?)",
	)
	.bind(deployment.deploy_id.as_ref())
	.bind(deployment.app_id.as_ref())
	.bind(i64::from(deployment.file_count))
	.bind(deployment.total_bytes as i64)
	.execute(db)
	.await
	.map_err(map_db_err)?;
	Ok(())
}

// Activity log
//**************

pub(crate) async fn activity_append(db: &SqlitePool, entry: &ActivityEntry) -> FzResult<()> {
	sqlx::query("INSERT INTO activity_log (ts, kind, subject, detail) VALUES (?, ?, ?, ?)")
		.bind(entry.ts.0)
		.bind(entry.kind.as_ref())
		.bind(entry.subject.as_ref())
		.bind(entry.detail.as_deref())
		.execute(db)
		.await
		.map_err(map_db_err)?;
	Ok(())
}

pub(crate) async fn activity_list(
	db: &SqlitePool,
	limit: u32,
	offset: u32,
) -> FzResult<Vec<ActivityEntry>> {
	let rows = sqlx::query(
		"SELECT * FROM activity_log ORDER BY entry_id DESC LIMIT ? OFFSET ?",
	)
	.bind(i64::from(limit))
	.bind(i64::from(offset))
	.fetch_all(db)
	.await
	.map_err(map_db_err)?;

	collect_res(rows.into_iter().map(|row| {
		Ok(ActivityEntry {
			entry_id: row.get::<i64, _>("entry_id"),
			ts: Timestamp(row.get::<i64, _>("ts")),
			kind: row.get::<String, _>("kind").into(),
			subject: row.get::<String, _>("subject").into(),
			detail: row.get::<Option<String>, _>("detail").map(Into::into),
		})
	}))
}

// vim: ts=4
