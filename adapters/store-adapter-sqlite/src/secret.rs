//! Secret rows. Values are written and injected into egress requests, never
//! listed back out.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use fazt::prelude::*;
use fazt::types::{SecretInjection, SecretMeta, SecretRecord, Timestamp};

use crate::{collect_res, map_db_err, map_res};

fn row_to_record(row: SqliteRow) -> Result<SecretRecord, sqlx::Error> {
	let app_id: String = row.get("app_id");
	Ok(SecretRecord {
		name: row.get::<String, _>("name").into(),
		value: row.get::<String, _>("value").into(),
		inject_as: SecretInjection::parse(row.get::<String, _>("inject_as").as_str())
			.unwrap_or(SecretInjection::Bearer),
		inject_key: row.get::<Option<String>, _>("inject_key").map(Into::into),
		domain: row.get::<Option<String>, _>("domain").map(Into::into),
		app_id: if app_id.is_empty() { None } else { Some(app_id.into()) },
		created_at: Timestamp(row.get::<i64, _>("created_at")),
	})
}

pub(crate) async fn put(db: &SqlitePool, secret: &SecretRecord) -> FzResult<()> {
	sqlx::query(
		"INSERT OR REPLACE INTO secrets (name, app_id, value, inject_as, inject_key, domain)
		VALUES (?, ?, ?, ?, ?, ?)",
	)
	.bind(secret.name.as_ref())
	.bind(secret.app_id.as_deref().unwrap_or(""))
	.bind(secret.value.as_ref())
	.bind(secret.inject_as.as_str())
	.bind(secret.inject_key.as_deref())
	.bind(secret.domain.as_deref())
	.execute(db)
	.await
	.map_err(map_db_err)?;
	Ok(())
}

/// Resolve a secret by name. An app-scoped row wins over a global one.
pub(crate) async fn read(
	db: &SqlitePool,
	name: &str,
	app_id: Option<&str>,
) -> FzResult<SecretRecord> {
	let row = sqlx::query(
		"SELECT * FROM secrets WHERE name = ? AND app_id IN ('', ?)
		ORDER BY app_id DESC LIMIT 1",
	)
	.bind(name)
	.bind(app_id.unwrap_or(""))
	.fetch_one(db)
	.await;
	map_res(row, row_to_record)
}

pub(crate) async fn list(db: &SqlitePool) -> FzResult<Vec<SecretMeta>> {
	let rows = sqlx::query(
		"SELECT name, app_id, inject_as, inject_key, domain, created_at
		FROM secrets ORDER BY name",
	)
	.fetch_all(db)
	.await
	.map_err(map_db_err)?;

	collect_res(rows.into_iter().map(|row| {
		let app_id: String = row.get("app_id");
		Ok(SecretMeta {
			name: row.get::<String, _>("name").into(),
			inject_as: row.get::<String, _>("inject_as").into(),
			inject_key: row.get::<Option<String>, _>("inject_key").map(Into::into),
			domain: row.get::<Option<String>, _>("domain").map(Into::into),
			app_id: if app_id.is_empty() { None } else { Some(app_id.into()) },
			created_at: Timestamp(row.get::<i64, _>("created_at")),
		})
	}))
}

pub(crate) async fn delete(db: &SqlitePool, name: &str) -> FzResult<()> {
	let res = sqlx::query("DELETE FROM secrets WHERE name = ?")
		.bind(name)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

// vim: ts=4
