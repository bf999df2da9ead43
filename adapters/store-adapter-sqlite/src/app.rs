//! App rows: deployable units with provenance and handler environment.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::collections::HashMap;

use fazt::prelude::*;
use fazt::types::{AppPatch, AppRecord, Provenance, Timestamp, Visibility};

use crate::{collect_res, map_db_err, map_res};

fn row_to_record(row: SqliteRow) -> Result<AppRecord, sqlx::Error> {
	let provenance: Option<String> = row.get("provenance");
	let env: Option<String> = row.get("env");
	Ok(AppRecord {
		app_id: row.get::<String, _>("app_id").into(),
		title: row.get::<Option<String>, _>("title").map(Into::into),
		visibility: Visibility::parse(row.get::<String, _>("visibility").as_str())
			.unwrap_or(Visibility::Public),
		provenance: provenance
			.and_then(|p| serde_json::from_str::<Provenance>(&p).ok())
			.unwrap_or_default(),
		forked_from_id: row.get::<Option<String>, _>("forked_from_id").map(Into::into),
		env: env
			.and_then(|e| serde_json::from_str::<HashMap<Box<str>, Box<str>>>(&e).ok())
			.unwrap_or_default(),
		created_at: Timestamp(row.get::<i64, _>("created_at")),
		updated_at: Timestamp(row.get::<i64, _>("updated_at")),
	})
}

pub(crate) async fn create(db: &SqlitePool, app: &AppRecord) -> FzResult<()> {
	let provenance = serde_json::to_string(&app.provenance)?;
	let env = serde_json::to_string(&app.env)?;
	sqlx::query(
		"INSERT INTO apps (app_id, title, visibility, provenance, forked_from_id, env)
		VALUES (?, ?, ?, ?, ?, ?)",
	)
	.bind(app.app_id.as_ref())
	.bind(app.title.as_deref())
	.bind(app.visibility.as_str())
	.bind(provenance)
	.bind(app.forked_from_id.as_deref())
	.bind(env)
	.execute(db)
	.await
	.map_err(map_db_err)?;
	Ok(())
}

pub(crate) async fn read(db: &SqlitePool, app_id: &str) -> FzResult<AppRecord> {
	let row =
		sqlx::query("SELECT * FROM apps WHERE app_id = ?").bind(app_id).fetch_one(db).await;
	map_res(row, row_to_record)
}

pub(crate) async fn update(db: &SqlitePool, app_id: &str, patch: &AppPatch) -> FzResult<()> {
	let mut query = sqlx::QueryBuilder::new("UPDATE apps SET updated_at = unixepoch()");

	match &patch.title {
		Patch::Undefined => {}
		Patch::Null => {
			query.push(", title = NULL");
		}
		Patch::Value(v) => {
			query.push(", title = ").push_bind(v.as_ref());
		}
	}
	if let Patch::Value(v) = &patch.visibility {
		query.push(", visibility = ").push_bind(v.as_str());
	}
	match &patch.env {
		Patch::Undefined => {}
		Patch::Null => {
			query.push(", env = NULL");
		}
		Patch::Value(v) => {
			let env = serde_json::to_string(v)?;
			query.push(", env = ").push_bind(env);
		}
	}

	query.push(" WHERE app_id = ").push_bind(app_id);
	let res = query.build().execute(db).await.map_err(map_db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn delete(db: &SqlitePool, app_id: &str) -> FzResult<()> {
	let res = sqlx::query("DELETE FROM apps WHERE app_id = ?")
		.bind(app_id)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn list(db: &SqlitePool) -> FzResult<Vec<AppRecord>> {
	let rows = sqlx::query("SELECT * FROM apps ORDER BY created_at DESC")
		.fetch_all(db)
		.await
		.map_err(map_db_err)?;
	collect_res(rows.into_iter().map(row_to_record))
}

// vim: ts=4
