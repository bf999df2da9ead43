//! Alias rows: the subdomain routing table.
//!
//! The `type` discriminator is persisted next to a `targets` JSON column so
//! the resolver can reconstruct the typed target without schema churn.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use fazt::prelude::*;
use fazt::types::{AliasRecord, AliasTarget, SplitTarget, Timestamp};

use crate::{collect_res, map_db_err, map_res};

fn row_to_record(row: SqliteRow) -> Result<AliasRecord, sqlx::Error> {
	let typ: String = row.get("type");
	let targets: Option<String> = row.get("targets");
	let target = match typ.as_str() {
		"app" => AliasTarget::App {
			app_id: targets.unwrap_or_default().into(),
		},
		"redirect" => AliasTarget::Redirect {
			url: targets.unwrap_or_default().into(),
		},
		"split" => AliasTarget::Split {
			targets: targets
				.and_then(|t| serde_json::from_str::<Vec<SplitTarget>>(&t).ok())
				.unwrap_or_default(),
		},
		_ => AliasTarget::Reserved,
	};
	Ok(AliasRecord {
		subdomain: row.get::<String, _>("subdomain").into(),
		target,
		created_at: Timestamp(row.get::<i64, _>("created_at")),
		updated_at: Timestamp(row.get::<i64, _>("updated_at")),
	})
}

fn targets_column(target: &AliasTarget) -> FzResult<Option<String>> {
	Ok(match target {
		AliasTarget::App { app_id } => Some(app_id.to_string()),
		AliasTarget::Redirect { url } => Some(url.to_string()),
		AliasTarget::Split { targets } => Some(serde_json::to_string(targets)?),
		AliasTarget::Reserved => None,
	})
}

pub(crate) async fn upsert(db: &SqlitePool, alias: &AliasRecord) -> FzResult<()> {
	let targets = targets_column(&alias.target)?;
	sqlx::query(
		"INSERT INTO aliases (subdomain, type, targets)
		VALUES (?, ?, ?)
		ON CONFLICT(subdomain) DO UPDATE SET
			type = excluded.type,
			targets = excluded.targets,
			updated_at = unixepoch()",
	)
	.bind(alias.subdomain.as_ref())
	.bind(alias.target.type_str())
	.bind(targets)
	.execute(db)
	.await
	.map_err(map_db_err)?;
	Ok(())
}

pub(crate) async fn read(db: &SqlitePool, subdomain: &str) -> FzResult<AliasRecord> {
	let row = sqlx::query("SELECT * FROM aliases WHERE subdomain = ?")
		.bind(subdomain)
		.fetch_one(db)
		.await;
	map_res(row, row_to_record)
}

pub(crate) async fn delete(db: &SqlitePool, subdomain: &str) -> FzResult<()> {
	let res = sqlx::query("DELETE FROM aliases WHERE subdomain = ?")
		.bind(subdomain)
		.execute(db)
		.await
		.map_err(map_db_err)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn list(db: &SqlitePool) -> FzResult<Vec<AliasRecord>> {
	let rows = sqlx::query("SELECT * FROM aliases ORDER BY subdomain")
		.fetch_all(db)
		.await
		.map_err(map_db_err)?;
	collect_res(rows.into_iter().map(row_to_record))
}

// vim: ts=4
