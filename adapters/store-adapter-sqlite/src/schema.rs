//! Database schema initialization
//!
//! This module creates the tables and indexes backing the Fazt store. All
//! statements are idempotent so startup can re-run them safely.

use sqlx::SqlitePool;

/// Initialize the database schema with all required tables and indexes
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Apps
	//******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS apps (
			app_id text NOT NULL,
			title text,
			visibility text NOT NULL DEFAULT 'public',
			provenance json,
			forked_from_id text,
			env json,
			created_at datetime DEFAULT (unixepoch()),
			updated_at datetime DEFAULT (unixepoch()),
			PRIMARY KEY(app_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Aliases
	//*********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS aliases (
			subdomain text NOT NULL,
			type text NOT NULL,
			targets json,
			created_at datetime DEFAULT (unixepoch()),
			updated_at datetime DEFAULT (unixepoch()),
			PRIMARY KEY(subdomain)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Files (the VFS)
	//*****************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS files (
			site_id text NOT NULL,
			path text NOT NULL,
			content blob NOT NULL,
			size_bytes integer NOT NULL,
			mime_type text NOT NULL,
			hash text NOT NULL,
			app_id text,
			created_at datetime DEFAULT (unixepoch()),
			updated_at datetime DEFAULT (unixepoch()),
			PRIMARY KEY(site_id, path)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_appid ON files(app_id)")
		.execute(&mut *tx)
		.await?;

	// Capability storage: kv, docs, blobs
	//*************************************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS kv (
			site_id text NOT NULL,
			key text NOT NULL,
			value json,
			updated_at datetime DEFAULT (unixepoch()),
			PRIMARY KEY(site_id, key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS docs (
			site_id text NOT NULL,
			collection text NOT NULL,
			doc_id text NOT NULL,
			data json NOT NULL,
			created_at datetime DEFAULT (unixepoch()),
			updated_at datetime DEFAULT (unixepoch()),
			PRIMARY KEY(site_id, collection, doc_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS blobs (
			site_id text NOT NULL,
			key text NOT NULL,
			content blob NOT NULL,
			mime_type text,
			created_at datetime DEFAULT (unixepoch()),
			PRIMARY KEY(site_id, key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Secrets
	//*********
	// app_id '' means the secret is visible to every app
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS secrets (
			name text NOT NULL,
			app_id text NOT NULL DEFAULT '',
			value text NOT NULL,
			inject_as text NOT NULL,
			inject_key text,
			domain text,
			created_at datetime DEFAULT (unixepoch()),
			PRIMARY KEY(name, app_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Egress allowlist
	//******************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS net_allowlist (
			entry_id integer PRIMARY KEY AUTOINCREMENT,
			app_id text,
			domain text NOT NULL,
			max_response integer,
			timeout_ms integer,
			rate_limit integer,
			rate_burst integer,
			cache_ttl integer
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_allowlist_domain ON net_allowlist(domain)")
		.execute(&mut *tx)
		.await?;

	// Admin surface
	//***************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS api_keys (
			key_id text NOT NULL,
			secret_hash text NOT NULL,
			description text NOT NULL DEFAULT '',
			created_at datetime DEFAULT (unixepoch()),
			last_used_at datetime,
			PRIMARY KEY(key_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS deployments (
			deploy_id text NOT NULL,
			app_id text NOT NULL,
			file_count integer NOT NULL,
			total_bytes integer NOT NULL,
			created_at datetime DEFAULT (unixepoch()),
			PRIMARY KEY(deploy_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS activity_log (
			entry_id integer PRIMARY KEY AUTOINCREMENT,
			ts datetime DEFAULT (unixepoch()),
			kind text NOT NULL,
			subject text NOT NULL,
			detail text
	)",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;
	Ok(())
}

// vim: ts=4
