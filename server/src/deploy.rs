//! Archive ingestion: unpack a gzip tarball into the VFS under an app id.
//!
//! Paths are normalized to forward slashes with no leading slash; entries
//! that escape the archive root are rejected outright. The whole file set
//! lands in one write-queue transaction, so re-deploying the same archive is
//! idempotent and a failed deploy leaves nothing half-written.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;

use crate::alias::validate_subdomain;
use crate::core::budget::RequestBudget;
use crate::core::write_queue::WriteOp;
use crate::prelude::*;
use crate::static_serve::mime_from_ext;
use crate::vfs::Vfs;
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::types::{
	ActivityEntry, AliasRecord, AliasTarget, AppRecord, DeploymentRecord, FileWrite, Provenance,
	Visibility,
};
use fazt_types::utils::random_id;

/// Largest single file accepted out of an archive.
pub const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;
/// Deploys get their own budget; they are admin work, not request work.
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct DeployOptions {
	pub subdomain: Option<String>,
	pub app: Option<String>,
	pub title: Option<String>,
	pub source_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
	pub app_id: Box<str>,
	pub deploy_id: Box<str>,
	pub subdomain: Option<Box<str>>,
	pub file_count: u32,
	pub total_bytes: u64,
}

/// Normalize an archive entry path into a VFS key. Rejects traversal and
/// absolute paths.
pub fn normalize_entry_path(raw: &str) -> FzResult<String> {
	let raw = raw.replace('\\', "/");
	let mut out: Vec<&str> = Vec::new();
	for segment in raw.split('/') {
		match segment {
			"" | "." => {}
			".." => {
				return Err(Error::Validation(format!("path escapes archive root: {}", raw)));
			}
			s => out.push(s),
		}
	}
	if out.is_empty() {
		return Err(Error::Validation("empty path in archive".into()));
	}
	Ok(out.join("/"))
}

/// Unpack a gzip tarball into `FileWrite`s for a site.
fn unpack_archive(archive: &[u8], site_id: &str, app_id: &str) -> FzResult<Vec<FileWrite>> {
	let decoder = GzDecoder::new(archive);
	let mut tar = tar::Archive::new(decoder);
	let mut files = Vec::new();

	let entries = tar
		.entries()
		.map_err(|err| Error::Validation(format!("not a valid archive: {}", err)))?;
	for entry in entries {
		let mut entry =
			entry.map_err(|err| Error::Validation(format!("corrupt archive entry: {}", err)))?;
		if !entry.header().entry_type().is_file() {
			continue;
		}
		let raw_path = entry
			.path()
			.map_err(|err| Error::Validation(format!("bad entry path: {}", err)))?
			.to_string_lossy()
			.into_owned();
		let path = normalize_entry_path(&raw_path)?;

		if entry.size() > MAX_FILE_SIZE {
			return Err(Error::Validation(format!(
				"file too large: {} ({} bytes)",
				path,
				entry.size()
			)));
		}
		let mut content = Vec::with_capacity(entry.size() as usize);
		entry.read_to_end(&mut content)?;

		let mime = mime_from_ext(&path);
		files.push(Vfs::prepare_write(site_id, &path, content, mime, Some(app_id)));
	}

	if files.is_empty() {
		return Err(Error::Validation("archive contains no files".into()));
	}
	Ok(files)
}

/// Ingest an archive: validate, unpack, write the files, ensure the app
/// record, point the alias, and leave a deployment + activity trail.
pub async fn deploy_archive(
	app: &App,
	archive: &[u8],
	opts: DeployOptions,
) -> FzResult<DeployOutcome> {
	let budget = RequestBudget::with_timeout(DEPLOY_TIMEOUT);

	let subdomain = match &opts.subdomain {
		Some(subdomain) => Some(validate_subdomain(subdomain)?),
		None => None,
	};

	let app_id: Box<str> = match &opts.app {
		Some(app_id) => app_id.as_str().into(),
		None => random_id()?.to_ascii_lowercase().into(),
	};

	// Site id equals app id for deployed apps
	let files = unpack_archive(archive, &app_id, &app_id)?;
	let file_count = files.len() as u32;
	let total_bytes: u64 = files.iter().map(|f| f.content.len() as u64).sum();

	info!("deploy: app={} files={} bytes={}", app_id, file_count, total_bytes);
	app.vfs.write_files(files, &budget).await?;

	// Ensure the app record exists; a redeploy keeps the existing one
	if app.store.read_app(&app_id).await.is_err() {
		let now = Timestamp::now();
		let record = AppRecord {
			app_id: app_id.clone(),
			title: opts.title.as_deref().map(Into::into),
			visibility: Visibility::Public,
			provenance: Provenance {
				source: Some("deploy".into()),
				source_url: opts.source_url.as_deref().map(Into::into),
				source_ref: None,
				source_commit: None,
			},
			forked_from_id: None,
			env: Default::default(),
			created_at: now,
			updated_at: now,
		};
		app.queue.submit(WriteOp::CreateApp(record), &budget).await?;
	}

	if let Some(subdomain) = &subdomain {
		let now = Timestamp::now();
		let alias = AliasRecord {
			subdomain: subdomain.as_str().into(),
			target: AliasTarget::App { app_id: app_id.clone() },
			created_at: now,
			updated_at: now,
		};
		app.queue.submit(WriteOp::UpsertAlias(alias), &budget).await?;
	}

	let deploy_id: Box<str> = random_id()?.into();
	app.queue
		.submit(
			WriteOp::RecordDeployment(DeploymentRecord {
				deploy_id: deploy_id.clone(),
				app_id: app_id.clone(),
				file_count,
				total_bytes,
				created_at: Timestamp::now(),
			}),
			&budget,
		)
		.await?;
	app.queue
		.submit(
			WriteOp::AppendActivity(ActivityEntry {
				entry_id: 0,
				ts: Timestamp::now(),
				kind: "deploy".into(),
				subject: app_id.to_string().into(),
				detail: subdomain.as_deref().map(Into::into),
			}),
			&budget,
		)
		.await?;

	Ok(DeployOutcome {
		app_id,
		deploy_id,
		subdomain: subdomain.map(Into::into),
		file_count,
		total_bytes,
	})
}


// vim: ts=4
