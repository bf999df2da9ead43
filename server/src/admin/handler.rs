//! Admin REST handlers plus the service functions they share with the
//! command gateway.

use axum::{
	Json,
	body::Bytes,
	extract::{Path, Query, State},
	response::IntoResponse,
};
use serde::Deserialize;

use crate::core::budget::RequestBudget;
use crate::core::write_queue::{WriteOp, WriteOutcome};
use crate::deploy::{self, DeployOptions, DeployOutcome};
use crate::prelude::*;
use crate::{alias, vfs};
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::types::{
	ActivityEntry, AliasRecord, AliasTarget, AllowlistEntry, ApiResponse, AppPatch, AppRecord,
	Provenance, SecretInjection, SecretRecord, Visibility,
};
use fazt_types::utils::random_id;

async fn log_activity(app: &App, kind: &str, subject: &str, detail: Option<&str>) {
	let budget = RequestBudget::new();
	let entry = ActivityEntry {
		entry_id: 0,
		ts: Timestamp::now(),
		kind: kind.into(),
		subject: subject.into(),
		detail: detail.map(Into::into),
	};
	if let Err(err) = app.queue.submit(WriteOp::AppendActivity(entry), &budget).await {
		warn!("activity log write failed: {}", err);
	}
}

// Apps
//******

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppRequest {
	pub title: Option<String>,
	#[serde(default)]
	pub visibility: Option<Visibility>,
	pub forked_from_id: Option<String>,
}

pub async fn create_app(app: &App, request: CreateAppRequest) -> FzResult<AppRecord> {
	let budget = RequestBudget::new();
	let now = Timestamp::now();
	let record = AppRecord {
		app_id: random_id()?.to_ascii_lowercase().into(),
		title: request.title.as_deref().map(Into::into),
		visibility: request.visibility.unwrap_or(Visibility::Public),
		provenance: Provenance { source: Some("api".into()), ..Provenance::default() },
		forked_from_id: request.forked_from_id.as_deref().map(Into::into),
		env: Default::default(),
		created_at: now,
		updated_at: now,
	};
	app.queue.submit(WriteOp::CreateApp(record.clone()), &budget).await?;
	log_activity(app, "app.create", &record.app_id, None).await;
	Ok(record)
}

/// Remove an app entirely: record, files, aliases pointing at it, and its
/// hub.
pub async fn remove_app(app: &App, app_id: &str) -> FzResult<()> {
	let budget = RequestBudget::with_timeout(std::time::Duration::from_secs(30));

	// Fail early when the app does not exist
	app.store.read_app(app_id).await?;

	for alias_record in app.store.list_aliases().await? {
		let points_here = match &alias_record.target {
			AliasTarget::App { app_id: target } => target.as_ref() == app_id,
			AliasTarget::Split { targets } => {
				targets.iter().any(|t| t.app_id.as_ref() == app_id)
			}
			_ => false,
		};
		if points_here {
			app.queue
				.submit(WriteOp::DeleteAlias(alias_record.subdomain.clone()), &budget)
				.await?;
		}
	}

	app.vfs.delete_site(app_id, &budget).await?;
	app.queue.submit(WriteOp::DeleteApp(app_id.into()), &budget).await?;
	app.hubs.remove_hub(app_id);
	log_activity(app, "app.delete", app_id, None).await;
	Ok(())
}

pub async fn get_apps(State(app): State<App>) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(app.store.list_apps().await?)))
}

pub async fn post_app(
	State(app): State<App>,
	Json(request): Json<CreateAppRequest>,
) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(create_app(&app, request).await?)))
}

pub async fn get_app(
	State(app): State<App>,
	Path(app_id): Path<String>,
) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(app.store.read_app(&app_id).await?)))
}

pub async fn patch_app(
	State(app): State<App>,
	Path(app_id): Path<String>,
	Json(patch): Json<AppPatch>,
) -> FzResult<impl IntoResponse> {
	let budget = RequestBudget::new();
	app.queue.submit(WriteOp::UpdateApp { app_id: app_id.as_str().into(), patch }, &budget).await?;
	log_activity(&app, "app.update", &app_id, None).await;
	Ok(Json(ApiResponse::new(app.store.read_app(&app_id).await?)))
}

pub async fn delete_app(
	State(app): State<App>,
	Path(app_id): Path<String>,
) -> FzResult<impl IntoResponse> {
	remove_app(&app, &app_id).await?;
	Ok(Json(ApiResponse::new(serde_json::json!({ "deleted": app_id }))))
}

// Aliases
//*********

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAliasRequest {
	pub subdomain: String,
	#[serde(flatten)]
	pub target: AliasTarget,
}

pub async fn set_alias(app: &App, request: SetAliasRequest) -> FzResult<AliasRecord> {
	let subdomain = alias::validate_subdomain(&request.subdomain)?;

	match &request.target {
		AliasTarget::App { app_id } => {
			app.store.read_app(app_id).await.map_err(|_| {
				Error::Validation(format!("unknown app: {}", app_id))
			})?;
		}
		AliasTarget::Split { targets } => {
			if targets.is_empty() {
				return Err(Error::Validation("split alias needs targets".into()));
			}
			let total: u32 = targets.iter().map(|t| t.weight).sum();
			if total != 100 {
				return Err(Error::Validation(format!(
					"split weights must sum to 100, got {}",
					total
				)));
			}
			for target in targets {
				app.store.read_app(&target.app_id).await.map_err(|_| {
					Error::Validation(format!("unknown app: {}", target.app_id))
				})?;
			}
		}
		AliasTarget::Redirect { url } => {
			url::Url::parse(url)
				.map_err(|_| Error::Validation(format!("invalid redirect URL: {}", url)))?;
		}
		AliasTarget::Reserved => {}
	}

	let budget = RequestBudget::new();
	let now = Timestamp::now();
	let record = AliasRecord {
		subdomain: subdomain.as_str().into(),
		target: request.target,
		created_at: now,
		updated_at: now,
	};
	app.queue.submit(WriteOp::UpsertAlias(record.clone()), &budget).await?;
	log_activity(app, "alias.set", &subdomain, Some(record.target.type_str())).await;
	Ok(record)
}

pub async fn remove_alias(app: &App, subdomain: &str) -> FzResult<()> {
	let budget = RequestBudget::new();
	app.queue.submit(WriteOp::DeleteAlias(subdomain.into()), &budget).await?;
	log_activity(app, "alias.delete", subdomain, None).await;
	Ok(())
}

pub async fn get_aliases(State(app): State<App>) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(app.store.list_aliases().await?)))
}

pub async fn get_alias(
	State(app): State<App>,
	Path(subdomain): Path<String>,
) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(app.store.read_alias(&subdomain).await?)))
}

pub async fn put_alias(
	State(app): State<App>,
	Json(request): Json<SetAliasRequest>,
) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(set_alias(&app, request).await?)))
}

pub async fn delete_alias(
	State(app): State<App>,
	Path(subdomain): Path<String>,
) -> FzResult<impl IntoResponse> {
	remove_alias(&app, &subdomain).await?;
	Ok(Json(ApiResponse::new(serde_json::json!({ "deleted": subdomain }))))
}

// Deploy
//********

pub async fn post_deploy(
	State(app): State<App>,
	Query(opts): Query<DeployOptions>,
	body: Bytes,
) -> FzResult<impl IntoResponse> {
	if body.is_empty() {
		return Err(Error::Validation("empty deploy archive".into()));
	}
	let outcome: DeployOutcome = deploy::deploy_archive(&app, &body, opts).await?;
	Ok(Json(ApiResponse::new(outcome)))
}

// Secrets
//*********

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSecretRequest {
	pub name: String,
	pub value: String,
	pub inject_as: SecretInjection,
	pub inject_key: Option<String>,
	pub domain: Option<String>,
	pub app_id: Option<String>,
}

pub async fn set_secret(app: &App, request: SetSecretRequest) -> FzResult<()> {
	if request.inject_as != SecretInjection::Bearer && request.inject_key.is_none() {
		return Err(Error::Validation("injectKey is required unless injectAs is bearer".into()));
	}
	let budget = RequestBudget::new();
	let record = SecretRecord {
		name: request.name.as_str().into(),
		value: request.value.as_str().into(),
		inject_as: request.inject_as,
		inject_key: request.inject_key.as_deref().map(Into::into),
		domain: request.domain.as_deref().map(Into::into),
		app_id: request.app_id.as_deref().map(Into::into),
		created_at: Timestamp::now(),
	};
	app.queue.submit(WriteOp::PutSecret(record), &budget).await?;
	log_activity(app, "secret.set", &request.name, None).await;
	Ok(())
}

pub async fn get_secrets(State(app): State<App>) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(app.store.list_secrets().await?)))
}

pub async fn post_secret(
	State(app): State<App>,
	Json(request): Json<SetSecretRequest>,
) -> FzResult<impl IntoResponse> {
	let name = request.name.clone();
	set_secret(&app, request).await?;
	Ok(Json(ApiResponse::new(serde_json::json!({ "name": name }))))
}

pub async fn delete_secret(
	State(app): State<App>,
	Path(name): Path<String>,
) -> FzResult<impl IntoResponse> {
	let budget = RequestBudget::new();
	app.queue.submit(WriteOp::DeleteSecret(name.as_str().into()), &budget).await?;
	log_activity(&app, "secret.delete", &name, None).await;
	Ok(Json(ApiResponse::new(serde_json::json!({ "deleted": name }))))
}

// Allowlist
//***********

pub async fn add_allowlist(app: &App, entry: AllowlistEntry) -> FzResult<i64> {
	let budget = RequestBudget::new();
	let domain = entry.domain.to_string();
	let outcome = app.queue.submit(WriteOp::AllowlistAdd(entry), &budget).await?;
	app.egress.invalidate_allowlist_cache();
	log_activity(app, "allowlist.add", &domain, None).await;
	match outcome {
		WriteOutcome::Id(id) => Ok(id),
		_ => Err(Error::Internal("allowlist insert returned no id".into())),
	}
}

pub async fn remove_allowlist(app: &App, entry_id: i64) -> FzResult<()> {
	let budget = RequestBudget::new();
	app.queue.submit(WriteOp::AllowlistDelete(entry_id), &budget).await?;
	app.egress.invalidate_allowlist_cache();
	log_activity(app, "allowlist.delete", &entry_id.to_string(), None).await;
	Ok(())
}

pub async fn get_allowlist(State(app): State<App>) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(app.store.list_allowlist().await?)))
}

pub async fn post_allowlist(
	State(app): State<App>,
	Json(entry): Json<AllowlistEntry>,
) -> FzResult<impl IntoResponse> {
	let entry_id = add_allowlist(&app, entry).await?;
	Ok(Json(ApiResponse::new(serde_json::json!({ "entryId": entry_id }))))
}

pub async fn delete_allowlist(
	State(app): State<App>,
	Path(entry_id): Path<i64>,
) -> FzResult<impl IntoResponse> {
	remove_allowlist(&app, entry_id).await?;
	Ok(Json(ApiResponse::new(serde_json::json!({ "deleted": entry_id }))))
}

// Activity log
//**************

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
	#[serde(default = "default_limit")]
	pub limit: u32,
	#[serde(default)]
	pub offset: u32,
}

fn default_limit() -> u32 {
	50
}

pub async fn get_logs(
	State(app): State<App>,
	Query(query): Query<LogsQuery>,
) -> FzResult<impl IntoResponse> {
	let limit = query.limit.min(500);
	Ok(Json(ApiResponse::new(app.store.list_activity(limit, query.offset).await?)))
}

// Site files (debugging aid for the CLI)
//****************************************

pub async fn get_site_files(
	State(app): State<App>,
	Path(site_id): Path<String>,
) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(app.store.list_files(&site_id).await?)))
}

// System info
//*************

pub async fn get_status(State(app): State<App>) -> FzResult<impl IntoResponse> {
	Ok(Json(ApiResponse::new(serde_json::json!({
		"version": crate::core::app::VERSION,
		"hubs": app.hubs.hub_count(),
		"systemSites": [vfs::SITE_ROOT, vfs::SITE_NOT_FOUND],
	}))))
}

// vim: ts=4
