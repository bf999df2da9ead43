//! The remote command gateway: `POST /api/cmd {command, args}`.
//!
//! Accepts a single typed command envelope so a peer (or the CLI's `@peer`
//! target) can forward admin work without knowing the REST layout. Commands
//! dispatch onto the same service functions the REST handlers use.

use axum::{Json, extract::State, response::IntoResponse};
use serde::Deserialize;

use crate::admin::handler;
use crate::prelude::*;
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::types::{AllowlistEntry, ApiResponse};

#[derive(Debug, Deserialize)]
pub struct CommandEnvelope {
	pub command: String,
	#[serde(default)]
	pub args: serde_json::Value,
}

fn parse_args<T: serde::de::DeserializeOwned>(args: serde_json::Value) -> FzResult<T> {
	serde_json::from_value(args)
		.map_err(|err| Error::Validation(format!("invalid command args: {}", err)))
}

pub async fn dispatch(app: &App, envelope: CommandEnvelope) -> FzResult<serde_json::Value> {
	debug!("cmd: {}", envelope.command);
	match envelope.command.as_str() {
		"apps.list" => Ok(serde_json::to_value(app.store.list_apps().await?)?),
		"apps.get" => {
			#[derive(Deserialize)]
			struct Args {
				id: String,
			}
			let args: Args = parse_args(envelope.args)?;
			Ok(serde_json::to_value(app.store.read_app(&args.id).await?)?)
		}
		"apps.create" => {
			let args: handler::CreateAppRequest = parse_args(envelope.args)?;
			Ok(serde_json::to_value(handler::create_app(app, args).await?)?)
		}
		"apps.delete" => {
			#[derive(Deserialize)]
			struct Args {
				id: String,
			}
			let args: Args = parse_args(envelope.args)?;
			handler::remove_app(app, &args.id).await?;
			Ok(serde_json::json!({ "deleted": args.id }))
		}
		"aliases.list" => Ok(serde_json::to_value(app.store.list_aliases().await?)?),
		"aliases.set" => {
			let args: handler::SetAliasRequest = parse_args(envelope.args)?;
			Ok(serde_json::to_value(handler::set_alias(app, args).await?)?)
		}
		"aliases.delete" => {
			#[derive(Deserialize)]
			struct Args {
				subdomain: String,
			}
			let args: Args = parse_args(envelope.args)?;
			handler::remove_alias(app, &args.subdomain).await?;
			Ok(serde_json::json!({ "deleted": args.subdomain }))
		}
		"secrets.set" => {
			let args: handler::SetSecretRequest = parse_args(envelope.args)?;
			let name = args.name.clone();
			handler::set_secret(app, args).await?;
			Ok(serde_json::json!({ "name": name }))
		}
		"allowlist.add" => {
			let args: AllowlistEntry = parse_args(envelope.args)?;
			let entry_id = handler::add_allowlist(app, args).await?;
			Ok(serde_json::json!({ "entryId": entry_id }))
		}
		"allowlist.remove" => {
			#[derive(Deserialize)]
			struct Args {
				#[serde(rename = "entryId")]
				entry_id: i64,
			}
			let args: Args = parse_args(envelope.args)?;
			handler::remove_allowlist(app, args.entry_id).await?;
			Ok(serde_json::json!({ "deleted": args.entry_id }))
		}
		"logs.tail" => {
			#[derive(Deserialize)]
			struct Args {
				#[serde(default = "default_limit")]
				limit: u32,
			}
			fn default_limit() -> u32 {
				50
			}
			let args: Args = parse_args(envelope.args)?;
			Ok(serde_json::to_value(app.store.list_activity(args.limit.min(500), 0).await?)?)
		}
		other => Err(Error::Validation(format!("unknown command: {}", other))),
	}
}

pub async fn post_cmd(
	State(app): State<App>,
	Json(envelope): Json<CommandEnvelope>,
) -> FzResult<impl IntoResponse> {
	let result = dispatch(&app, envelope).await?;
	Ok(Json(ApiResponse::new(result)))
}

// vim: ts=4
