//! Admin/command surface: the JSON API consumed by the CLI and admin UI.
//!
//! Authentication is a bearer API key of the form `fzk_<key_id>.<secret>`;
//! only the SHA-256 of the secret is stored. Every mutation goes through
//! the kernel's write queue.

pub mod cmd;
pub mod handler;

use axum::{
	extract::{Request, State},
	http::header,
	middleware::Next,
	response::{IntoResponse, Response},
};

use crate::core::budget::RequestBudget;
use crate::core::write_queue::WriteOp;
use crate::prelude::*;
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::types::ApiKeyRecord;
use fazt_types::utils::{random_id, sha256_hex};

/// Parse `Bearer fzk_<key_id>.<secret>` into its parts.
fn parse_bearer_key(value: &str) -> Option<(&str, &str)> {
	let token = value.strip_prefix("Bearer ")?.trim();
	let token = token.strip_prefix("fzk_")?;
	token.split_once('.')
}

/// Middleware guarding every admin route.
pub async fn require_api_key(
	State(app): State<App>,
	request: Request,
	next: Next,
) -> Response {
	let header_value = request
		.headers()
		.get(header::AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.unwrap_or_default();

	let Some((key_id, secret)) = parse_bearer_key(header_value) else {
		return Error::Unauthorized.into_response();
	};

	let record = match app.store.read_api_key(key_id).await {
		Ok(record) => record,
		Err(_) => {
			warn!("admin auth failed: unknown key '{}'", key_id);
			return Error::Unauthorized.into_response();
		}
	};
	if sha256_hex(secret.as_bytes()) != record.secret_hash.as_ref() {
		warn!("admin auth failed: bad secret for key '{}'", key_id);
		return Error::Unauthorized.into_response();
	}

	// Usage stamp; losing it to a busy store is not worth failing the request
	let budget = RequestBudget::new();
	let _ = app.queue.submit(WriteOp::TouchApiKey(key_id.into()), &budget).await;

	next.run(request).await
}

/// First-run bootstrap: when no API key exists, mint one and log it once.
/// The secret is unrecoverable afterwards.
pub async fn bootstrap_api_key(app: &App) -> FzResult<()> {
	if app.store.count_api_keys().await? > 0 {
		return Ok(());
	}

	let key_id = random_id()?.to_ascii_lowercase();
	let secret = random_id()?;
	let record = ApiKeyRecord {
		key_id: key_id.as_str().into(),
		secret_hash: sha256_hex(secret.as_bytes()).into(),
		description: "bootstrap".into(),
		created_at: Timestamp::now(),
		last_used_at: None,
	};

	let budget = RequestBudget::with_timeout(std::time::Duration::from_secs(30));
	app.queue.submit(WriteOp::CreateApiKey(record), &budget).await?;

	info!("==========================================================");
	info!("Admin API key created (shown once, store it now):");
	info!("    fzk_{}.{}", key_id, secret);
	info!("==========================================================");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_bearer_key() {
		assert_eq!(parse_bearer_key("Bearer fzk_abc.s3cret"), Some(("abc", "s3cret")));
		assert_eq!(parse_bearer_key("Bearer fzk_abc.with.dots"), Some(("abc", "with.dots")));
		assert_eq!(parse_bearer_key("Bearer abc.s3cret"), None);
		assert_eq!(parse_bearer_key("fzk_abc.s3cret"), None);
		assert_eq!(parse_bearer_key("Bearer fzk_nodot"), None);
		assert_eq!(parse_bearer_key(""), None);
	}
}

// vim: ts=4
