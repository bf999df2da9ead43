//! Router construction and the per-site request dispatcher.
//!
//! Two routers come out of `init`: the admin API router (selected by the
//! `api` host label) and the application router that serves every other
//! subdomain. The application router's fallback is where alias resolution
//! meets the VFS and the JS runtime.

use axum::{
	Router,
	body::Body,
	extract::{Request, State},
	http::{HeaderValue, StatusCode, header},
	middleware,
	response::{IntoResponse, Response},
	routing::{any, delete, get, post},
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::admin;
use crate::alias::{self, Resolution};
use crate::core::budget::RequestBudget;
use crate::prelude::*;
use crate::realtime::websocket;
use crate::runtime::{BridgeCtx, JsRequest};
use crate::static_serve;
use crate::vfs::SITE_ROOT;
use fazt_types::store_adapter::StoreAdapter;

/// Build the admin API router and the application traffic router.
pub fn init(app: App) -> (Router, Router) {
	let api_router = Router::new()
		.route("/api/apps", get(admin::handler::get_apps).post(admin::handler::post_app))
		.route(
			"/api/apps/{app_id}",
			get(admin::handler::get_app)
				.patch(admin::handler::patch_app)
				.delete(admin::handler::delete_app),
		)
		.route("/api/aliases", get(admin::handler::get_aliases).post(admin::handler::put_alias))
		.route(
			"/api/aliases/{subdomain}",
			get(admin::handler::get_alias).delete(admin::handler::delete_alias),
		)
		.route("/api/deploy", post(admin::handler::post_deploy))
		.route("/api/secrets", get(admin::handler::get_secrets).post(admin::handler::post_secret))
		.route("/api/secrets/{name}", delete(admin::handler::delete_secret))
		.route(
			"/api/allowlist",
			get(admin::handler::get_allowlist).post(admin::handler::post_allowlist),
		)
		.route("/api/allowlist/{entry_id}", delete(admin::handler::delete_allowlist))
		.route("/api/logs", get(admin::handler::get_logs))
		.route("/api/sites/{site_id}/files", get(admin::handler::get_site_files))
		.route("/api/status", get(admin::handler::get_status))
		.route("/api/cmd", post(admin::cmd::post_cmd))
		.layer(middleware::from_fn_with_state(app.clone(), admin::require_api_key))
		.layer(CorsLayer::permissive())
		// Deploy archives are well beyond the default body limit
		.layer(axum::extract::DefaultBodyLimit::max(64 * 1024 * 1024))
		.with_state(app.clone());

	let app_router = Router::new()
		.route("/__fazt/ws", any(websocket::get_ws))
		.route("/ws", any(websocket::get_ws))
		.route("/__fazt/beacon", post(post_beacon))
		.fallback(handle_site_request)
		.with_state(app);

	(api_router, app_router)
}

/// Analytics beacon sink. The injected script posts page paths here.
async fn post_beacon(body: String) -> StatusCode {
	debug!("beacon: {}", body);
	StatusCode::NO_CONTENT
}

fn client_ip(request: &Request) -> String {
	if let Some(connect_info) =
		request.extensions().get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
	{
		return connect_info.0.ip().to_string();
	}
	request
		.headers()
		.get("x-forwarded-for")
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.split(',').next())
		.unwrap_or("-")
		.trim()
		.to_string()
}

/// The fallback for all application traffic: resolve the Host through the
/// alias table, then serve a file, redirect, 404, or run the site's handler.
async fn handle_site_request(State(app): State<App>, request: Request) -> Response {
	let host = request
		.headers()
		.get(header::HOST)
		.and_then(|value| value.to_str().ok())
		.unwrap_or_default()
		.to_string();
	let ip = client_ip(&request);
	let path = request.uri().path().to_string();

	let resolution = alias::resolve(&app, &host, &ip, &path).await;
	match resolution {
		Resolution::Redirect { url } => {
			// Alias redirects preserve the query string
			let location = match request.uri().query() {
				Some(query) if !url.contains('?') => format!("{}?{}", url, query),
				_ => url.to_string(),
			};
			let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
			if let Ok(value) = HeaderValue::from_str(&location) {
				response.headers_mut().insert(header::LOCATION, value);
			}
			response
		}
		Resolution::Reserved => static_serve::serve_not_found(&app, request.headers()).await,
		Resolution::Root => {
			static_serve::serve_site(&app, SITE_ROOT, false, request.uri(), request.headers())
				.await
		}
		Resolution::App { site_id } => {
			// Serverless dispatch: /api/* runs the site's api.js when present
			if path.starts_with("/api/")
				&& app.vfs.exists(&site_id, "api.js").await.unwrap_or(false)
			{
				return run_handler(&app, &site_id, request).await;
			}
			static_serve::serve_site(&app, &site_id, true, request.uri(), request.headers())
				.await
		}
	}
}

/// Execute a site's `api.js` handler against this request under a fresh
/// budget. Kernel errors map onto the HTTP taxonomy (retryable ones carry
/// `Retry-After`).
async fn run_handler(app: &App, site_id: &str, request: Request) -> Response {
	let script: Arc<str> = match app.vfs.read_file(site_id, "api.js").await {
		Ok(file) => String::from_utf8_lossy(&file.content).into_owned().into(),
		Err(_) => return static_serve::serve_not_found(app, request.headers()).await,
	};

	let env = match app.store.read_app(site_id).await {
		Ok(record) => record.env,
		Err(_) => HashMap::new(),
	};

	let method = request.method().as_str().to_string();
	let path = request.uri().path().to_string();
	let query: HashMap<String, String> = request
		.uri()
		.query()
		.map(|query| {
			url::form_urlencoded::parse(query.as_bytes())
				.map(|(key, value)| (key.into_owned(), value.into_owned()))
				.collect()
		})
		.unwrap_or_default();
	let headers: HashMap<String, String> = request
		.headers()
		.iter()
		.filter_map(|(name, value)| {
			value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
		})
		.collect();

	let body = match axum::body::to_bytes(request.into_body(), 1024 * 1024).await {
		Ok(bytes) if bytes.is_empty() => None,
		Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
		Err(_) => {
			return Error::Validation("request body too large".into()).into_response();
		}
	};

	let bctx = BridgeCtx {
		site_id: site_id.into(),
		app_id: site_id.into(),
		env,
		store: app.store.clone(),
		queue: app.queue.clone(),
		hubs: app.hubs.clone(),
		egress: app.egress.clone(),
		budget: Arc::new(RequestBudget::new()),
		handle: tokio::runtime::Handle::current(),
	};

	let js_request = JsRequest { method, path, query, headers, body };
	match app.runtime.execute(bctx, script, js_request).await {
		Ok(js_response) => {
			let mut response = Response::new(Body::from(js_response.body));
			*response.status_mut() = StatusCode::from_u16(js_response.status)
				.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
			for (name, value) in js_response.headers {
				if let (Ok(name), Ok(value)) = (
					header::HeaderName::from_bytes(name.as_bytes()),
					HeaderValue::from_str(&value),
				) {
					response.headers_mut().insert(name, value);
				}
			}
			response
		}
		Err(err) => err.into_response(),
	}
}


// vim: ts=4
