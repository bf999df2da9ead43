//! Static serving out of the VFS for a resolved site.
//!
//! Handles trailing-slash normalization, directory-index fallback, SPA
//! fallback, ETag revalidation, Cache-Control classes, and analytics beacon
//! injection into HTML.

use axum::{
	body::Body,
	http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
	response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::prelude::*;
use crate::vfs::{CachedFile, SITE_NOT_FOUND};

/// Beacon injected before the last `</body>` of HTML app responses.
const ANALYTICS_SCRIPT: &str =
	"<script>navigator.sendBeacon&&navigator.sendBeacon('/__fazt/beacon',location.pathname)</script>";

/// Per-app manifest, stored as `manifest.json` in the site root.
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
	#[serde(default)]
	pub spa: bool,
	#[serde(default)]
	pub analytics: AnalyticsConfig,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsConfig {
	#[serde(default = "default_true")]
	pub enabled: bool,
}

fn default_true() -> bool {
	true
}

impl Default for AnalyticsConfig {
	fn default() -> Self {
		Self { enabled: true }
	}
}

/// Guess a content type from the path extension. Stored mime wins; this is
/// the fallback for rows written without one.
pub fn mime_from_ext(path: &str) -> &'static str {
	let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
	match ext {
		"html" | "htm" => "text/html",
		"css" => "text/css",
		"js" | "mjs" => "text/javascript",
		"json" => "application/json",
		"txt" => "text/plain",
		"xml" => "application/xml",
		"svg" => "image/svg+xml",
		"png" => "image/png",
		"jpg" | "jpeg" => "image/jpeg",
		"gif" => "image/gif",
		"webp" => "image/webp",
		"ico" => "image/x-icon",
		"woff" => "font/woff",
		"woff2" => "font/woff2",
		"wasm" => "application/wasm",
		"pdf" => "application/pdf",
		"mp4" => "video/mp4",
		"webm" => "video/webm",
		"mp3" => "audio/mpeg",
		_ => "application/octet-stream",
	}
}

/// Cache-Control class for a served path.
pub fn cache_control_for(path: &str) -> &'static str {
	if path.ends_with(".html") {
		return "no-cache, must-revalidate";
	}
	if path.starts_with("assets/") {
		let basename = path.rsplit('/').next().unwrap_or(path);
		// Hyphenated asset basenames are content-addressed by bundlers
		if basename.contains('-') {
			return "public, max-age=31536000, immutable";
		}
	}
	"public, max-age=300"
}

/// Normalize a request path into a VFS lookup key: forward slashes, no
/// leading slash, empty collapses to `index.html`. Paths with `..` segments
/// are refused.
pub fn normalize_path(path: &str) -> Option<String> {
	let mut out: Vec<&str> = Vec::new();
	for segment in path.split('/') {
		match segment {
			"" | "." => {}
			".." => return None,
			s => out.push(s),
		}
	}
	if out.is_empty() {
		return Some("index.html".to_string());
	}
	Some(out.join("/"))
}

/// Whether a path looks like an SPA route rather than a file: the final
/// segment carries no extension.
fn is_route_like(path: &str) -> bool {
	let last = path.rsplit('/').next().unwrap_or(path);
	!last.contains('.')
}

fn etag_matches(if_none_match: &str, hash: &str) -> bool {
	if_none_match.split(',').any(|candidate| {
		let c = candidate.trim().trim_start_matches("W/").trim_matches('"');
		c == hash || c == "*"
	})
}

async fn read_manifest(app: &App, site_id: &str) -> Manifest {
	match app.vfs.read_file(site_id, "manifest.json").await {
		Ok(file) => serde_json::from_slice(&file.content).unwrap_or_default(),
		Err(_) => Manifest::default(),
	}
}

/// Serve a request path from a site, applying the full lookup order:
/// trailing-slash redirect, exact match, directory index, SPA fallback, and
/// finally the system 404 site.
pub async fn serve_site(
	app: &App,
	site_id: &str,
	is_app_site: bool,
	uri: &Uri,
	headers: &HeaderMap,
) -> Response {
	let raw_path = uri.path();

	// 1. Trailing-slash canonicalization, query preserved. This happens for
	// every site before any lookup.
	if raw_path.ends_with('/') && raw_path != "/" {
		let stripped = raw_path.trim_end_matches('/');
		let location = match uri.query() {
			Some(query) => format!("{}?{}", stripped, query),
			None => stripped.to_string(),
		};
		return redirect_301(&location);
	}

	let route_like = is_route_like(raw_path);

	// 3/4. Normalize into a VFS key; `..` segments 404
	let Some(lookup) = normalize_path(raw_path) else {
		return serve_not_found(app, headers).await;
	};

	// 5. Exact match
	if let Ok(file) = app.vfs.read_file(site_id, &lookup).await {
		return build_response(app, site_id, is_app_site, &lookup, &file, headers).await;
	}

	// 6. Directory index for extension-less routes
	if route_like {
		let index = format!("{}/index.html", lookup);
		if let Ok(file) = app.vfs.read_file(site_id, &index).await {
			return build_response(app, site_id, is_app_site, &index, &file, headers).await;
		}
	}

	// 7. SPA fallback when the manifest opts in
	if route_like && is_app_site {
		let manifest = read_manifest(app, site_id).await;
		if manifest.spa {
			if let Ok(file) = app.vfs.read_file(site_id, "index.html").await {
				return build_response(app, site_id, is_app_site, "index.html", &file, headers)
					.await;
			}
		}
	}

	// 8. System 404 site
	serve_not_found(app, headers).await
}

/// Serve the system 404 site with a 404 status. Falls back to a plain text
/// body when the system site itself is missing.
pub async fn serve_not_found(app: &App, headers: &HeaderMap) -> Response {
	match app.vfs.read_file(SITE_NOT_FOUND, "index.html").await {
		Ok(file) => {
			let mut response =
				build_response(app, SITE_NOT_FOUND, false, "index.html", &file, headers).await;
			*response.status_mut() = StatusCode::NOT_FOUND;
			response
		}
		Err(_) => (StatusCode::NOT_FOUND, "404 not found").into_response(),
	}
}

fn redirect_301(location: &str) -> Response {
	let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
	if let Ok(value) = HeaderValue::from_str(location) {
		response.headers_mut().insert(header::LOCATION, value);
	}
	response
}

async fn build_response(
	app: &App,
	site_id: &str,
	is_app_site: bool,
	path: &str,
	file: &Arc<CachedFile>,
	headers: &HeaderMap,
) -> Response {
	// ETag reflects the stored bytes, not the served bytes; the analytics
	// injection below deliberately does not change it.
	if let Some(inm) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
		if etag_matches(inm, &file.hash) {
			let mut response = StatusCode::NOT_MODIFIED.into_response();
			set_etag(response.headers_mut(), &file.hash);
			return response;
		}
	}

	let mime = if file.mime_type.is_empty() {
		mime_from_ext(path)
	} else {
		file.mime_type.as_ref()
	};

	let mut body = file.content.clone();
	if is_app_site && mime.starts_with("text/html") {
		let manifest = read_manifest(app, site_id).await;
		if manifest.analytics.enabled {
			body = inject_analytics(body);
		}
	}

	let mut response = Response::new(Body::from(body));
	let resp_headers = response.headers_mut();
	set_etag(resp_headers, &file.hash);
	if let Ok(value) = HeaderValue::from_str(mime) {
		resp_headers.insert(header::CONTENT_TYPE, value);
	}
	let cache_control =
		if app.opts.disable_cache { "no-store, no-cache" } else { cache_control_for(path) };
	resp_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
	response
}

fn set_etag(headers: &mut HeaderMap, hash: &str) {
	if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", hash)) {
		headers.insert(header::ETAG, value);
	}
}

/// Insert the beacon script immediately before the last `</body>`. Content
/// without a closing body tag is returned unchanged.
pub fn inject_analytics(content: Vec<u8>) -> Vec<u8> {
	const CLOSE: &[u8] = b"</body>";
	let Some(pos) = content
		.windows(CLOSE.len())
		.enumerate()
		.rev()
		.find(|(_, w)| *w == CLOSE)
		.map(|(i, _)| i)
	else {
		return content;
	};

	let mut out = Vec::with_capacity(content.len() + ANALYTICS_SCRIPT.len());
	out.extend_from_slice(&content[..pos]);
	out.extend_from_slice(ANALYTICS_SCRIPT.as_bytes());
	out.extend_from_slice(&content[pos..]);
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_normalize_path() {
		assert_eq!(normalize_path("/").unwrap(), "index.html");
		assert_eq!(normalize_path("").unwrap(), "index.html");
		assert_eq!(normalize_path("/about").unwrap(), "about");
		assert_eq!(normalize_path("/a//b/./c").unwrap(), "a/b/c");
		assert_eq!(normalize_path("/assets/app.js").unwrap(), "assets/app.js");
		assert!(normalize_path("/../etc/passwd").is_none());
		assert!(normalize_path("/a/../../b").is_none());
	}

	#[test]
	fn test_is_route_like() {
		assert!(is_route_like("/deep/route"));
		assert!(is_route_like("/"));
		assert!(!is_route_like("/app.js"));
		assert!(!is_route_like("/deep/file.css"));
	}

	#[test]
	fn test_cache_control_classes() {
		assert_eq!(cache_control_for("index.html"), "no-cache, must-revalidate");
		assert_eq!(cache_control_for("deep/page.html"), "no-cache, must-revalidate");
		assert_eq!(
			cache_control_for("assets/app-3f2a1b.js"),
			"public, max-age=31536000, immutable"
		);
		// assets without a hyphen are not content-addressed
		assert_eq!(cache_control_for("assets/app.js"), "public, max-age=300");
		assert_eq!(cache_control_for("logo.png"), "public, max-age=300");
	}

	#[test]
	fn test_etag_matches() {
		assert!(etag_matches("\"abc\"", "abc"));
		assert!(etag_matches("abc", "abc"));
		assert!(etag_matches("\"x\", \"abc\"", "abc"));
		assert!(etag_matches("W/\"abc\"", "abc"));
		assert!(etag_matches("*", "abc"));
		assert!(!etag_matches("\"def\"", "abc"));
	}

	#[test]
	fn test_inject_analytics_before_last_body() {
		let html = b"<html><body><p>hi</p></body></html>".to_vec();
		let out = inject_analytics(html);
		let s = String::from_utf8(out).unwrap();
		assert!(s.contains("sendBeacon"));
		assert!(s.ends_with("</body></html>"));
		let script_pos = s.find("<script>").unwrap();
		let body_pos = s.rfind("</body>").unwrap();
		assert!(script_pos < body_pos);
	}

	#[test]
	fn test_inject_analytics_picks_last_close_tag() {
		let html = b"<body>a</body><body>b</body>".to_vec();
		let out = String::from_utf8(inject_analytics(html)).unwrap();
		// Injected before the LAST </body>
		assert_eq!(out.find("</body>").unwrap(), "<body>a".len());
		assert!(out.rfind("<script>").unwrap() > out.find("</body>").unwrap());
	}

	#[test]
	fn test_inject_analytics_no_body_unchanged() {
		let content = b"just text, no closing tag".to_vec();
		assert_eq!(inject_analytics(content.clone()), content);
	}

	#[test]
	fn test_mime_from_ext() {
		assert_eq!(mime_from_ext("index.html"), "text/html");
		assert_eq!(mime_from_ext("a/b/style.css"), "text/css");
		assert_eq!(mime_from_ext("mod.mjs"), "text/javascript");
		assert_eq!(mime_from_ext("data.bin"), "application/octet-stream");
		assert_eq!(mime_from_ext("noext"), "application/octet-stream");
	}

	#[test]
	fn test_manifest_parsing() {
		let m: Manifest = serde_json::from_str(r#"{"spa": true}"#).unwrap();
		assert!(m.spa);
		assert!(m.analytics.enabled);

		let m: Manifest = serde_json::from_str(r#"{"analytics": {"enabled": false}}"#).unwrap();
		assert!(!m.spa);
		assert!(!m.analytics.enabled);

		let m: Manifest = serde_json::from_str("{}").unwrap();
		assert!(!m.spa);
		assert!(m.analytics.enabled);
	}
}

// vim: ts=4
