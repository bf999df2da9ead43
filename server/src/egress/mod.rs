//! Safe external HTTP for JS handlers.
//!
//! Every fetch runs an ordered validation pipeline: URL and scheme checks,
//! host canonicalization with IP-literal rejection, allowlist lookup,
//! concurrency and budget admission, and header sanitization. The transport
//! resolves the host itself and refuses to dial any non-public address, and
//! the whole pipeline re-runs on every redirect hop, so the actual TCP peer
//! is public on every hop.

use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::core::budget::RequestBudget;
use crate::prelude::*;
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::types::{AllowlistEntry, SecretInjection};

mod transport;

pub use transport::is_public_ip;

/// Per-app concurrent fetches.
pub const PER_APP_MAX_INFLIGHT: u32 = 5;
/// Process-wide concurrent fetches.
pub const GLOBAL_MAX_INFLIGHT: u32 = 20;
/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 5;
/// Default response size cap.
pub const DEFAULT_MAX_RESPONSE: u64 = 1024 * 1024;
/// Hard response size cap an allowlist entry cannot exceed.
pub const HARD_MAX_RESPONSE: u64 = 10 * 1024 * 1024;
/// Request body cap.
pub const MAX_REQUEST_BODY: usize = 1024 * 1024;
/// Allowlist cache entry lifetime.
pub const ALLOWLIST_CACHE_TTL: Duration = Duration::from_secs(30);

/// Options accepted from `fazt.net.fetch(url, opts)`.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct FetchOptions {
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub headers: Option<HashMap<String, String>>,
	#[serde(default)]
	pub body: Option<String>,
	/// Name of a stored secret to inject.
	#[serde(default)]
	pub auth: Option<String>,
	#[serde(default)]
	pub timeout: Option<u64>,
}

#[derive(Debug)]
pub struct FetchResponse {
	pub status: u16,
	pub ok: bool,
	/// Lowercased names, first value only.
	pub headers: HashMap<String, String>,
	pub body: Vec<u8>,
}

type DirectLimiter = governor::DefaultDirectRateLimiter;

/// A cached allowlist decision: the rule plus its per-domain rate limiter.
struct AllowRule {
	entry: AllowlistEntry,
	limiter: Option<Arc<DirectLimiter>>,
}

struct CacheSlot {
	expires: Instant,
	/// None caches a negative lookup.
	rule: Option<Arc<AllowRule>>,
}

#[derive(Default, Debug)]
struct Inflight {
	global: AtomicU32,
	per_app: Mutex<HashMap<Box<str>, u32>>,
}

/// RAII slot across the global and per-app in-flight counters.
#[derive(Debug)]
struct InflightGuard {
	inflight: Arc<Inflight>,
	app_id: Box<str>,
}

impl Inflight {
	fn acquire(self: &Arc<Self>, app_id: &str) -> Result<InflightGuard, NetError> {
		// Both counters move under the one lock, so the caps hold exactly
		let mut per_app = self.per_app.lock();
		let count = per_app.entry(app_id.into()).or_insert(0);
		if *count >= PER_APP_MAX_INFLIGHT {
			return Err(NetError::new(NetCode::Limit, "too many concurrent fetches for app"));
		}
		if self.global.load(Ordering::Relaxed) >= GLOBAL_MAX_INFLIGHT {
			return Err(NetError::new(NetCode::Limit, "too many concurrent fetches"));
		}
		*count += 1;
		self.global.fetch_add(1, Ordering::Relaxed);
		Ok(InflightGuard { inflight: self.clone(), app_id: app_id.into() })
	}
}

impl Drop for InflightGuard {
	fn drop(&mut self) {
		self.inflight.global.fetch_sub(1, Ordering::Relaxed);
		let mut per_app = self.inflight.per_app.lock();
		if let Some(count) = per_app.get_mut(&self.app_id) {
			*count = count.saturating_sub(1);
			if *count == 0 {
				per_app.remove(&self.app_id);
			}
		}
	}
}

pub struct EgressProxy {
	store: Arc<dyn StoreAdapter>,
	cache: Mutex<HashMap<(Box<str>, Box<str>), CacheSlot>>,
	inflight: Arc<Inflight>,
	tls: Arc<rustls::ClientConfig>,
	/// Permit plain http:// targets (development only).
	allow_http: bool,
}

impl std::fmt::Debug for EgressProxy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EgressProxy")
			.field("inflight", &self.inflight.global.load(Ordering::Relaxed))
			.finish()
	}
}

/// Canonicalize a URL host: lowercase, trailing dot stripped. The port never
/// participates in allowlist matching.
pub fn canonicalize_host(host: &str) -> String {
	host.trim_end_matches('.').to_ascii_lowercase()
}

/// Is this host an IP literal (v4 or bracketed/plain v6)?
pub fn is_ip_literal(host: &str) -> bool {
	let bare = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
	bare.parse::<IpAddr>().is_ok()
}

impl EgressProxy {
	pub fn new(store: Arc<dyn StoreAdapter>, allow_http: bool) -> FzResult<Arc<Self>> {
		use hyper_rustls::ConfigBuilderExt;
		let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
			rustls::crypto::aws_lc_rs::default_provider(),
		))
		.with_safe_default_protocol_versions()
		.map_err(|err| Error::Internal(format!("TLS protocol setup: {}", err)))?
		.with_native_roots()
		.map_err(|err| Error::Internal(format!("no native root CA certificates: {}", err)))?
		.with_no_client_auth();

		Ok(Arc::new(Self {
			store,
			cache: Mutex::new(HashMap::new()),
			inflight: Arc::new(Inflight::default()),
			tls: Arc::new(tls),
			allow_http,
		}))
	}

	/// Drop every cached allowlist decision. Called on allowlist mutation.
	pub fn invalidate_allowlist_cache(&self) {
		self.cache.lock().clear();
	}

	async fn allow_rule(&self, app_id: &str, domain: &str) -> FzResult<Option<Arc<AllowRule>>> {
		let key = (Box::from(app_id), Box::from(domain));
		{
			let cache = self.cache.lock();
			if let Some(slot) = cache.get(&key) {
				if slot.expires > Instant::now() {
					return Ok(slot.rule.clone());
				}
			}
		}

		let rule = self.store.lookup_allowlist(app_id, domain).await?.map(|entry| {
			let limiter = entry.rate_limit.and_then(NonZeroU32::new).map(|per_second| {
				let burst = entry.rate_burst.and_then(NonZeroU32::new).unwrap_or(per_second);
				Arc::new(governor::RateLimiter::direct(
					governor::Quota::per_second(per_second).allow_burst(burst),
				))
			});
			Arc::new(AllowRule { entry, limiter })
		});

		let mut cache = self.cache.lock();
		cache.insert(key, CacheSlot { expires: Instant::now() + ALLOWLIST_CACHE_TTL, rule: rule.clone() });
		Ok(rule)
	}

	/// Fetch a URL on behalf of an app's handler. Synchronous from the JS
	/// side; this is the blocking host half.
	pub async fn fetch(
		&self,
		app_id: &str,
		url: &str,
		opts: FetchOptions,
		budget: &RequestBudget,
	) -> Result<FetchResponse, NetError> {
		// 4a. Per-request call count is tracked on the budget
		if !budget.register_fetch() {
			return Err(NetError::new(NetCode::Limit, "per-request fetch limit reached"));
		}

		let method = opts.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
		let body = match &opts.body {
			Some(body) if body.len() > MAX_REQUEST_BODY => {
				return Err(NetError::new(NetCode::Size, "request body over limit"));
			}
			Some(body) => Bytes::from(body.clone().into_bytes()),
			None => Bytes::new(),
		};

		// 4b. In-flight slots are held across every redirect hop
		let _guard = self.inflight.acquire(app_id)?;

		let mut current_url = url.to_string();
		let mut current_method = method;
		let mut current_body = body;

		for _hop in 0..=MAX_REDIRECTS {
			let attempt = self
				.fetch_once(app_id, &current_url, &current_method, &current_body, &opts, budget)
				.await?;

			match attempt {
				Attempt::Response(response) => return Ok(response),
				Attempt::Redirect { location, drop_body } => {
					debug!("egress redirect: {} -> {}", current_url, location);
					current_url = location;
					if drop_body {
						current_method = "GET".to_string();
						current_body = Bytes::new();
					}
				}
			}
		}

		Err(NetError::new(NetCode::Error, "too many redirects"))
	}

	/// One hop: the full validation pipeline plus a single HTTP round-trip.
	async fn fetch_once(
		&self,
		app_id: &str,
		url: &str,
		method: &str,
		body: &Bytes,
		opts: &FetchOptions,
		budget: &RequestBudget,
	) -> Result<Attempt, NetError> {
		// 1. Parse; HTTPS required unless explicitly configured otherwise
		let parsed = url::Url::parse(url)
			.map_err(|_| NetError::new(NetCode::Error, format!("invalid URL: {}", url)))?;
		match parsed.scheme() {
			"https" => {}
			"http" if self.allow_http => {}
			scheme => {
				return Err(NetError::new(
					NetCode::Blocked,
					format!("scheme not allowed: {}", scheme),
				));
			}
		}

		// 2. Canonicalize the host; IP literals never pass
		let host = parsed
			.host_str()
			.ok_or_else(|| NetError::new(NetCode::Error, "URL has no host"))?;
		let host = canonicalize_host(host);
		if is_ip_literal(&host) {
			return Err(NetError::new(NetCode::Blocked, "IP-literal hosts are not allowed"));
		}

		// 3. Allowlist
		let rule = self
			.allow_rule(app_id, &host)
			.await
			.map_err(|err| NetError::new(NetCode::Error, format!("allowlist lookup: {}", err)))?
			.ok_or_else(|| {
				NetError::new(NetCode::Blocked, format!("domain not allowlisted: {}", host))
			})?;

		// 4c. Per-domain rate limit, when the entry configures one
		if let Some(limiter) = &rule.limiter {
			if limiter.check().is_err() {
				return Err(NetError::new(NetCode::Limit, format!("rate limited: {}", host)));
			}
		}

		// 5. Net budget
		let net_remaining = budget.net_remaining();
		if net_remaining < Duration::from_millis(50) {
			return Err(NetError::new(NetCode::Budget, "net budget exhausted"));
		}
		let mut timeout = net_remaining;
		if let Some(ms) = opts.timeout {
			timeout = timeout.min(Duration::from_millis(ms));
		}
		if let Some(ms) = rule.entry.timeout_ms {
			timeout = timeout.min(Duration::from_millis(ms));
		}

		let max_response = rule
			.entry
			.max_response
			.unwrap_or(DEFAULT_MAX_RESPONSE)
			.min(HARD_MAX_RESPONSE);

		// 6. Build sanitized headers
		let mut request = hyper::Request::builder()
			.method(
				hyper::Method::from_bytes(method.as_bytes())
					.map_err(|_| NetError::new(NetCode::Error, "invalid method"))?,
			)
			.uri(origin_form(&parsed));
		if let Some(headers) = request.headers_mut() {
			if let Some(user_headers) = &opts.headers {
				for (name, value) in user_headers {
					if is_blocked_header(name) {
						continue;
					}
					if let (Ok(name), Ok(value)) = (
						header::HeaderName::from_bytes(name.as_bytes()),
						header::HeaderValue::from_str(value),
					) {
						headers.insert(name, value);
					}
				}
			}
			let host_header = match parsed.port() {
				Some(port) => format!("{}:{}", host, port),
				None => host.clone(),
			};
			if let Ok(value) = header::HeaderValue::from_str(&host_header) {
				headers.insert(header::HOST, value);
			}
			// Identity keeps the size cap honest
			headers.insert(header::ACCEPT_ENCODING, header::HeaderValue::from_static("identity"));

			self.inject_secret(app_id, &host, opts, headers).await;
		}

		let request = request
			.body(http_body_util::Full::new(body.clone()))
			.map_err(|err| NetError::new(NetCode::Error, format!("request build: {}", err)))?;

		// Transport: resolve, vet every candidate address, dial, and send
		let https = parsed.scheme() == "https";
		let port = parsed.port().unwrap_or(if https { 443 } else { 80 });
		let response = tokio::time::timeout(
			timeout,
			transport::send_request(&self.tls, &host, port, https, request),
		)
		.await
		.map_err(|_| NetError::new(NetCode::Timeout, "fetch timed out"))??;

		let status = response.status();

		// Redirects re-run the whole pipeline on the next hop
		if status.is_redirection() {
			if let Some(location) = response.headers().get(header::LOCATION) {
				let location = location
					.to_str()
					.map_err(|_| NetError::new(NetCode::Error, "bad redirect location"))?;
				let next = parsed
					.join(location)
					.map_err(|_| NetError::new(NetCode::Error, "bad redirect location"))?;
				let drop_body = status == hyper::StatusCode::SEE_OTHER;
				return Ok(Attempt::Redirect { location: next.to_string(), drop_body });
			}
		}

		// Size-limited body read
		let mut headers = HashMap::new();
		for (name, value) in response.headers() {
			if let Ok(value) = value.to_str() {
				headers.entry(name.as_str().to_ascii_lowercase()).or_insert_with(|| {
					value.to_string()
				});
			}
		}

		let limited = http_body_util::Limited::new(response.into_body(), max_response as usize);
		let collected = tokio::time::timeout(timeout, limited.collect())
			.await
			.map_err(|_| NetError::new(NetCode::Timeout, "response read timed out"))?;
		let body = match collected {
			Ok(collected) => collected.to_bytes().to_vec(),
			Err(err) if err.is::<http_body_util::LengthLimitError>() => {
				return Err(NetError::new(NetCode::Size, "response over size limit"));
			}
			Err(err) => {
				return Err(NetError::new(NetCode::Error, format!("body read: {}", err)));
			}
		};

		Ok(Attempt::Response(FetchResponse {
			status: status.as_u16(),
			ok: status.is_success(),
			headers,
			body,
		}))
	}

	/// Inject a named secret when its optional domain restriction matches.
	async fn inject_secret(
		&self,
		app_id: &str,
		host: &str,
		opts: &FetchOptions,
		headers: &mut header::HeaderMap,
	) {
		let Some(name) = &opts.auth else { return };
		let secret = match self.store.read_secret(name, Some(app_id)).await {
			Ok(secret) => secret,
			Err(err) => {
				warn!("secret '{}' not available: {}", name, err);
				return;
			}
		};
		if let Some(domain) = &secret.domain {
			if domain.as_ref() != host {
				warn!("secret '{}' is restricted to {}, not injecting for {}", name, domain, host);
				return;
			}
		}
		match secret.inject_as {
			SecretInjection::Bearer => {
				if let Ok(value) =
					header::HeaderValue::from_str(&format!("Bearer {}", secret.value))
				{
					headers.insert(header::AUTHORIZATION, value);
				}
			}
			SecretInjection::Header => {
				let Some(key) = &secret.inject_key else { return };
				if let (Ok(name), Ok(value)) = (
					header::HeaderName::from_bytes(key.as_bytes()),
					header::HeaderValue::from_str(&secret.value),
				) {
					headers.insert(name, value);
				}
			}
			SecretInjection::Query => {
				// Query injection is applied by the URL builder; secrets in
				// query strings leak into logs too easily, so the header
				// carries it instead under the configured key.
				let Some(key) = &secret.inject_key else { return };
				if let (Ok(name), Ok(value)) = (
					header::HeaderName::from_bytes(key.as_bytes()),
					header::HeaderValue::from_str(&secret.value),
				) {
					headers.insert(name, value);
				}
			}
		}
	}
}

enum Attempt {
	Response(FetchResponse),
	Redirect { location: String, drop_body: bool },
}

/// Outbound headers a handler may never set.
fn is_blocked_header(name: &str) -> bool {
	let name = name.to_ascii_lowercase();
	matches!(name.as_str(), "host" | "connection" | "transfer-encoding" | "accept-encoding")
		|| name.starts_with("proxy-")
}

fn origin_form(url: &url::Url) -> String {
	match url.query() {
		Some(query) => format!("{}?{}", url.path(), query),
		None => url.path().to_string(),
	}
}

// Resolver used by the transport when vetting addresses
pub(crate) async fn resolve_public(
	host: &str,
	port: u16,
) -> Result<Vec<SocketAddr>, NetError> {
	let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
		.await
		.map_err(|err| NetError::new(NetCode::Error, format!("resolve {}: {}", host, err)))?
		.collect();
	if addrs.is_empty() {
		return Err(NetError::new(NetCode::Error, format!("no addresses for {}", host)));
	}
	let public: Vec<SocketAddr> =
		addrs.into_iter().filter(|addr| is_public_ip(addr.ip())).collect();
	if public.is_empty() {
		return Err(NetError::new(
			NetCode::Blocked,
			format!("{} resolves only to blocked addresses", host),
		));
	}
	Ok(public)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_canonicalize_host() {
		assert_eq!(canonicalize_host("API.Example.COM"), "api.example.com");
		assert_eq!(canonicalize_host("example.com."), "example.com");
		assert_eq!(canonicalize_host("example.com"), "example.com");
	}

	#[test]
	fn test_ip_literal_detection() {
		assert!(is_ip_literal("127.0.0.1"));
		assert!(is_ip_literal("10.0.0.8"));
		assert!(is_ip_literal("8.8.8.8"));
		assert!(is_ip_literal("[::1]"));
		assert!(is_ip_literal("::1"));
		assert!(!is_ip_literal("example.com"));
		assert!(!is_ip_literal("localhost"));
	}

	#[test]
	fn test_blocked_headers() {
		assert!(is_blocked_header("Host"));
		assert!(is_blocked_header("connection"));
		assert!(is_blocked_header("Proxy-Authorization"));
		assert!(is_blocked_header("transfer-encoding"));
		assert!(is_blocked_header("Accept-Encoding"));
		assert!(!is_blocked_header("content-type"));
		assert!(!is_blocked_header("authorization"));
	}

	#[test]
	fn test_origin_form() {
		let url = url::Url::parse("https://example.com/a/b?x=1").unwrap();
		assert_eq!(origin_form(&url), "/a/b?x=1");
		let url = url::Url::parse("https://example.com").unwrap();
		assert_eq!(origin_form(&url), "/");
	}

	#[test]
	fn test_inflight_limits() {
		let inflight = Arc::new(Inflight::default());
		let mut guards = Vec::new();
		for _ in 0..PER_APP_MAX_INFLIGHT {
			guards.push(inflight.acquire("app1").expect("under the limit"));
		}
		// Sixth concurrent fetch for the same app is refused
		let err = inflight.acquire("app1").expect_err("over per-app limit");
		assert_eq!(err.code, NetCode::Limit);
		assert!(err.retryable);

		// A different app still has room
		let _other = inflight.acquire("app2").expect("other app under limit");

		// Releasing a slot reopens admission
		guards.pop();
		assert!(inflight.acquire("app1").is_ok());
	}

	#[test]
	fn test_global_inflight_limit() {
		let inflight = Arc::new(Inflight::default());
		let mut guards = Vec::new();
		for i in 0..GLOBAL_MAX_INFLIGHT {
			let app = format!("app{}", i);
			guards.push(inflight.acquire(&app).expect("under global limit"));
		}
		let err = inflight.acquire("one-more").expect_err("over global limit");
		assert_eq!(err.code, NetCode::Limit);
	}
}

// vim: ts=4
