//! Alias resolution: maps an inbound hostname's leading label to a site.
//!
//! An alias routes to an app, a redirect URL, a reservation, or a weighted
//! split across apps. Resolution sits on the steady-state hot path, so it is
//! a single primary-key lookup plus pure computation.

use std::sync::LazyLock;

use crate::prelude::*;
use crate::vfs::{SITE_NOT_FOUND, SITE_ROOT};
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::types::{AliasTarget, SplitTarget};
use fazt_types::utils::sha256_hex;

/// Host labels that can never be claimed as aliases.
pub const RESERVED_SUBDOMAINS: &[&str] = &[
	"www", "api", "admin", "mail", "ftp", "smtp", "pop", "imap", "ns1", "ns2", "localhost",
];

static SUBDOMAIN_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
	#[allow(clippy::unwrap_used)] // the pattern is a literal
	regex::Regex::new("^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap()
});

/// Validate and canonicalize a subdomain label: lowercase, 1-63 chars,
/// letters/digits/hyphens with no edge hyphen, and not reserved.
pub fn validate_subdomain(subdomain: &str) -> FzResult<String> {
	let s = subdomain.to_ascii_lowercase();
	if s.is_empty() || s.len() > 63 {
		return Err(Error::Validation(format!("invalid subdomain length: {}", s.len())));
	}
	if !SUBDOMAIN_RE.is_match(&s) {
		return Err(Error::Validation(format!("invalid subdomain: {}", subdomain)));
	}
	if RESERVED_SUBDOMAINS.contains(&s.as_str()) {
		return Err(Error::Validation(format!("subdomain is reserved: {}", s)));
	}
	Ok(s)
}

/// Extract the leading label of a Host header value, with any port stripped.
/// Returns None for a bare single-label host (no subdomain present).
pub fn subdomain_of_host(host: &str) -> Option<&str> {
	let host = host.rsplit_once(':').map_or(host, |(h, port)| {
		// Only treat the suffix as a port if it is numeric; IPv6 literals
		// keep their colons.
		if port.chars().all(|c| c.is_ascii_digit()) { h } else { host }
	});
	let (label, rest) = host.split_once('.')?;
	if label.is_empty() || rest.is_empty() {
		return None;
	}
	Some(label)
}

/// Where a request ends up after alias resolution.
#[derive(Debug, Clone)]
pub enum Resolution {
	/// Serve an app's site.
	App { site_id: Box<str> },
	/// 301 to an external URL, preserving the query.
	Redirect { url: Box<str> },
	/// Reserved label: serve the system 404 site with a 404 status.
	Reserved,
	/// No alias row: serve the system root site.
	Root,
}

impl Resolution {
	/// Site id to serve for this resolution, if it serves one.
	pub fn site_id(&self) -> Option<&str> {
		match self {
			Self::App { site_id } => Some(site_id),
			Self::Reserved => Some(SITE_NOT_FOUND),
			Self::Root => Some(SITE_ROOT),
			Self::Redirect { .. } => None,
		}
	}
}

/// Pick a split target using a client-stable key so the same client sees the
/// same variant while the alias is unchanged. The key is
/// `SHA-256(client_ip | path)`; the user agent deliberately does not
/// participate.
pub fn pick_split_target<'a>(
	targets: &'a [SplitTarget],
	client_ip: &str,
	path: &str,
) -> Option<&'a SplitTarget> {
	if targets.is_empty() {
		return None;
	}
	let digest = sha256_hex(format!("{}|{}", client_ip, path).as_bytes());
	// First 8 hex chars give a uniform u32
	let bucket = u32::from_str_radix(digest.get(..8)?, 16).ok()? % 100;

	let mut cumulative = 0u32;
	for target in targets {
		cumulative += target.weight;
		if bucket < cumulative {
			return Some(target);
		}
	}
	// Weights summed below 100: the remainder falls to the last target
	targets.last()
}

/// Resolve a hostname to a serving decision.
pub async fn resolve(app: &App, host: &str, client_ip: &str, path: &str) -> Resolution {
	let Some(label) = subdomain_of_host(host) else {
		return Resolution::Root;
	};

	let alias = match app.store.read_alias(&label.to_ascii_lowercase()).await {
		Ok(alias) => alias,
		Err(Error::NotFound) => return Resolution::Root,
		Err(err) => {
			warn!("alias lookup failed for '{}': {}", label, err);
			return Resolution::Root;
		}
	};

	match alias.target {
		AliasTarget::App { app_id } => Resolution::App { site_id: app_id },
		AliasTarget::Redirect { url } => Resolution::Redirect { url },
		AliasTarget::Reserved => Resolution::Reserved,
		AliasTarget::Split { targets } => match pick_split_target(&targets, client_ip, path) {
			Some(target) => Resolution::App { site_id: target.app_id.clone() },
			None => {
				warn!("split alias '{}' has no targets", alias.subdomain);
				Resolution::Root
			}
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_validate_subdomain_accepts() {
		assert_eq!(validate_subdomain("myapp").unwrap(), "myapp");
		assert_eq!(validate_subdomain("MyApp").unwrap(), "myapp");
		assert_eq!(validate_subdomain("a").unwrap(), "a");
		assert_eq!(validate_subdomain("a-b-c").unwrap(), "a-b-c");
		assert_eq!(validate_subdomain("app2").unwrap(), "app2");
		assert_eq!(validate_subdomain(&"a".repeat(63)).unwrap(), "a".repeat(63));
	}

	#[test]
	fn test_validate_subdomain_rejects() {
		assert!(validate_subdomain("").is_err());
		assert!(validate_subdomain(&"a".repeat(64)).is_err());
		assert!(validate_subdomain("-app").is_err());
		assert!(validate_subdomain("app-").is_err());
		assert!(validate_subdomain("my.app").is_err());
		assert!(validate_subdomain("my_app").is_err());
		assert!(validate_subdomain("my app").is_err());
	}

	#[test]
	fn test_validate_subdomain_reserved() {
		for label in RESERVED_SUBDOMAINS {
			assert!(validate_subdomain(label).is_err(), "{} should be reserved", label);
		}
		// Reserved check happens after lowercasing
		assert!(validate_subdomain("WWW").is_err());
	}

	#[test]
	fn test_subdomain_of_host() {
		assert_eq!(subdomain_of_host("myapp.example.com"), Some("myapp"));
		assert_eq!(subdomain_of_host("myapp.example.com:8080"), Some("myapp"));
		assert_eq!(subdomain_of_host("a.b.example.com"), Some("a"));
		assert_eq!(subdomain_of_host("localhost"), None);
		assert_eq!(subdomain_of_host("localhost:3000"), None);
	}

	#[test]
	fn test_split_is_client_stable() {
		let targets = vec![
			SplitTarget { app_id: "a1".into(), weight: 50 },
			SplitTarget { app_id: "a2".into(), weight: 50 },
		];
		let first = pick_split_target(&targets, "10.1.2.3", "/").unwrap().app_id.clone();
		for _ in 0..50 {
			let again = pick_split_target(&targets, "10.1.2.3", "/").unwrap();
			assert_eq!(again.app_id, first);
		}
	}

	#[test]
	fn test_split_respects_weights() {
		// weight 100 / 0 must always pick the first target
		let targets = vec![
			SplitTarget { app_id: "always".into(), weight: 100 },
			SplitTarget { app_id: "never".into(), weight: 0 },
		];
		for i in 0..100 {
			let ip = format!("10.0.0.{}", i);
			let picked = pick_split_target(&targets, &ip, "/page").unwrap();
			assert_eq!(picked.app_id.as_ref(), "always");
		}
	}

	#[test]
	fn test_split_varies_by_client() {
		let targets = vec![
			SplitTarget { app_id: "a1".into(), weight: 50 },
			SplitTarget { app_id: "a2".into(), weight: 50 },
		];
		let mut seen = std::collections::HashSet::new();
		for i in 0..64 {
			let ip = format!("203.0.113.{}", i);
			seen.insert(pick_split_target(&targets, &ip, "/").unwrap().app_id.clone());
		}
		// With 64 distinct clients both variants show up
		assert_eq!(seen.len(), 2);
	}
}

// vim: ts=4
