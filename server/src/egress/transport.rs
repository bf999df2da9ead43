//! Egress transport: resolve, vet, dial, and speak HTTP/1.1.
//!
//! The blocked-range check runs on the already-resolved addresses at connect
//! time, so DNS answers pointing into private space can never be dialed.
//! Environment proxies are never consulted; the connection goes straight to
//! the vetted peer.

use hyper::body::{Bytes, Incoming};
use hyper_util::rt::TokioIo;
use std::net::IpAddr;
use std::sync::Arc;

use crate::prelude::*;
use fazt_types::error::{NetCode, NetError};

/// Is this address outside every blocked range?
///
/// Blocked: loopback, RFC1918 private, link-local, CGNAT, the zero network,
/// IPv6 loopback/unspecified, unique-local (fc00::/7), and link-local
/// (fe80::/10). IPv4-mapped IPv6 addresses are unwrapped and checked as v4.
pub fn is_public_ip(ip: IpAddr) -> bool {
	match ip {
		IpAddr::V4(v4) => {
			let octets = v4.octets();
			!(v4.is_loopback()            // 127/8
				|| v4.is_private()        // 10/8, 172.16/12, 192.168/16
				|| v4.is_link_local()     // 169.254/16
				|| v4.is_broadcast()
				|| v4.is_unspecified()
				|| octets[0] == 0         // 0.0.0.0/8
				|| (octets[0] == 100 && (octets[1] & 0xc0) == 64)) // 100.64/10 CGNAT
		}
		IpAddr::V6(v6) => {
			if let Some(mapped) = v6.to_ipv4_mapped() {
				return is_public_ip(IpAddr::V4(mapped));
			}
			let segments = v6.segments();
			!(v6.is_loopback()
				|| v6.is_unspecified()
				|| (segments[0] & 0xfe00) == 0xfc00   // fc00::/7 unique-local
				|| (segments[0] & 0xffc0) == 0xfe80) // fe80::/10 link-local
		}
	}
}

/// Dial the first vetted address and perform one HTTP/1.1 round-trip.
pub(crate) async fn send_request(
	tls: &Arc<rustls::ClientConfig>,
	host: &str,
	port: u16,
	https: bool,
	request: hyper::Request<http_body_util::Full<Bytes>>,
) -> Result<hyper::Response<Incoming>, NetError> {
	let addrs = super::resolve_public(host, port).await?;

	let mut last_err = NetError::new(NetCode::Error, "no address dialed");
	for addr in addrs {
		// Re-check the exact peer being dialed
		if !is_public_ip(addr.ip()) {
			continue;
		}
		match tokio::net::TcpStream::connect(addr).await {
			Ok(stream) => {
				debug!("egress dial {} -> {}", host, addr);
				return if https {
					send_over_tls(tls, host, stream, request).await
				} else {
					send_over_plain(stream, request).await
				};
			}
			Err(err) => {
				last_err = NetError::new(NetCode::Error, format!("connect {}: {}", addr, err));
			}
		}
	}
	Err(last_err)
}

async fn send_over_plain(
	stream: tokio::net::TcpStream,
	request: hyper::Request<http_body_util::Full<Bytes>>,
) -> Result<hyper::Response<Incoming>, NetError> {
	let io = TokioIo::new(stream);
	let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
		.await
		.map_err(|err| NetError::new(NetCode::Error, format!("handshake: {}", err)))?;
	tokio::spawn(async move {
		if let Err(err) = conn.await {
			debug!("egress connection error: {}", err);
		}
	});
	sender
		.send_request(request)
		.await
		.map_err(|err| NetError::new(NetCode::Error, format!("request: {}", err)))
}

async fn send_over_tls(
	tls: &Arc<rustls::ClientConfig>,
	host: &str,
	stream: tokio::net::TcpStream,
	request: hyper::Request<http_body_util::Full<Bytes>>,
) -> Result<hyper::Response<Incoming>, NetError> {
	let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
		.map_err(|_| NetError::new(NetCode::Error, format!("invalid server name: {}", host)))?;
	let connector = tokio_rustls::TlsConnector::from(tls.clone());
	let stream = connector
		.connect(server_name, stream)
		.await
		.map_err(|err| NetError::new(NetCode::Error, format!("tls: {}", err)))?;

	let io = TokioIo::new(stream);
	let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
		.await
		.map_err(|err| NetError::new(NetCode::Error, format!("handshake: {}", err)))?;
	tokio::spawn(async move {
		if let Err(err) = conn.await {
			debug!("egress connection error: {}", err);
		}
	});
	sender
		.send_request(request)
		.await
		.map_err(|err| NetError::new(NetCode::Error, format!("request: {}", err)))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ip(s: &str) -> IpAddr {
		s.parse().unwrap()
	}

	#[test]
	fn test_blocked_v4_ranges() {
		for blocked in [
			"127.0.0.1",
			"127.255.255.254",
			"10.0.0.1",
			"10.255.0.1",
			"172.16.0.1",
			"172.31.255.1",
			"192.168.1.1",
			"169.254.169.254", // cloud metadata
			"100.64.0.1",
			"100.127.255.254",
			"0.0.0.0",
			"0.1.2.3",
			"255.255.255.255",
		] {
			assert!(!is_public_ip(ip(blocked)), "{} must be blocked", blocked);
		}
	}

	#[test]
	fn test_public_v4() {
		for public in ["8.8.8.8", "1.1.1.1", "93.184.216.34", "100.128.0.1", "172.32.0.1"] {
			assert!(is_public_ip(ip(public)), "{} must be public", public);
		}
	}

	#[test]
	fn test_blocked_v6_ranges() {
		for blocked in ["::1", "::", "fc00::1", "fd12:3456::1", "fe80::1", "febf::1"] {
			assert!(!is_public_ip(ip(blocked)), "{} must be blocked", blocked);
		}
		// v4-mapped private addresses unwrap to their v4 meaning
		assert!(!is_public_ip(ip("::ffff:127.0.0.1")));
		assert!(!is_public_ip(ip("::ffff:10.0.0.1")));
		assert!(!is_public_ip(ip("::ffff:169.254.169.254")));
	}

	#[test]
	fn test_public_v6() {
		for public in ["2001:4860:4860::8888", "2606:4700::1111", "::ffff:8.8.8.8"] {
			assert!(is_public_ip(ip(public)), "{} must be public", public);
		}
	}
}

// vim: ts=4
