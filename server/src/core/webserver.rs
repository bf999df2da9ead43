// Webserver implementation

use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::response::Response;
use std::net::SocketAddr;
use tower::Service;

use crate::alias::subdomain_of_host;
use crate::prelude::*;

/// Both routers, carried as the dispatcher's state.
#[derive(Clone)]
struct HostRouters {
	api: Router,
	app: Router,
}

/// Host-dispatching entry point: the `api` host label selects the admin
/// router, everything else is application traffic. The connect-info make
/// service has already stamped the peer address into the request extensions,
/// where the split-alias client key picks it up.
async fn dispatch(State(routers): State<HostRouters>, req: Request) -> Response {
	let start = std::time::Instant::now();
	let host = req
		.uri()
		.host()
		.or_else(|| req.headers().get(header::HOST).and_then(|h| h.to_str().ok()))
		.unwrap_or_default()
		.to_string();
	let peer = req
		.extensions()
		.get::<ConnectInfo<SocketAddr>>()
		.map(|info| info.0.to_string())
		.unwrap_or_else(|| "-".to_string());
	let method = req.method().clone();
	let path = req.uri().path().to_string();

	let is_admin = subdomain_of_host(&host) == Some("api");
	let result = if is_admin {
		info!("REQ [{}] API: {} {} {}", peer, method, host, path);
		routers.api.clone().call(req).await
	} else {
		info!("REQ [{}] App: {} {} {}", peer, method, host, path);
		routers.app.clone().call(req).await
	};

	let response = match result {
		Ok(response) => response,
		Err(never) => match never {},
	};

	let status = response.status();
	if status.is_client_error() || status.is_server_error() {
		warn!("RES: {} tm:{:?}", status, start.elapsed().as_millis());
	} else {
		info!("RES: {} tm:{:?}", status, start.elapsed().as_millis());
	}
	response
}

/// Bind the listener and serve both routers behind the host dispatcher.
pub async fn create_server(
	_state: App,
	listen: &str,
	api_router: Router,
	app_router: Router,
) -> std::io::Result<tokio::task::JoinHandle<std::io::Result<()>>> {
	let listener = tokio::net::TcpListener::bind(listen).await?;
	info!("Listening on http://{}", listener.local_addr()?);

	// A single fallback route so every request flows through the host
	// dispatcher; the connect-info make service supplies the peer address.
	let dispatcher = Router::new()
		.fallback(dispatch)
		.with_state(HostRouters { api: api_router, app: app_router });

	let handle = tokio::spawn(async move {
		axum::serve(listener, dispatcher.into_make_service_with_connect_info::<SocketAddr>())
			.await
	});
	Ok(handle)
}

// vim: ts=4
