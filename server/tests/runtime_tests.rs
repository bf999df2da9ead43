//! Serverless runtime tests: handler execution, capability bindings, the
//! deadline interrupt, and error propagation back to the HTTP taxonomy.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::test_app;
use fazt::core::budget::RequestBudget;
use fazt::realtime::hub::{ClientHandle, Delivery, HubEvent, SEND_QUEUE_SIZE};
use fazt::runtime::{BridgeCtx, JsRequest};
use fazt::{App, Error, StoreAdapter};
use fazt_types::types::Timestamp;

fn bridge_ctx(app: &App, site_id: &str, budget: RequestBudget) -> BridgeCtx {
	BridgeCtx {
		site_id: site_id.into(),
		app_id: site_id.into(),
		env: [(Box::from("GREETING"), Box::from("hello"))].into_iter().collect(),
		store: app.store.clone(),
		queue: app.queue.clone(),
		hubs: app.hubs.clone(),
		egress: app.egress.clone(),
		budget: Arc::new(budget),
		handle: tokio::runtime::Handle::current(),
	}
}

fn get_request(path: &str) -> JsRequest {
	JsRequest {
		method: "GET".into(),
		path: path.into(),
		query: HashMap::new(),
		headers: HashMap::new(),
		body: None,
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_roundtrip() {
	let (app, _temp) = test_app().await;
	let script = r#"
		function handler(req) {
			return {
				status: 201,
				headers: {"x-test": "yes"},
				json: {method: req.method, path: req.path, env: fazt.env.get("GREETING")}
			};
		}
	"#;

	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let response =
		app.runtime.execute(ctx, script.into(), get_request("/api/hello")).await.unwrap();

	assert_eq!(response.status, 201);
	assert!(response.headers.iter().any(|(k, v)| k == "x-test" && v == "yes"));
	let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
	assert_eq!(body["method"], "GET");
	assert_eq!(body["path"], "/api/hello");
	assert_eq!(body["env"], "hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_handler_is_500() {
	let (app, _temp) = test_app().await;
	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let err = app
		.runtime
		.execute(ctx, "var x = 1;".into(), get_request("/api/x"))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::HandlerError(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_without_response_is_500() {
	let (app, _temp) = test_app().await;
	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let err = app
		.runtime
		.execute(ctx, "function handler(req) {}".into(), get_request("/"))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::HandlerError(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_kv_roundtrip_through_bridge() {
	let (app, _temp) = test_app().await;
	let script = r#"
		function handler(req) {
			fazt.storage.kv.set("counter", 41);
			fazt.storage.kv.set("counter", fazt.storage.kv.get("counter") + 1);
			var missing = fazt.storage.kv.get("nope");
			return {json: {counter: fazt.storage.kv.get("counter"), missing: missing}};
		}
	"#;

	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let response = app.runtime.execute(ctx, script.into(), get_request("/")).await.unwrap();
	let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
	assert_eq!(body["counter"], 42);
	assert_eq!(body["missing"], serde_json::Value::Null);

	// The write is visible outside the VM as well
	assert_eq!(
		app.store.kv_get("site1", "counter").await.unwrap(),
		Some(serde_json::json!(42))
	);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_docs_and_blobs_through_bridge() {
	let (app, _temp) = test_app().await;
	let script = r#"
		function handler(req) {
			var id = fazt.storage.docs.insert("notes", {text: "first"});
			fazt.storage.docs.update("notes", id, {text: "edited"});
			var rows = fazt.storage.docs.query("notes");
			fazt.storage.blobs.put("greeting", "hello blob", "text/plain");
			var blob = fazt.storage.blobs.get("greeting");
			return {json: {count: rows.length, text: rows[0].data.text, blob: blob.data}};
		}
	"#;

	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let response = app.runtime.execute(ctx, script.into(), get_request("/")).await.unwrap();
	let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
	assert_eq!(body["count"], 1);
	assert_eq!(body["text"], "edited");
	assert_eq!(body["blob"], "hello blob");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_s4_broadcast_reaches_hub_subscriber_only_on_same_site() {
	let (app, _temp) = test_app().await;

	// A websocket client subscribed to "chat" on siteA, and one on siteB
	let hub_a = app.hubs.get_hub("siteA");
	let hub_b = app.hubs.get_hub("siteB");
	let (tx_a, mut rx_a) = tokio::sync::mpsc::channel(SEND_QUEUE_SIZE);
	let (tx_b, mut rx_b) = tokio::sync::mpsc::channel(SEND_QUEUE_SIZE);
	let _ = hub_a.events().send(HubEvent::Register(ClientHandle {
		client_id: "c1".into(),
		tx: tx_a,
		channels: Default::default(),
		connected_at: Timestamp::now(),
	}));
	let _ = hub_b.events().send(HubEvent::Register(ClientHandle {
		client_id: "c1".into(),
		tx: tx_b,
		channels: Default::default(),
		connected_at: Timestamp::now(),
	}));
	tokio::time::sleep(Duration::from_millis(50)).await;
	hub_a.subscribe("c1", "chat");
	hub_b.subscribe("c1", "chat");

	let script = r#"
		function handler(req) {
			var n = fazt.realtime.broadcast("chat", {x: 1});
			return {json: {delivered: n, subs: fazt.realtime.subscribers("chat"), count: fazt.realtime.count("chat")}};
		}
	"#;
	let ctx = bridge_ctx(&app, "siteA", RequestBudget::new());
	let response = app.runtime.execute(ctx, script.into(), get_request("/")).await.unwrap();
	let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
	assert_eq!(body["delivered"], 1);
	assert_eq!(body["count"], 1);
	assert_eq!(body["subs"][0], "c1");

	let Some(Delivery::Frame(frame)) = rx_a.recv().await else { panic!("expected frame") };
	let msg: serde_json::Value = serde_json::from_str(&frame).unwrap();
	assert_eq!(msg["type"], "message");
	assert_eq!(msg["channel"], "chat");
	assert_eq!(msg["data"]["x"], 1);
	assert!(msg["timestamp"].is_i64());

	// Hub isolation: siteB's client heard nothing
	assert!(rx_b.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_s5_fetch_ip_literal_is_blocked() {
	let (app, _temp) = test_app().await;
	let script = r#"
		function handler(req) {
			try {
				fazt.net.fetch("http://127.0.0.1/");
				return {json: {threw: false}};
			} catch (err) {
				return {json: {threw: true, code: err.code, retryable: err.retryable}};
			}
		}
	"#;

	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let response = app.runtime.execute(ctx, script.into(), get_request("/")).await.unwrap();
	let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
	assert_eq!(body["threw"], true);
	assert_eq!(body["code"], "NET_BLOCKED");
	assert_eq!(body["retryable"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fetch_unlisted_domain_is_blocked() {
	let (app, _temp) = test_app().await;
	let script = r#"
		function handler(req) {
			try {
				fazt.net.fetch("https://not-allowlisted.example.com/data");
				return {json: {code: null}};
			} catch (err) {
				return {json: {code: err.code}};
			}
		}
	"#;

	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let response = app.runtime.execute(ctx, script.into(), get_request("/")).await.unwrap();
	let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
	assert_eq!(body["code"], "NET_BLOCKED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_s6_uncaught_retryable_storage_error_maps_to_503() {
	use axum::response::IntoResponse;

	let (app, _temp) = test_app().await;
	// The handler rethrows a retryable host error; the kernel must answer
	// 503 with Retry-After
	let script = r#"
		function handler(req) {
			throw {code: "STORAGE_BUSY", message: "queue full", retryable: true};
		}
	"#;

	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let err = app.runtime.execute(ctx, script.into(), get_request("/")).await.unwrap_err();
	assert!(err.retryable());

	let response = err.into_response();
	assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
	assert_eq!(response.headers().get(axum::http::header::RETRY_AFTER).unwrap(), "1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_interrupts_runaway_handler() {
	let (app, _temp) = test_app().await;
	let script = "function handler(req) { while (true) {} }";

	let ctx = bridge_ctx(&app, "site1", RequestBudget::with_timeout(Duration::from_millis(250)));
	let start = std::time::Instant::now();
	let err = app.runtime.execute(ctx, script.into(), get_request("/")).await.unwrap_err();
	assert!(matches!(err, Error::HandlerError(_)));
	assert!(!err.retryable());
	// The interrupt fired near the deadline, not at some far timeout
	assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_uncaught_js_exception_is_handler_error() {
	let (app, _temp) = test_app().await;
	let script = r#"function handler(req) { throw new Error("boom"); }"#;

	let ctx = bridge_ctx(&app, "site1", RequestBudget::new());
	let err = app.runtime.execute(ctx, script.into(), get_request("/")).await.unwrap_err();
	assert!(matches!(err, Error::HandlerError(_)));
}
