//! Serverless JavaScript runtime.
//!
//! A bounded pool of QuickJS virtual machines. Each execution takes a VM,
//! creates a fresh context (so no state leaks between requests or sites),
//! injects the `fazt` capability namespace bound to the current site and
//! budget, calls the handler synchronously, and interrupts the VM when the
//! deadline passes. The host thread blocks for the duration; other requests
//! run on other VMs in parallel.

pub mod bridge;

use rquickjs::{Context, Function, Runtime as QjsRuntime, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use crate::prelude::*;
pub use bridge::BridgeCtx;

/// Upper bound on pooled VMs (and thus concurrent executions).
pub const MAX_VMS: usize = 100;
/// Per-VM heap limit.
pub const VM_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Request descriptor passed to the handler.
#[derive(Debug, Clone, Serialize)]
pub struct JsRequest {
	pub method: String,
	pub path: String,
	pub query: HashMap<String, String>,
	pub headers: HashMap<String, String>,
	pub body: Option<String>,
}

/// Response descriptor returned by the handler: `{status, headers, body | json}`.
#[derive(Debug, Default, Deserialize)]
struct JsResponseShape {
	status: Option<u16>,
	headers: Option<HashMap<String, String>>,
	body: Option<String>,
	json: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct JsResponse {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

struct JsVm {
	rt: QjsRuntime,
}

impl JsVm {
	fn new() -> FzResult<Self> {
		let rt = QjsRuntime::new()
			.map_err(|err| Error::Internal(format!("cannot create JS runtime: {}", err)))?;
		rt.set_memory_limit(VM_MEMORY_LIMIT);
		Ok(Self { rt })
	}
}

pub struct JsRuntime {
	vm_tx: flume::Sender<JsVm>,
	vm_rx: flume::Receiver<JsVm>,
	created: AtomicUsize,
	max_vms: usize,
}

impl std::fmt::Debug for JsRuntime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("JsRuntime")
			.field("created", &self.created.load(Ordering::Relaxed))
			.field("idle", &self.vm_rx.len())
			.finish()
	}
}

impl JsRuntime {
	pub fn new(max_vms: usize) -> Arc<Self> {
		let (vm_tx, vm_rx) = flume::bounded(max_vms);
		Arc::new(Self { vm_tx, vm_rx, created: AtomicUsize::new(0), max_vms })
	}

	/// Take an idle VM, or create one while the pool is under its bound, or
	/// wait for a release.
	async fn acquire(&self) -> FzResult<JsVm> {
		if let Ok(vm) = self.vm_rx.try_recv() {
			return Ok(vm);
		}
		if self.created.fetch_add(1, Ordering::SeqCst) < self.max_vms {
			return JsVm::new().inspect_err(|_| {
				self.created.fetch_sub(1, Ordering::SeqCst);
			});
		}
		self.created.fetch_sub(1, Ordering::SeqCst);
		self.vm_rx
			.recv_async()
			.await
			.map_err(|_| Error::Internal("VM pool closed".into()))
	}

	fn release(&self, vm: JsVm) {
		if self.vm_tx.try_send(vm).is_err() {
			self.created.fetch_sub(1, Ordering::SeqCst);
		}
	}

	/// Execute a handler script against a request. Blocking work runs on the
	/// blocking pool; the caller's task just awaits the outcome.
	pub async fn execute(
		&self,
		bctx: BridgeCtx,
		script: Arc<str>,
		request: JsRequest,
	) -> FzResult<JsResponse> {
		let vm = self.acquire().await?;
		let deadline = bctx.budget.deadline();

		let (vm, result) =
			tokio::task::spawn_blocking(move || run_in_vm(vm, bctx, script, request, deadline))
				.await
				.map_err(|err| Error::Internal(format!("VM task failed: {}", err)))?;

		self.release(vm);
		result
	}
}

fn run_in_vm(
	vm: JsVm,
	bctx: BridgeCtx,
	script: Arc<str>,
	request: JsRequest,
	deadline: Instant,
) -> (JsVm, FzResult<JsResponse>) {
	// The interrupt handler fires periodically inside the engine; once the
	// deadline passes the execution is torn down and the handler cannot
	// catch it.
	let interrupted = Arc::new(AtomicBool::new(false));
	{
		let interrupted = interrupted.clone();
		vm.rt.set_interrupt_handler(Some(Box::new(move || {
			if Instant::now() >= deadline {
				interrupted.store(true, Ordering::Relaxed);
				true
			} else {
				false
			}
		})));
	}

	let result = execute_in_context(&vm, &bctx, &script, &request, &interrupted);

	vm.rt.set_interrupt_handler(None);
	(vm, result)
}

fn execute_in_context(
	vm: &JsVm,
	bctx: &BridgeCtx,
	script: &str,
	request: &JsRequest,
	interrupted: &Arc<AtomicBool>,
) -> FzResult<JsResponse> {
	let context = Context::full(&vm.rt)
		.map_err(|err| Error::Internal(format!("cannot create JS context: {}", err)))?;

	context.with(|cx| {
		bridge::install(&cx, bctx)
			.map_err(|err| Error::Internal(format!("bridge install: {}", err)))?;

		if let Err(err) = cx.eval::<(), _>(script.as_bytes().to_vec()) {
			return Err(map_js_error(&cx, err, interrupted));
		}

		let handler: Function = cx
			.globals()
			.get("handler")
			.map_err(|_| Error::HandlerError("handler function not defined".into()))?;

		let request_value = bridge::json_to_js(&cx, &serde_json::to_value(request)?)
			.map_err(|err| Error::Internal(format!("request injection: {}", err)))?;

		let returned: Value = handler
			.call((request_value,))
			.map_err(|err| map_js_error(&cx, err, interrupted))?;

		shape_response(&cx, returned)
	})
}

/// Turn an engine error into the kernel taxonomy. A thrown host error keeps
/// its retryability; a deadline interrupt is a handler failure.
fn map_js_error(cx: &rquickjs::Ctx<'_>, err: rquickjs::Error, interrupted: &AtomicBool) -> Error {
	if interrupted.load(Ordering::Relaxed) {
		return Error::HandlerError("execution deadline exceeded".into());
	}
	if let rquickjs::Error::Exception = err {
		let thrown = cx.catch();
		let json = bridge::js_to_json_lossy(cx, thrown);
		if let Some(code) = json.get("code").and_then(|c| c.as_str()) {
			let retryable =
				json.get("retryable").and_then(serde_json::Value::as_bool).unwrap_or(false);
			let message = json
				.get("message")
				.and_then(|m| m.as_str())
				.unwrap_or("handler raised a host error")
				.to_string();
			if code == "STORAGE_BUSY" {
				return Error::StorageBusy;
			}
			if let Some(net_code) = parse_net_code(code) {
				return Error::Net(NetError { code: net_code, message, retryable });
			}
			if retryable {
				return Error::StorageBusy;
			}
			return Error::HandlerError(format!("{}: {}", code, message));
		}
		return Error::HandlerError(format!("uncaught exception: {}", json));
	}
	Error::HandlerError(format!("execution failed: {}", err))
}

fn parse_net_code(code: &str) -> Option<NetCode> {
	Some(match code {
		"NET_BLOCKED" => NetCode::Blocked,
		"NET_TIMEOUT" => NetCode::Timeout,
		"NET_LIMIT" => NetCode::Limit,
		"NET_BUDGET" => NetCode::Budget,
		"NET_SIZE" => NetCode::Size,
		"NET_ERROR" => NetCode::Error,
		_ => return None,
	})
}

fn shape_response<'js>(cx: &rquickjs::Ctx<'js>, value: Value<'js>) -> FzResult<JsResponse> {
	if value.is_undefined() || value.is_null() {
		return Err(Error::HandlerError("handler returned no response".into()));
	}

	let json = bridge::js_to_json_lossy(cx, value);
	let shape: JsResponseShape = serde_json::from_value(json)
		.map_err(|_| Error::HandlerError("handler returned a malformed response".into()))?;

	let mut headers: Vec<(String, String)> =
		shape.headers.map(|h| h.into_iter().collect()).unwrap_or_default();

	let body = match (shape.body, shape.json) {
		(Some(body), _) => body.into_bytes(),
		(None, Some(json)) => {
			let has_content_type =
				headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
			if !has_content_type {
				headers.push(("content-type".into(), "application/json".into()));
			}
			json.to_string().into_bytes()
		}
		(None, None) => Vec::new(),
	};

	Ok(JsResponse { status: shape.status.unwrap_or(200), headers, body })
}

// vim: ts=4
