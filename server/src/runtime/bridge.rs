//! Synchronous host bindings injected as the `fazt` global.
//!
//! Each namespace is a table of named functions that capture the site id,
//! app id, and request budget at injection time, so a handler can never
//! reach another site's storage or hub. Calls block the VM thread until the
//! host returns; failures are thrown into JS as structured
//! `{code, message, retryable}` objects.

use rquickjs::function::Opt;
use rquickjs::{Ctx, Function, Object, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::budget::RequestBudget;
use crate::core::write_queue::{WriteOp, WriteQueue};
use crate::egress::{EgressProxy, FetchOptions};
use crate::prelude::*;
use crate::realtime::HubManager;
use fazt_types::store_adapter::StoreAdapter;
use fazt_types::utils::random_id;

/// Everything a capability call needs, captured at injection time.
#[derive(Clone)]
pub struct BridgeCtx {
	pub site_id: Box<str>,
	pub app_id: Box<str>,
	pub env: HashMap<Box<str>, Box<str>>,
	pub store: Arc<dyn StoreAdapter>,
	pub queue: Arc<WriteQueue>,
	pub hubs: Arc<HubManager>,
	pub egress: Arc<EgressProxy>,
	pub budget: Arc<RequestBudget>,
	pub handle: tokio::runtime::Handle,
}

// JSON bridging helpers
//***********************

pub fn json_to_js<'js>(
	cx: &Ctx<'js>,
	value: &serde_json::Value,
) -> rquickjs::Result<Value<'js>> {
	cx.json_parse(value.to_string())
}

pub fn js_to_json<'js>(cx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<serde_json::Value> {
	if value.is_undefined() {
		return Ok(serde_json::Value::Null);
	}
	let Some(text) = cx.json_stringify(value)? else {
		return Ok(serde_json::Value::Null);
	};
	let text = text.to_string()?;
	Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::Null))
}

/// Best-effort variant for error paths where a second failure must not mask
/// the first.
pub fn js_to_json_lossy<'js>(cx: &Ctx<'js>, value: Value<'js>) -> serde_json::Value {
	js_to_json(cx, value).unwrap_or(serde_json::Value::Null)
}

/// Throw a structured host error into the VM.
fn host_error<'js>(cx: &Ctx<'js>, code: &str, message: &str, retryable: bool) -> rquickjs::Error {
	let payload =
		serde_json::json!({ "code": code, "message": message, "retryable": retryable });
	match cx.json_parse(payload.to_string()) {
		Ok(value) => cx.throw(value),
		Err(err) => err,
	}
}

/// Map a kernel error onto a thrown host error, preserving retryability.
fn throw_fz<'js>(cx: &Ctx<'js>, err: Error) -> rquickjs::Error {
	match err {
		Error::StorageBusy => host_error(cx, "STORAGE_BUSY", "storage temporarily unavailable", true),
		Error::NotFound => host_error(cx, "NOT_FOUND", "not found", false),
		Error::Net(net) => host_error(cx, net.code.as_str(), &net.message, net.retryable),
		Error::Validation(msg) => host_error(cx, "INVALID", &msg, false),
		other => host_error(cx, "INTERNAL", &other.to_string(), false),
	}
}

/// Install the `fazt` global into a fresh context.
pub fn install<'js>(cx: &Ctx<'js>, bctx: &BridgeCtx) -> rquickjs::Result<()> {
	let fazt = Object::new(cx.clone())?;
	fazt.set("env", env_namespace(cx, bctx)?)?;
	fazt.set("storage", storage_namespace(cx, bctx)?)?;
	fazt.set("realtime", realtime_namespace(cx, bctx)?)?;
	fazt.set("net", net_namespace(cx, bctx)?)?;
	cx.globals().set("fazt", fazt)?;
	Ok(())
}

fn env_namespace<'js>(cx: &Ctx<'js>, bctx: &BridgeCtx) -> rquickjs::Result<Object<'js>> {
	let env = Object::new(cx.clone())?;
	let entries = bctx.env.clone();
	env.set(
		"get",
		Function::new(cx.clone(), move |name: String| -> Option<String> {
			entries.get(name.as_str()).map(ToString::to_string)
		})?,
	)?;
	Ok(env)
}

fn storage_namespace<'js>(cx: &Ctx<'js>, bctx: &BridgeCtx) -> rquickjs::Result<Object<'js>> {
	let storage = Object::new(cx.clone())?;

	// kv
	//****
	let kv = Object::new(cx.clone())?;
	let b = bctx.clone();
	kv.set(
		"get",
		Function::new(cx.clone(), move |cx: Ctx<'js>, key: String| -> rquickjs::Result<Value<'js>> {
			let value = b
				.handle
				.block_on(b.store.kv_get(&b.site_id, &key))
				.map_err(|err| throw_fz(&cx, err))?;
			match value {
				Some(value) => json_to_js(&cx, &value),
				None => Ok(Value::new_null(cx.clone())),
			}
		})?,
	)?;
	let b = bctx.clone();
	kv.set(
		"set",
		Function::new(
			cx.clone(),
			move |cx: Ctx<'js>, key: String, value: Value<'js>| -> rquickjs::Result<()> {
				let value = js_to_json(&cx, value)?;
				let op = WriteOp::KvSet {
					site_id: b.site_id.clone(),
					key: key.into(),
					value,
				};
				b.handle
					.block_on(b.queue.submit(op, &b.budget))
					.map(|_| ())
					.map_err(|err| throw_fz(&cx, err))
			},
		)?,
	)?;
	let b = bctx.clone();
	kv.set(
		"del",
		Function::new(cx.clone(), move |cx: Ctx<'js>, key: String| -> rquickjs::Result<()> {
			let op = WriteOp::KvDel { site_id: b.site_id.clone(), key: key.into() };
			b.handle
				.block_on(b.queue.submit(op, &b.budget))
				.map(|_| ())
				.map_err(|err| throw_fz(&cx, err))
		})?,
	)?;
	storage.set("kv", kv)?;

	// docs
	//******
	let docs = Object::new(cx.clone())?;
	let b = bctx.clone();
	docs.set(
		"insert",
		Function::new(
			cx.clone(),
			move |cx: Ctx<'js>, collection: String, doc: Value<'js>| -> rquickjs::Result<String> {
				let data = js_to_json(&cx, doc)?;
				let doc_id = random_id().map_err(|err| throw_fz(&cx, err))?;
				let op = WriteOp::DocInsert {
					site_id: b.site_id.clone(),
					collection: collection.into(),
					doc_id: doc_id.clone().into(),
					data,
				};
				b.handle
					.block_on(b.queue.submit(op, &b.budget))
					.map(|_| doc_id)
					.map_err(|err| throw_fz(&cx, err))
			},
		)?,
	)?;
	let b = bctx.clone();
	docs.set(
		"query",
		Function::new(
			cx.clone(),
			move |cx: Ctx<'js>,
			      collection: String,
			      opts: Opt<Value<'js>>|
			      -> rquickjs::Result<Value<'js>> {
				let limit = opts
					.0
					.map(|opts| js_to_json_lossy(&cx, opts))
					.and_then(|opts| opts.get("limit").and_then(serde_json::Value::as_u64))
					.unwrap_or(100) as u32;
				let docs = b
					.handle
					.block_on(b.store.doc_query(&b.site_id, &collection, limit))
					.map_err(|err| throw_fz(&cx, err))?;
				let rows: Vec<serde_json::Value> = docs
					.into_iter()
					.map(|doc| {
						serde_json::json!({
							"id": doc.doc_id.as_ref(),
							"data": doc.data,
							"createdAt": doc.created_at,
							"updatedAt": doc.updated_at,
						})
					})
					.collect();
				json_to_js(&cx, &serde_json::Value::Array(rows))
			},
		)?,
	)?;
	let b = bctx.clone();
	docs.set(
		"update",
		Function::new(
			cx.clone(),
			move |cx: Ctx<'js>,
			      collection: String,
			      doc_id: String,
			      doc: Value<'js>|
			      -> rquickjs::Result<()> {
				let data = js_to_json(&cx, doc)?;
				let op = WriteOp::DocUpdate {
					site_id: b.site_id.clone(),
					collection: collection.into(),
					doc_id: doc_id.into(),
					data,
				};
				b.handle
					.block_on(b.queue.submit(op, &b.budget))
					.map(|_| ())
					.map_err(|err| throw_fz(&cx, err))
			},
		)?,
	)?;
	let b = bctx.clone();
	docs.set(
		"delete",
		Function::new(
			cx.clone(),
			move |cx: Ctx<'js>, collection: String, doc_id: String| -> rquickjs::Result<()> {
				let op = WriteOp::DocDelete {
					site_id: b.site_id.clone(),
					collection: collection.into(),
					doc_id: doc_id.into(),
				};
				b.handle
					.block_on(b.queue.submit(op, &b.budget))
					.map(|_| ())
					.map_err(|err| throw_fz(&cx, err))
			},
		)?,
	)?;
	storage.set("docs", docs)?;

	// blobs
	//*******
	let blobs = Object::new(cx.clone())?;
	let b = bctx.clone();
	blobs.set(
		"put",
		Function::new(
			cx.clone(),
			move |cx: Ctx<'js>,
			      key: String,
			      data: String,
			      mime: Opt<String>|
			      -> rquickjs::Result<()> {
				let op = WriteOp::BlobPut {
					site_id: b.site_id.clone(),
					key: key.into(),
					content: data.into_bytes(),
					mime_type: mime.0.map(Into::into),
				};
				b.handle
					.block_on(b.queue.submit(op, &b.budget))
					.map(|_| ())
					.map_err(|err| throw_fz(&cx, err))
			},
		)?,
	)?;
	let b = bctx.clone();
	blobs.set(
		"get",
		Function::new(cx.clone(), move |cx: Ctx<'js>, key: String| -> rquickjs::Result<Value<'js>> {
			let blob = b
				.handle
				.block_on(b.store.blob_get(&b.site_id, &key))
				.map_err(|err| throw_fz(&cx, err))?;
			match blob {
				Some(blob) => {
					let data = String::from_utf8_lossy(&blob.content).into_owned();
					json_to_js(
						&cx,
						&serde_json::json!({
							"data": data,
							"mimeType": blob.mime_type.as_deref(),
						}),
					)
				}
				None => Ok(Value::new_null(cx.clone())),
			}
		})?,
	)?;
	let b = bctx.clone();
	blobs.set(
		"del",
		Function::new(cx.clone(), move |cx: Ctx<'js>, key: String| -> rquickjs::Result<()> {
			let op = WriteOp::BlobDel { site_id: b.site_id.clone(), key: key.into() };
			b.handle
				.block_on(b.queue.submit(op, &b.budget))
				.map(|_| ())
				.map_err(|err| throw_fz(&cx, err))
		})?,
	)?;
	storage.set("blobs", blobs)?;

	Ok(storage)
}

fn realtime_namespace<'js>(cx: &Ctx<'js>, bctx: &BridgeCtx) -> rquickjs::Result<Object<'js>> {
	let realtime = Object::new(cx.clone())?;

	let b = bctx.clone();
	realtime.set(
		"broadcast",
		Function::new(
			cx.clone(),
			move |cx: Ctx<'js>, channel: String, data: Value<'js>| -> rquickjs::Result<usize> {
				let data = js_to_json(&cx, data)?;
				Ok(b.hubs.get_hub(&b.site_id).broadcast_to_channel(&channel, &data))
			},
		)?,
	)?;
	let b = bctx.clone();
	realtime.set(
		"broadcastAll",
		Function::new(cx.clone(), move |cx: Ctx<'js>, data: Value<'js>| -> rquickjs::Result<usize> {
			let data = js_to_json(&cx, data)?;
			Ok(b.hubs.get_hub(&b.site_id).broadcast_all(&data))
		})?,
	)?;
	let b = bctx.clone();
	realtime.set(
		"subscribers",
		Function::new(cx.clone(), move |channel: String| -> Vec<String> {
			match b.hubs.find_hub(&b.site_id) {
				Some(hub) => hub.subscribers(&channel).iter().map(ToString::to_string).collect(),
				None => Vec::new(),
			}
		})?,
	)?;
	let b = bctx.clone();
	realtime.set(
		"count",
		Function::new(cx.clone(), move |channel: Opt<String>| -> usize {
			match b.hubs.find_hub(&b.site_id) {
				Some(hub) => hub.count(channel.0.as_deref()),
				None => 0,
			}
		})?,
	)?;
	let b = bctx.clone();
	realtime.set(
		"kick",
		Function::new(cx.clone(), move |client_id: String, reason: Opt<String>| -> bool {
			match b.hubs.find_hub(&b.site_id) {
				Some(hub) => hub.kick_client(&client_id, reason.0.as_deref()),
				None => false,
			}
		})?,
	)?;

	Ok(realtime)
}

fn net_namespace<'js>(cx: &Ctx<'js>, bctx: &BridgeCtx) -> rquickjs::Result<Object<'js>> {
	let net = Object::new(cx.clone())?;

	let b = bctx.clone();
	net.set(
		"fetch",
		Function::new(
			cx.clone(),
			move |cx: Ctx<'js>, url: String, opts: Opt<Value<'js>>| -> rquickjs::Result<Object<'js>> {
				let opts: FetchOptions = match opts.0 {
					Some(value) => {
						let json = js_to_json(&cx, value)?;
						serde_json::from_value(json).map_err(|_| {
							host_error(&cx, "NET_ERROR", "invalid fetch options", false)
						})?
					}
					None => FetchOptions::default(),
				};

				let result =
					b.handle.block_on(b.egress.fetch(&b.app_id, &url, opts, &b.budget));
				let response = result
					.map_err(|err| host_error(&cx, err.code.as_str(), &err.message, err.retryable))?;

				let body = String::from_utf8_lossy(&response.body).into_owned();
				let obj = Object::new(cx.clone())?;
				obj.set("status", response.status)?;
				obj.set("ok", response.ok)?;
				obj.set(
					"headers",
					json_to_js(&cx, &serde_json::to_value(&response.headers).unwrap_or_default())?,
				)?;
				let text = body.clone();
				obj.set(
					"text",
					Function::new(cx.clone(), move || -> String { text.clone() })?,
				)?;
				obj.set(
					"json",
					Function::new(cx.clone(), move |cx: Ctx<'js>| -> rquickjs::Result<Value<'js>> {
						cx.json_parse(body.clone())
					})?,
				)?;
				Ok(obj)
			},
		)?,
	)?;

	Ok(net)
}

// vim: ts=4
