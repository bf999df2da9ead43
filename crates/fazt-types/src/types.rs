//! Common types used throughout the Fazt platform.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::skip_serializing_none;
use std::time::SystemTime;

// Timestamp //
//***********//
#[derive(Clone, Copy, Debug, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64)
	}

	/// Milliseconds since the epoch, for realtime message timestamps.
	pub fn now_millis() -> i64 {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		res.as_millis() as i64
	}

	pub fn from_now(delta: i64) -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64 + delta)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::cmp::PartialEq for Timestamp {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl std::cmp::Eq for Timestamp {}

impl std::cmp::PartialOrd for Timestamp {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl std::cmp::Ord for Timestamp {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.0.cmp(&other.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

// Patch<T> - For PATCH semantics //
//**********************************//
/// Represents a field in a PATCH request with three states:
/// - `Undefined`: Field not present in JSON - don't change existing value
/// - `Null`: Field present with null value - set to NULL in database
/// - `Value(T)`: Field present with value - update to this value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Patch<T> {
	/// Field not present in request - no change
	#[default]
	Undefined,
	/// Field present with null value - delete/set to NULL
	Null,
	/// Field present with value - update to this value
	Value(T),
}

impl<T> Patch<T> {
	pub fn is_undefined(&self) -> bool {
		matches!(self, Patch::Undefined)
	}

	pub fn value(&self) -> Option<&T> {
		match self {
			Patch::Value(v) => Some(v),
			_ => None,
		}
	}

	/// Maps a `Patch<T>` to `Patch<U>` by applying a function to the contained value
	pub fn map<U, F>(self, f: F) -> Patch<U>
	where
		F: FnOnce(T) -> U,
	{
		match self {
			Patch::Undefined => Patch::Undefined,
			Patch::Null => Patch::Null,
			Patch::Value(v) => Patch::Value(f(v)),
		}
	}
}

impl<T> Serialize for Patch<T>
where
	T: Serialize,
{
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match self {
			Patch::Undefined | Patch::Null => serializer.serialize_none(),
			Patch::Value(v) => v.serialize(serializer),
		}
	}
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
	T: Deserialize<'de>,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<T>::deserialize(deserializer).map(|opt| match opt {
			None => Patch::Null,
			Some(v) => Patch::Value(v),
		})
	}
}

// Apps //
//******//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
	#[serde(rename = "public")]
	Public,
	#[serde(rename = "unlisted")]
	Unlisted,
	#[serde(rename = "private")]
	Private,
}

impl Visibility {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Public => "public",
			Self::Unlisted => "unlisted",
			Self::Private => "private",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"public" => Some(Self::Public),
			"unlisted" => Some(Self::Unlisted),
			"private" => Some(Self::Private),
			_ => None,
		}
	}
}

/// Deployment provenance for an app.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
	pub source: Option<Box<str>>,
	pub source_url: Option<Box<str>>,
	pub source_ref: Option<Box<str>>,
	pub source_commit: Option<Box<str>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
	#[serde(rename = "id")]
	pub app_id: Box<str>,
	pub title: Option<Box<str>>,
	pub visibility: Visibility,
	#[serde(flatten)]
	pub provenance: Provenance,
	pub forked_from_id: Option<Box<str>>,
	/// Environment entries exposed to handlers via `fazt.env.get`.
	#[serde(default)]
	pub env: std::collections::HashMap<Box<str>, Box<str>>,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppPatch {
	#[serde(default)]
	pub title: Patch<Box<str>>,
	#[serde(default)]
	pub visibility: Patch<Visibility>,
	#[serde(default)]
	pub env: Patch<std::collections::HashMap<Box<str>, Box<str>>>,
}

// Aliases //
//*********//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitTarget {
	pub app_id: Box<str>,
	pub weight: u32,
}

/// What an alias routes to. Persisted as a `type` discriminator plus a
/// `targets` JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum AliasTarget {
	App { app_id: Box<str> },
	Redirect { url: Box<str> },
	Reserved,
	Split { targets: Vec<SplitTarget> },
}

impl AliasTarget {
	pub fn type_str(&self) -> &'static str {
		match self {
			Self::App { .. } => "app",
			Self::Redirect { .. } => "redirect",
			Self::Reserved => "reserved",
			Self::Split { .. } => "split",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasRecord {
	pub subdomain: Box<str>,
	#[serde(flatten)]
	pub target: AliasTarget,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

// Files //
//*******//

/// A file row loaded from the store.
#[derive(Debug, Clone)]
pub struct FileRecord {
	pub site_id: Box<str>,
	pub path: Box<str>,
	pub content: Vec<u8>,
	pub size_bytes: u64,
	pub mime_type: Box<str>,
	/// SHA-256 hex of `content`. Always in sync with the current row.
	pub hash: Box<str>,
	pub app_id: Option<Box<str>>,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

/// A file write, produced by the deployer or the VFS.
#[derive(Debug, Clone)]
pub struct FileWrite {
	pub site_id: Box<str>,
	pub path: Box<str>,
	pub content: Vec<u8>,
	pub mime_type: Box<str>,
	pub hash: Box<str>,
	pub app_id: Option<Box<str>>,
}

/// File listing entry without content.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
	pub path: Box<str>,
	pub size_bytes: u64,
	pub mime_type: Box<str>,
	pub hash: Box<str>,
}

// Secrets //
//*********//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretInjection {
	#[serde(rename = "bearer")]
	Bearer,
	#[serde(rename = "header")]
	Header,
	#[serde(rename = "query")]
	Query,
}

impl SecretInjection {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Bearer => "bearer",
			Self::Header => "header",
			Self::Query => "query",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"bearer" => Some(Self::Bearer),
			"header" => Some(Self::Header),
			"query" => Some(Self::Query),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct SecretRecord {
	pub name: Box<str>,
	pub value: Box<str>,
	pub inject_as: SecretInjection,
	/// Header or query parameter name. Required unless `inject_as` is bearer.
	pub inject_key: Option<Box<str>>,
	/// If set, the secret is only injected for this egress domain.
	pub domain: Option<Box<str>>,
	/// If set, the secret is only visible to this app.
	pub app_id: Option<Box<str>>,
	pub created_at: Timestamp,
}

/// Secret listing entry. The value is never exposed.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMeta {
	pub name: Box<str>,
	pub inject_as: Box<str>,
	pub inject_key: Option<Box<str>>,
	pub domain: Option<Box<str>>,
	pub app_id: Option<Box<str>>,
	pub created_at: Timestamp,
}

// Egress allowlist //
//******************//

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistEntry {
	#[serde(default)]
	pub entry_id: i64,
	/// None means the entry applies to every app.
	pub app_id: Option<Box<str>>,
	pub domain: Box<str>,
	pub max_response: Option<u64>,
	pub timeout_ms: Option<u64>,
	pub rate_limit: Option<u32>,
	pub rate_burst: Option<u32>,
	pub cache_ttl: Option<u64>,
}

// Admin surface //
//***************//

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
	pub key_id: Box<str>,
	/// SHA-256 hex of the key secret. The secret itself is never stored.
	pub secret_hash: Box<str>,
	pub description: Box<str>,
	pub created_at: Timestamp,
	pub last_used_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
	pub deploy_id: Box<str>,
	pub app_id: Box<str>,
	pub file_count: u32,
	pub total_bytes: u64,
	pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
	#[serde(default)]
	pub entry_id: i64,
	pub ts: Timestamp,
	pub kind: Box<str>,
	pub subject: Box<str>,
	pub detail: Option<Box<str>>,
}

// Storage capability records //
//****************************//

#[derive(Debug, Clone)]
pub struct DocRecord {
	pub doc_id: Box<str>,
	pub collection: Box<str>,
	pub data: serde_json::Value,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct BlobRecord {
	pub key: Box<str>,
	pub content: Vec<u8>,
	pub mime_type: Option<Box<str>>,
	pub created_at: Timestamp,
}

// API Response Envelope & Error Types //
//*************************************//

/// Success response envelope for single objects
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
	pub data: T,
	pub time: Timestamp,
}

impl<T> ApiResponse<T> {
	/// Create a new response with data and current time
	pub fn new(data: T) -> Self {
		Self { data, time: Timestamp::now() }
	}
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
	pub error: ErrorDetails,
}

/// Error details with structured code and message
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
	pub code: String,
	pub message: String,
}

impl ErrorResponse {
	pub fn new(code: String, message: String) -> Self {
		Self { error: ErrorDetails { code, message } }
	}
}


// vim: ts=4
