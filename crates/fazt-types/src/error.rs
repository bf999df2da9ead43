//! Error handling subsystem. Implements a custom Error type.
//!
//! Retryability is tracked explicitly: any error marked retryable is mapped
//! to `503` with a short `Retry-After` at the HTTP boundary, regardless of
//! which layer produced it.

use axum::{Json, http::StatusCode, response::IntoResponse};

use crate::types::ErrorResponse;
use tracing::warn;

pub type FzResult<T> = std::result::Result<T, Error>;

/// Typed egress error codes surfaced to JS handlers as `{code, message, retryable}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetCode {
	Blocked,
	Timeout,
	Limit,
	Budget,
	Size,
	Error,
}

impl NetCode {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Blocked => "NET_BLOCKED",
			Self::Timeout => "NET_TIMEOUT",
			Self::Limit => "NET_LIMIT",
			Self::Budget => "NET_BUDGET",
			Self::Size => "NET_SIZE",
			Self::Error => "NET_ERROR",
		}
	}
}

#[derive(Debug, Clone)]
pub struct NetError {
	pub code: NetCode,
	pub message: String,
	pub retryable: bool,
}

impl NetError {
	pub fn new(code: NetCode, message: impl Into<String>) -> Self {
		let retryable = matches!(code, NetCode::Timeout | NetCode::Limit | NetCode::Budget);
		Self { code, message: message.into(), retryable }
	}
}

impl std::fmt::Display for NetError {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}: {}", self.code.as_str(), self.message)
	}
}

#[derive(Debug)]
pub enum Error {
	// Core errors
	NotFound,
	Unauthorized, // 401 - missing/invalid API key
	DbError,
	Parse,

	// Input validation and constraints
	Validation(String), // 400 - invalid input data
	Conflict(String),   // 409 - constraint violation (unique, foreign key, etc)

	// Admission control: write queue full, store busy, storage budget spent.
	// Always retryable.
	StorageBusy,

	// Typed egress failures (NET_* codes)
	Net(NetError),

	// Uncaught JS exception or VM interrupt
	HandlerError(String),

	// System
	Internal(String), // Internal invariant violations, for debugging

	// externals
	Io(std::io::Error),
}

impl Error {
	/// Whether this error should be reported as temporary (`503` + `Retry-After`).
	pub fn retryable(&self) -> bool {
		match self {
			Error::StorageBusy => true,
			Error::Net(err) => err.retryable,
			_ => false,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<NetError> for Error {
	fn from(err: NetError) -> Self {
		Self::Net(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(_err: serde_json::Error) -> Self {
		warn!("json error: {}", _err);
		Error::Parse
	}
}

impl From<std::num::ParseIntError> for Error {
	fn from(_err: std::num::ParseIntError) -> Self {
		warn!("parse int error: {}", _err);
		Error::Parse
	}
}

impl From<std::time::SystemTimeError> for Error {
	fn from(_err: std::time::SystemTimeError) -> Self {
		warn!("system time error: {}", _err);
		Error::Internal("system time error".into())
	}
}

impl From<axum::http::header::ToStrError> for Error {
	fn from(_err: axum::http::header::ToStrError) -> Self {
		warn!("header to str error: {}", _err);
		Error::Parse
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let retryable = self.retryable();
		let (status, code, message) = match self {
			Error::NotFound => (
				StatusCode::NOT_FOUND,
				"E-CORE-NOTFOUND".to_string(),
				"Resource not found".to_string(),
			),
			Error::Unauthorized => (
				StatusCode::UNAUTHORIZED,
				"E-AUTH-UNAUTH".to_string(),
				"Authentication required or invalid API key".to_string(),
			),
			Error::Validation(msg) => (
				StatusCode::BAD_REQUEST,
				"E-VAL-INVALID".to_string(),
				format!("Request validation failed: {}", msg),
			),
			Error::Conflict(msg) => (
				StatusCode::CONFLICT,
				"E-CORE-CONFLICT".to_string(),
				format!("Resource conflict: {}", msg),
			),
			Error::StorageBusy => (
				StatusCode::SERVICE_UNAVAILABLE,
				"E-STOR-BUSY".to_string(),
				"Storage temporarily unavailable".to_string(),
			),
			Error::Net(err) => {
				let status = if err.retryable {
					StatusCode::SERVICE_UNAVAILABLE
				} else {
					StatusCode::INTERNAL_SERVER_ERROR
				};
				(status, err.code.as_str().to_string(), err.message)
			}
			Error::HandlerError(msg) => {
				warn!("handler error: {}", msg);
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					"E-JS-HANDLER".to_string(),
					"Handler execution failed".to_string(),
				)
			}
			// Server errors (5xx) - no message exposure for security
			Error::DbError => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"E-CORE-DBERR".to_string(),
				"Internal server error".to_string(),
			),
			Error::Internal(msg) => {
				warn!("internal error: {}", msg);
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					"E-CORE-INTERNAL".to_string(),
					"Internal server error".to_string(),
				)
			}
			Error::Parse => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"E-CORE-PARSE".to_string(),
				"Internal server error".to_string(),
			),
			Error::Io(_) => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"E-SYS-IO".to_string(),
				"Internal server error".to_string(),
			),
		};

		let error_response = ErrorResponse::new(code, message);
		let mut response = (status, Json(error_response)).into_response();
		if retryable {
			response.headers_mut().insert(
				axum::http::header::RETRY_AFTER,
				axum::http::HeaderValue::from_static("1"),
			);
		}
		response
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_retryable_flags() {
		assert!(Error::StorageBusy.retryable());
		assert!(Error::Net(NetError::new(NetCode::Limit, "too many calls")).retryable());
		assert!(Error::Net(NetError::new(NetCode::Budget, "budget spent")).retryable());
		assert!(Error::Net(NetError::new(NetCode::Timeout, "deadline")).retryable());
		assert!(!Error::Net(NetError::new(NetCode::Blocked, "not allowlisted")).retryable());
		assert!(!Error::Net(NetError::new(NetCode::Size, "over cap")).retryable());
		assert!(!Error::NotFound.retryable());
		assert!(!Error::HandlerError("boom".into()).retryable());
	}

	#[test]
	fn test_net_code_strings() {
		assert_eq!(NetCode::Blocked.as_str(), "NET_BLOCKED");
		assert_eq!(NetCode::Timeout.as_str(), "NET_TIMEOUT");
		assert_eq!(NetCode::Limit.as_str(), "NET_LIMIT");
		assert_eq!(NetCode::Budget.as_str(), "NET_BUDGET");
		assert_eq!(NetCode::Size.as_str(), "NET_SIZE");
		assert_eq!(NetCode::Error.as_str(), "NET_ERROR");
	}
}

// vim: ts=4
