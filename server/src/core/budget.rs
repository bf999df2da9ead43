//! Per-request deadline context with named sub-budgets.
//!
//! One budget is created per inbound request and threaded through every
//! capability call. The storage sub-budget gates write queue admission; the
//! net sub-budget keeps external fetches from eating the whole runtime
//! deadline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Total wall-clock allowance for a handler execution.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound HTTP gets a shorter allowance so a slow upstream cannot consume
/// the full runtime deadline.
pub const NET_BUDGET: Duration = Duration::from_secs(4);

/// A storage admission is refused when less than this remains.
pub const MIN_STORAGE_TIME: Duration = Duration::from_millis(100);

/// Maximum `fazt.net.fetch` calls per request.
pub const MAX_FETCH_CALLS: u32 = 5;

#[derive(Debug)]
pub struct RequestBudget {
	deadline: Instant,
	net_deadline: Instant,
	fetch_calls: AtomicU32,
}

impl RequestBudget {
	pub fn new() -> Self {
		Self::with_timeout(REQUEST_TIMEOUT)
	}

	pub fn with_timeout(total: Duration) -> Self {
		let start = Instant::now();
		let net = total.min(NET_BUDGET);
		Self {
			deadline: start + total,
			net_deadline: start + net,
			fetch_calls: AtomicU32::new(0),
		}
	}

	/// Time left before the overall deadline.
	pub fn remaining(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}

	/// Time left in the net sub-budget (never more than the overall deadline).
	pub fn net_remaining(&self) -> Duration {
		self.net_deadline.saturating_duration_since(Instant::now())
	}

	pub fn expired(&self) -> bool {
		Instant::now() >= self.deadline
	}

	pub fn deadline(&self) -> Instant {
		self.deadline
	}

	/// Storage admission rule: refuse once the remaining time cannot cover a
	/// store round-trip.
	pub fn storage_admissible(&self) -> bool {
		self.remaining() >= MIN_STORAGE_TIME
	}

	/// Count a fetch call against the per-request cap. Returns false once the
	/// cap is exceeded.
	pub fn register_fetch(&self) -> bool {
		self.fetch_calls.fetch_add(1, Ordering::Relaxed) < MAX_FETCH_CALLS
	}
}

impl Default for RequestBudget {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_fresh_budget_is_admissible() {
		let budget = RequestBudget::new();
		assert!(budget.storage_admissible());
		assert!(!budget.expired());
		assert!(budget.remaining() > Duration::from_secs(4));
		assert!(budget.net_remaining() <= NET_BUDGET);
	}

	#[test]
	fn test_exhausted_budget_refuses_storage() {
		let budget = RequestBudget::with_timeout(Duration::from_millis(0));
		assert!(budget.expired());
		assert!(!budget.storage_admissible());
		assert_eq!(budget.remaining(), Duration::ZERO);
	}

	#[test]
	fn test_tight_budget_below_storage_floor() {
		let budget = RequestBudget::with_timeout(Duration::from_millis(10));
		// 10ms is under the storage floor even though the budget is not expired
		assert!(!budget.storage_admissible());
	}

	#[test]
	fn test_fetch_call_cap() {
		let budget = RequestBudget::new();
		for _ in 0..MAX_FETCH_CALLS {
			assert!(budget.register_fetch());
		}
		assert!(!budget.register_fetch());
		assert!(!budget.register_fetch());
	}
}

// vim: ts=4
