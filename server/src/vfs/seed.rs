//! Seeding of the reserved system sites.
//!
//! The `root` site backs the landing page shown when no alias matches, and
//! the `404` site backs the not-found page. Both are written from embedded
//! bundles on startup when absent, so a fresh store always has something to
//! serve.

use crate::core::budget::RequestBudget;
use crate::prelude::*;
use crate::vfs::{SITE_NOT_FOUND, SITE_ROOT, Vfs};
use std::time::Duration;

const ROOT_INDEX: &str = include_str!("../../assets/root.html");
const NOT_FOUND_INDEX: &str = include_str!("../../assets/404.html");

/// Seed `root` and `404` if they are not present yet. Idempotent.
pub async fn seed_system_sites(vfs: &Vfs) -> FzResult<()> {
	// Startup gets a generous budget; nothing user-facing is waiting yet.
	let budget = RequestBudget::with_timeout(Duration::from_secs(30));

	for (site_id, content) in [(SITE_ROOT, ROOT_INDEX), (SITE_NOT_FOUND, NOT_FOUND_INDEX)] {
		if vfs.exists(site_id, "index.html").await? {
			continue;
		}
		let file = Vfs::prepare_write(
			site_id,
			"index.html",
			content.as_bytes().to_vec(),
			"text/html",
			None,
		);
		vfs.write_file(file, &budget).await?;
		info!("Seeded system site '{}'", site_id);
	}
	Ok(())
}

// vim: ts=4
