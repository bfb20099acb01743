#![forbid(unsafe_code)]

use std::collections::HashMap;

use srlog_domain::{GiftCatalogEntry, RoomId};
use tracing::debug;

use crate::client::RoomFeed;

/// Free gifts are only trusted when the catalog says they cost exactly one
/// point; anything else pretending to be free over the push socket is noise.
const FREE_GIFT_POINT: u32 = 1;

/// In-memory gift catalog for one room, keyed by stringified gift id.
///
/// The cache is populated lazily and replaced atomically: a failed refresh
/// keeps the previous entries.
#[derive(Debug, Default)]
pub struct GiftCatalog {
	entries: HashMap<String, GiftCatalogEntry>,
	populated: bool,
}

impl GiftCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_populated(&self) -> bool {
		self.populated
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn resolve(&self, gift_id: u64) -> Option<&GiftCatalogEntry> {
		self.entries.get(gift_id.to_string().as_str())
	}

	/// Replace the whole catalog with a fresh gift list.
	pub fn replace(&mut self, gifts: Vec<GiftCatalogEntry>) {
		self.entries = gifts.into_iter().map(|g| (g.gift_id.to_string(), g)).collect();
		self.populated = true;
	}

	/// Fetch the room's gift list and swap it in. With `force` false this is
	/// a no-op once the catalog has been populated.
	pub async fn refresh(&mut self, feed: &dyn RoomFeed, room: RoomId, force: bool) -> anyhow::Result<()> {
		if self.populated && !force {
			return Ok(());
		}

		let gifts = feed.gift_list(room).await?;
		debug!(%room, count = gifts.len(), force, "refreshed gift catalog");
		self.replace(gifts);
		Ok(())
	}

	/// Restricted view used to validate pushed free gifts.
	pub fn free_view(&self) -> FreeGiftView {
		FreeGiftView {
			entries: self
				.entries
				.values()
				.filter(|g| g.free && g.point == FREE_GIFT_POINT)
				.map(|g| (g.gift_id.to_string(), g.clone()))
				.collect(),
		}
	}
}

/// The subset of the catalog a pushed free gift is allowed to reference:
/// entries marked free with a point value of exactly 1.
#[derive(Debug, Default, Clone)]
pub struct FreeGiftView {
	entries: HashMap<String, GiftCatalogEntry>,
}

impl FreeGiftView {
	pub fn resolve(&self, gift_id: u64) -> Option<&GiftCatalogEntry> {
		self.entries.get(gift_id.to_string().as_str())
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn gift(gift_id: u64, point: u32, free: bool) -> GiftCatalogEntry {
		GiftCatalogEntry {
			gift_id,
			name: format!("gift-{gift_id}"),
			point,
			image: String::new(),
			free,
		}
	}

	#[test]
	fn resolve_by_id() {
		let mut catalog = GiftCatalog::new();
		catalog.replace(vec![gift(1001, 1, true), gift(2001, 100, false)]);

		assert!(catalog.is_populated());
		assert_eq!(catalog.resolve(2001).unwrap().point, 100);
		assert!(catalog.resolve(9999).is_none());
	}

	#[test]
	fn free_view_excludes_paid_and_multi_point_gifts() {
		let mut catalog = GiftCatalog::new();
		catalog.replace(vec![
			gift(1, 1, true),
			// free flag but costs points: excluded
			gift(2, 10, true),
			// one point but not free: excluded
			gift(3, 1, false),
			gift(4, 500, false),
		]);

		let view = catalog.free_view();
		assert_eq!(view.len(), 1);
		assert!(view.resolve(1).is_some());
		assert!(view.resolve(2).is_none());
		assert!(view.resolve(3).is_none());
	}

	#[test]
	fn replace_is_wholesale() {
		let mut catalog = GiftCatalog::new();
		catalog.replace(vec![gift(1, 1, true)]);
		catalog.replace(vec![gift(2, 1, true)]);

		assert!(catalog.resolve(1).is_none());
		assert!(catalog.resolve(2).is_some());
	}
}
