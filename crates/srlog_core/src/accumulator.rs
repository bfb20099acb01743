#![forbid(unsafe_code)]

use core::cmp::Reverse;
use std::collections::HashSet;

use srlog_domain::{Keyed, LogKey, Timestamped};

/// Newest-first in-memory event log for one tracking session.
///
/// Events are only ever added; the set of `(created_at, name)` keys seen so
/// far lives alongside the events so that re-fetching an overlapping upstream
/// page is idempotent.
#[derive(Debug)]
pub struct Accumulator<T> {
	events: Vec<T>,
	seen: HashSet<LogKey>,
}

impl<T> Default for Accumulator<T> {
	fn default() -> Self {
		Self {
			events: Vec::new(),
			seen: HashSet::new(),
		}
	}
}

impl<T> Accumulator<T> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}

	pub fn events(&self) -> &[T] {
		&self.events
	}

	pub fn clear(&mut self) {
		self.events.clear();
		self.seen.clear();
	}

	/// Insert at the head without re-sorting; callers batch-inserting should
	/// call [`Accumulator::sort_newest_first`] once afterwards.
	pub fn push_front(&mut self, ev: T) {
		self.events.insert(0, ev);
	}
}

impl<T: Timestamped> Accumulator<T> {
	/// Stable sort, so same-timestamp events keep their insertion order.
	pub fn sort_newest_first(&mut self) {
		self.events.sort_by_key(|e| Reverse(e.created_at()));
	}
}

impl<T: Keyed> Accumulator<T> {
	/// Fold one fetched upstream page in, skipping entries whose key has
	/// been seen before. Returns how many entries were actually new.
	pub fn merge(&mut self, page: impl IntoIterator<Item = T>) -> usize {
		let mut added = 0;
		for ev in page {
			if self.seen.insert(ev.log_key()) {
				self.events.push(ev);
				added += 1;
			}
		}
		if added > 0 {
			self.sort_newest_first();
		}
		added
	}
}
