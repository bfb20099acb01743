#![forbid(unsafe_code)]

use std::collections::HashMap;

use chrono::{FixedOffset, NaiveDateTime};
use srlog_domain::{LogKind, RoomId};

pub const DEFAULT_CHUNK: u64 = 100;

/// Decides when each log kind is due for a durable snapshot.
///
/// A kind is due once its accumulator count reaches the next chunk boundary
/// past the cursor, i.e. `ceil((cursor + 1) / chunk) * chunk`. After a flush
/// the cursor advances to the count rounded up to a boundary, so a burst
/// jumping several boundaries in one tick is flushed once and never replayed
/// on the following ticks.
#[derive(Debug)]
pub struct SnapshotScheduler {
	chunk: u64,
	cursors: HashMap<LogKind, u64>,
}

impl SnapshotScheduler {
	pub fn new(chunk: u64) -> Self {
		Self {
			chunk: chunk.max(1),
			cursors: HashMap::new(),
		}
	}

	pub fn cursor(&self, kind: LogKind) -> u64 {
		self.cursors.get(&kind).copied().unwrap_or(0)
	}

	fn next_threshold(&self, cursor: u64) -> u64 {
		(cursor + 1).div_ceil(self.chunk) * self.chunk
	}

	pub fn is_due(&self, kind: LogKind, count: usize) -> bool {
		count as u64 >= self.next_threshold(self.cursor(kind))
	}

	/// Advance the cursor after a flush attempt at `count` entries. Called
	/// whether or not the store succeeded; a failed store is not retried
	/// until the next boundary, which re-serializes the full accumulator.
	pub fn mark_flushed(&mut self, kind: LogKind, count: usize) {
		let cursor = (count as u64).div_ceil(self.chunk) * self.chunk;
		self.cursors.insert(kind, cursor);
	}

	pub fn reset(&mut self) {
		self.cursors.clear();
	}
}

impl Default for SnapshotScheduler {
	fn default() -> Self {
		Self::new(DEFAULT_CHUNK)
	}
}

/// Broadcast timestamps and snapshot filenames are rendered in JST
/// regardless of where the collector runs.
pub fn jst() -> FixedOffset {
	FixedOffset::east_opt(9 * 3600).expect("+09:00 is a valid offset")
}

/// Wall clock in JST, which is what snapshot filenames are keyed by.
pub fn jst_now() -> NaiveDateTime {
	chrono::Utc::now().with_timezone(&jst()).naive_local()
}

pub fn snapshot_filename(kind: LogKind, room: RoomId, now: NaiveDateTime) -> String {
	format!("{}_{}_{}.csv", kind.as_str(), room, now.format("%Y%m%d_%H%M%S"))
}
