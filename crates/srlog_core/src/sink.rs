#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Destination for finished CSV snapshots.
///
/// `store` must be atomic from the caller's point of view: either the whole
/// snapshot lands under `filename` or an error comes back. Callers never
/// retry a failed store; the next threshold crossing re-serializes the full
/// accumulator anyway.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
	async fn store(&self, filename: &str, content: &[u8]) -> anyhow::Result<()>;
}

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(48 * 3600);

/// Filesystem sink. Every store also prunes sibling snapshots older than the
/// retention window, judged by the `_yyyymmdd_HHMMSS` tail of the filename
/// rather than filesystem mtimes.
pub struct DirSink {
	dir: PathBuf,
	retention: Duration,
}

impl DirSink {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self {
			dir: dir.into(),
			retention: DEFAULT_RETENTION,
		}
	}

	pub fn with_retention(mut self, retention: Duration) -> Self {
		self.retention = retention;
		self
	}

	async fn prune_expired(&self, now: NaiveDateTime) {
		let Ok(retention) = chrono::Duration::from_std(self.retention) else {
			return;
		};

		let mut entries = match tokio::fs::read_dir(&self.dir).await {
			Ok(entries) => entries,
			Err(e) => {
				warn!(dir = %self.dir.display(), error = %e, "snapshot retention scan failed");
				return;
			}
		};

		loop {
			let entry = match entries.next_entry().await {
				Ok(Some(entry)) => entry,
				Ok(None) => break,
				Err(e) => {
					warn!(dir = %self.dir.display(), error = %e, "snapshot retention scan failed");
					break;
				}
			};

			let path = entry.path();
			let Some(stamp) = path.file_name().and_then(|n| n.to_str()).and_then(parse_snapshot_timestamp) else {
				continue;
			};
			if now.signed_duration_since(stamp) > retention {
				match tokio::fs::remove_file(&path).await {
					Ok(()) => debug!(file = %path.display(), "pruned expired snapshot"),
					Err(e) => warn!(file = %path.display(), error = %e, "failed to prune expired snapshot"),
				}
			}
		}
	}
}

#[async_trait]
impl SnapshotSink for DirSink {
	async fn store(&self, filename: &str, content: &[u8]) -> anyhow::Result<()> {
		tokio::fs::create_dir_all(&self.dir)
			.await
			.with_context(|| format!("create snapshot dir {}", self.dir.display()))?;

		let path = self.dir.join(filename);
		tokio::fs::write(&path, content)
			.await
			.with_context(|| format!("write snapshot {}", path.display()))?;
		debug!(file = %path.display(), bytes = content.len(), "stored snapshot");

		// retention is best-effort and never fails the store
		self.prune_expired(crate::snapshot::jst_now()).await;
		Ok(())
	}
}

/// Parse the trailing `_yyyymmdd_HHMMSS.csv` timestamp out of a snapshot
/// filename. Files that do not follow the naming scheme are left alone.
pub fn parse_snapshot_timestamp(filename: &str) -> Option<NaiveDateTime> {
	let stem = filename.strip_suffix(".csv")?;
	let mut parts = stem.rsplitn(3, '_');
	let time = parts.next()?;
	let date = parts.next()?;
	NaiveDateTime::parse_from_str(&format!("{date}_{time}"), "%Y%m%d_%H%M%S").ok()
}

/// Records stores in memory. For tests.
#[derive(Default)]
pub struct MemorySink {
	stored: Mutex<Vec<(String, Vec<u8>)>>,
	pub fail_stores: Mutex<bool>,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn stored(&self) -> Vec<(String, Vec<u8>)> {
		self.stored.lock().clone()
	}

	pub fn store_count(&self) -> usize {
		self.stored.lock().len()
	}

	pub fn count_with_prefix(&self, prefix: &str) -> usize {
		self.stored.lock().iter().filter(|(name, _)| name.starts_with(prefix)).count()
	}
}

#[async_trait]
impl SnapshotSink for MemorySink {
	async fn store(&self, filename: &str, content: &[u8]) -> anyhow::Result<()> {
		if *self.fail_stores.lock() {
			anyhow::bail!("sink unavailable");
		}
		self.stored.lock().push((filename.to_string(), content.to_vec()));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_trailing_timestamp() {
		let ts = parse_snapshot_timestamp("comment_log_261582_20260829_101500.csv").unwrap();
		assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-08-29 10:15:00");

		// room ids with underscores don't confuse the tail parse
		assert!(parse_snapshot_timestamp("free_gift_log_1_20260829_101500.csv").is_some());

		assert!(parse_snapshot_timestamp("notes.txt").is_none());
		assert!(parse_snapshot_timestamp("comment_log_261582.csv").is_none());
		assert!(parse_snapshot_timestamp("comment_log_261582_2026_abc.csv").is_none());
	}

	#[tokio::test]
	async fn dir_sink_stores_and_prunes_expired_snapshots() {
		let dir = tempfile::tempdir().unwrap();
		let sink = DirSink::new(dir.path()).with_retention(Duration::from_secs(48 * 3600));

		let old = dir.path().join("comment_log_1_20200101_000000.csv");
		tokio::fs::write(&old, b"stale").await.unwrap();
		let unrelated = dir.path().join("keep.txt");
		tokio::fs::write(&unrelated, b"keep").await.unwrap();

		sink.store("comment_log_1_20991231_235959.csv", b"fresh").await.unwrap();

		assert!(!old.exists());
		assert!(unrelated.exists());
		assert!(dir.path().join("comment_log_1_20991231_235959.csv").exists());
	}
}
