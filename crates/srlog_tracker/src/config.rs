#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.srlog/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".srlog").join("config.toml"))
}

fn default_snapshot_dir() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".srlog").join("snapshots"))
}

/// Tracker config loaded from TOML plus `SRLOG_*` env overrides.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
	/// Platform API base URL.
	pub api_base_url: String,
	/// URL of the room-list CSV holding access codes and allowed room ids.
	pub room_list_url: Option<String>,
	/// Access code presented by the operator.
	pub access_code: Option<String>,
	/// Code that bypasses the room allow list entirely.
	pub master_code: Option<String>,
	/// Directory snapshots are written into.
	pub snapshot_dir: PathBuf,
	/// Snapshot chunk size (rows per flush boundary).
	pub snapshot_chunk: u64,
	/// Poll/tick interval.
	pub poll_interval: Duration,
	/// How long snapshot files are kept on disk.
	pub retention: Duration,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

/// Load the tracker config from TOML and env overrides.
pub fn load_config_from_path(path: &Path) -> anyhow::Result<TrackerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = TrackerConfig::from_file(file_cfg)?;

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	api_base_url: Option<String>,
	room_list_url: Option<String>,
	access_code: Option<String>,
	master_code: Option<String>,
	snapshot_dir: Option<String>,
	snapshot_chunk: Option<u64>,
	poll_interval_secs: Option<u64>,
	retention_hours: Option<u64>,
	metrics_bind: Option<String>,
}

impl TrackerConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let snapshot_dir = match file.snapshot_dir.filter(|s| !s.trim().is_empty()) {
			Some(dir) => PathBuf::from(dir),
			None => default_snapshot_dir()?,
		};

		Ok(Self {
			api_base_url: file
				.api_base_url
				.filter(|s| !s.trim().is_empty())
				.unwrap_or_else(|| srlog_platform::DEFAULT_BASE_URL.to_string()),
			room_list_url: file.room_list_url.filter(|s| !s.trim().is_empty()),
			access_code: file.access_code.filter(|s| !s.trim().is_empty()),
			master_code: file.master_code.filter(|s| !s.trim().is_empty()),
			snapshot_dir,
			snapshot_chunk: file.snapshot_chunk.filter(|c| *c > 0).unwrap_or(srlog_core::snapshot::DEFAULT_CHUNK),
			poll_interval: Duration::from_secs(file.poll_interval_secs.filter(|s| *s > 0).unwrap_or(10)),
			retention: file
				.retention_hours
				.filter(|h| *h > 0)
				.map(|h| Duration::from_secs(h * 3600))
				.unwrap_or(srlog_core::sink::DEFAULT_RETENTION),
			metrics_bind: file.metrics_bind.filter(|s| !s.trim().is_empty()),
		})
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut TrackerConfig) {
	if let Ok(v) = std::env::var("SRLOG_API_BASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.api_base_url = v;
			info!("tracker config: api_base_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("SRLOG_ROOM_LIST_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.room_list_url = Some(v);
			info!("tracker config: room_list_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("SRLOG_ACCESS_CODE") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.access_code = Some(v);
			info!("tracker config: access_code overridden by env");
		}
	}

	if let Ok(v) = std::env::var("SRLOG_MASTER_CODE") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.master_code = Some(v);
			info!("tracker config: master_code overridden by env");
		}
	}

	if let Ok(v) = std::env::var("SRLOG_SNAPSHOT_DIR") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.snapshot_dir = PathBuf::from(v);
			info!("tracker config: snapshot_dir overridden by env");
		}
	}

	if let Ok(v) = std::env::var("SRLOG_SNAPSHOT_CHUNK")
		&& let Ok(chunk) = v.trim().parse::<u64>()
		&& chunk > 0
	{
		cfg.snapshot_chunk = chunk;
		info!(chunk, "tracker config: snapshot_chunk overridden by env");
	}

	if let Ok(v) = std::env::var("SRLOG_POLL_INTERVAL_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.poll_interval = Duration::from_secs(secs);
		info!(secs, "tracker config: poll_interval overridden by env");
	}

	if let Ok(v) = std::env::var("SRLOG_RETENTION_HOURS")
		&& let Ok(hours) = v.trim().parse::<u64>()
		&& hours > 0
	{
		cfg.retention = Duration::from_secs(hours * 3600);
		info!(hours, "tracker config: retention overridden by env");
	}

	if let Ok(v) = std::env::var("SRLOG_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.metrics_bind = Some(v);
			info!("tracker config: metrics_bind overridden by env");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_yields_defaults() {
		let cfg = TrackerConfig::from_file(FileConfig::default()).unwrap();
		assert_eq!(cfg.api_base_url, srlog_platform::DEFAULT_BASE_URL);
		assert!(cfg.room_list_url.is_none());
		assert!(cfg.access_code.is_none());
		assert_eq!(cfg.snapshot_chunk, 100);
		assert_eq!(cfg.poll_interval, Duration::from_secs(10));
		assert_eq!(cfg.retention, Duration::from_secs(48 * 3600));
		assert!(cfg.metrics_bind.is_none());
	}

	#[test]
	fn toml_fields_are_picked_up() {
		let file: FileConfig = toml::from_str(
			r#"
			api_base_url = "https://stage.example"
			room_list_url = "https://example.com/room_list.csv"
			access_code = "abc123"
			snapshot_dir = "/tmp/srlog"
			snapshot_chunk = 50
			poll_interval_secs = 5
			retention_hours = 24
			metrics_bind = "127.0.0.1:9090"
			"#,
		)
		.unwrap();
		let cfg = TrackerConfig::from_file(file).unwrap();
		assert_eq!(cfg.api_base_url, "https://stage.example");
		assert_eq!(cfg.room_list_url.as_deref(), Some("https://example.com/room_list.csv"));
		assert_eq!(cfg.access_code.as_deref(), Some("abc123"));
		assert_eq!(cfg.snapshot_dir, PathBuf::from("/tmp/srlog"));
		assert_eq!(cfg.snapshot_chunk, 50);
		assert_eq!(cfg.poll_interval, Duration::from_secs(5));
		assert_eq!(cfg.retention, Duration::from_secs(24 * 3600));
		assert_eq!(cfg.metrics_bind.as_deref(), Some("127.0.0.1:9090"));
	}

	#[test]
	fn blank_strings_fall_back_to_defaults() {
		let file = FileConfig {
			api_base_url: Some("   ".to_string()),
			snapshot_chunk: Some(0),
			poll_interval_secs: Some(0),
			..FileConfig::default()
		};
		let cfg = TrackerConfig::from_file(file).unwrap();
		assert_eq!(cfg.api_base_url, srlog_platform::DEFAULT_BASE_URL);
		assert_eq!(cfg.snapshot_chunk, 100);
		assert_eq!(cfg.poll_interval, Duration::from_secs(10));
	}

	#[test]
	fn reading_a_missing_file_is_not_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("config.toml");
		assert!(read_toml_if_exists(&missing).unwrap().is_none());
	}
}
