#![forbid(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use srlog_core::{AccessPolicy, Session, SessionConfig, SessionDeps, StartError, TickOutcome};
use srlog_core::{DirSink, SnapshotSink};
use srlog_domain::RoomId;
use srlog_platform::{RoomFeed, ShowroomClient};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: srlog_tracker <room_id> [--config path]\n\
\n\
Options:\n\
\t--config  Config file path (default: ~/.srlog/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> (RoomId, Option<PathBuf>) {
	let mut room: Option<RoomId> = None;
	let mut config_path: Option<PathBuf> = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other if room.is_none() => {
				room = Some(other.parse::<RoomId>().unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				}));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let Some(room) = room else {
		eprintln!("Missing <room_id>");
		usage_and_exit();
	};

	(room, config_path)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,srlog_tracker=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

/// Turn the configured codes into a session policy, fetching the shared
/// room-list CSV when one is configured. The first column of that CSV
/// doubles as both the set of valid access codes and the set of room ids
/// an access code may track.
async fn build_policy(client: &ShowroomClient, cfg: &config::TrackerConfig) -> anyhow::Result<AccessPolicy> {
	if let (Some(access), Some(master)) = (cfg.access_code.as_deref(), cfg.master_code.as_deref())
		&& access == master
	{
		info!("master access code accepted; room allow list bypassed");
		return Ok(AccessPolicy::master());
	}

	let Some(url) = cfg.room_list_url.as_deref() else {
		warn!("no room_list_url configured; allowing any room");
		return Ok(AccessPolicy::master());
	};

	let codes = client.fetch_access_codes(url).await?;
	let Some(access) = cfg.access_code.as_deref() else {
		bail!("room_list_url is configured but no access_code is set");
	};
	if !codes.contains(access) {
		bail!("access code was not accepted");
	}

	info!(entries = codes.len(), "access code accepted");
	Ok(AccessPolicy::allow_list(codes))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let (room, config_override) = parse_args();

	let config_path = match config_override {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let cfg = crate::config::load_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded tracker config (toml + env overrides)");

	init_metrics(cfg.metrics_bind.as_deref());

	let client = ShowroomClient::new(&cfg.api_base_url)?;

	let policy = build_policy(&client, &cfg).await?;

	match client.room_profile(room).await {
		Ok(profile) => info!(%room, name = %profile.room_name, url_key = %profile.room_url_key, "tracking target"),
		Err(e) => debug!(%room, error = %e, "room profile lookup failed"),
	}

	let sink = DirSink::new(cfg.snapshot_dir.clone()).with_retention(cfg.retention);
	let deps = SessionDeps {
		feed: Arc::new(client.clone()) as Arc<dyn RoomFeed>,
		sink: Arc::new(sink) as Arc<dyn SnapshotSink>,
	};
	let session_cfg = SessionConfig {
		snapshot_chunk: cfg.snapshot_chunk,
		..SessionConfig::default()
	};

	let mut session = Session::new(deps, session_cfg);
	session.authenticate(policy);

	match session.start(room).await {
		Ok(()) => info!(%room, dir = %cfg.snapshot_dir.display(), "tracking started"),
		Err(StartError::RoomNotLive(room)) => {
			info!(%room, "room is not live; nothing to track");
			return Ok(());
		}
		Err(e) => return Err(e.into()),
	}

	let mut ticker = tokio::time::interval(cfg.poll_interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	ticker.tick().await;

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("shutdown requested; flushing pending logs");
				session.stop().await;
				break;
			}
			_ = ticker.tick() => {
				match session.tick().await {
					TickOutcome::StreamEnded => {
						info!(%room, "stream ended; final snapshots written");
						break;
					}
					TickOutcome::Tracking {
						comments_added,
						paid_gifts_added,
						free_gifts,
					} => {
						debug!(
							comments_added,
							paid_gifts_added,
							free_gifts_accepted = free_gifts.accepted,
							free_gifts_dropped = free_gifts.dropped,
							"tick complete"
						);
					}
					TickOutcome::NotTracking => break,
				}
			}
		}
	}

	Ok(())
}
