#![forbid(unsafe_code)]

//! Raw broadcast capture: subscribes to a live room's push socket and
//! appends every gift frame, untouched, to a JSON-lines file. Useful for
//! replaying payloads against the parser offline.

use std::path::PathBuf;

use srlog_domain::RoomId;
use srlog_platform::receiver::{self, ReceiverConfig};
use srlog_platform::{DEFAULT_BASE_URL, ShowroomClient};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: srlog_collector <room_id> [--output path]\n\
\n\
Options:\n\
\t--output  Output file, appended to (default: free_gift_log_<room_id>.jsonl)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(1)
}

fn parse_args(mut it: impl Iterator<Item = String>) -> Result<(RoomId, Option<PathBuf>), String> {
	let mut room: Option<RoomId> = None;
	let mut output: Option<PathBuf> = None;

	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => return Err(String::new()),
			"--output" | "-o" => {
				let v = it.next().ok_or_else(|| "--output needs a value".to_string())?;
				if v.trim().is_empty() {
					return Err("--output must be non-empty".to_string());
				}
				output = Some(PathBuf::from(v));
			}
			other if room.is_none() => {
				room = Some(other.parse::<RoomId>().map_err(|e| e.to_string())?);
			}
			other => return Err(format!("Unknown argument: {other}")),
		}
	}

	let Some(room) = room else {
		return Err("Missing <room_id>".to_string());
	};

	Ok((room, output))
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,srlog_collector=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let (room, output) = match parse_args(std::env::args().skip(1)) {
		Ok(parsed) => parsed,
		Err(msg) => {
			if !msg.is_empty() {
				eprintln!("{msg}");
			}
			usage_and_exit();
		}
	};
	let output = output.unwrap_or_else(|| PathBuf::from(format!("free_gift_log_{room}.jsonl")));

	let base_url = std::env::var("SRLOG_API_BASE_URL")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
		.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
	let client = ShowroomClient::new(base_url)?;

	let Some(endpoint) = client.live_info(room).await? else {
		info!(%room, "room is not live; nothing to capture");
		return Ok(());
	};

	let mut file = tokio::fs::OpenOptions::new()
		.create(true)
		.append(true)
		.open(&output)
		.await?;

	info!(%room, host = %endpoint.host, out = %output.display(), "capturing gift frames");

	let (mut push_receiver, mut gift_rx) = receiver::spawn(ReceiverConfig::new(room, endpoint));
	let mut captured: u64 = 0;

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!(captured, "shutdown requested");
				break;
			}
			pushed = gift_rx.recv() => {
				let Some(pushed) = pushed else {
					warn!("push receiver closed its queue");
					break;
				};
				file.write_all(pushed.raw.as_bytes()).await?;
				file.write_all(b"\n").await?;
				captured += 1;
			}
		}
	}

	push_receiver.stop().await;
	file.flush().await?;
	info!(captured, out = %output.display(), "capture finished");

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(list: &[&str]) -> std::vec::IntoIter<String> {
		list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
	}

	#[test]
	fn missing_room_id_is_a_usage_error() {
		assert_eq!(parse_args(std::iter::empty()).unwrap_err(), "Missing <room_id>");
	}

	#[test]
	fn parses_room_id_and_output_override() {
		let (room, output) = parse_args(args(&["42", "--output", "frames.jsonl"])).unwrap();
		assert_eq!(room.to_string(), "42");
		assert_eq!(output, Some(PathBuf::from("frames.jsonl")));

		let (_, output) = parse_args(args(&["42"])).unwrap();
		assert_eq!(output, None);
	}

	#[test]
	fn rejects_garbage_room_ids_and_stray_arguments() {
		assert!(parse_args(args(&["not-a-room"])).is_err());
		assert!(parse_args(args(&["42", "7"])).is_err());
		assert!(parse_args(args(&["42", "--output"])).is_err());
	}
}
