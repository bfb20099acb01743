#![forbid(unsafe_code)]

use core::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use srlog_domain::RoomId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, sleep, sleep_until};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, trace, warn};

use crate::client::BroadcastEndpoint;
use crate::new_session_id;
use crate::wire::{self, BroadcastGift, BroadcastPayload};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

type PushWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Receiver connection lifecycle, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
	Idle,
	Connecting,
	Subscribed,
	Receiving,
	Reconnecting,
	Stopped,
}

impl ReceiverState {
	pub const fn as_str(self) -> &'static str {
		match self {
			ReceiverState::Idle => "idle",
			ReceiverState::Connecting => "connecting",
			ReceiverState::Subscribed => "subscribed",
			ReceiverState::Receiving => "receiving",
			ReceiverState::Reconnecting => "reconnecting",
			ReceiverState::Stopped => "stopped",
		}
	}
}

impl fmt::Display for ReceiverState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One gift taken off the broadcast socket: the parsed struct plus the raw
/// payload text for collectors that persist the wire form.
#[derive(Debug, Clone)]
pub struct PushedGift {
	pub raw: String,
	pub gift: BroadcastGift,
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
	pub room_id: RoomId,
	pub endpoint: BroadcastEndpoint,
	pub queue_capacity: usize,
	pub reconnect_delay: Duration,
	pub ping_interval: Duration,
	pub pong_timeout: Duration,
}

impl ReceiverConfig {
	pub fn new(room_id: RoomId, endpoint: BroadcastEndpoint) -> Self {
		Self {
			room_id,
			endpoint,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			reconnect_delay: RECONNECT_DELAY,
			ping_interval: PING_INTERVAL,
			pong_timeout: PONG_TIMEOUT,
		}
	}
}

/// Handle to a spawned push receiver task.
pub struct PushReceiver {
	stop_tx: watch::Sender<bool>,
	task: Option<JoinHandle<()>>,
}

/// Spawn the receive loop for a room's broadcast endpoint. Gifts are
/// delivered on the returned bounded channel; the producer drops (and
/// counts) when the consumer falls behind rather than blocking the socket.
pub fn spawn(cfg: ReceiverConfig) -> (PushReceiver, mpsc::Receiver<PushedGift>) {
	let (gift_tx, gift_rx) = mpsc::channel(cfg.queue_capacity.max(1));
	let (stop_tx, stop_rx) = watch::channel(false);
	let task = tokio::spawn(run_loop(cfg, gift_tx, stop_rx));

	(
		PushReceiver {
			stop_tx,
			task: Some(task),
		},
		gift_rx,
	)
}

impl PushReceiver {
	/// Signal the receive loop to stop and wait for it to exit. Once this
	/// returns, nothing is enqueued anymore. Idempotent.
	pub async fn stop(&mut self) {
		let _ = self.stop_tx.send(true);
		if let Some(task) = self.task.take()
			&& let Err(e) = task.await
		{
			warn!(error = %e, "push receiver task join failed");
		}
	}
}

async fn run_loop(cfg: ReceiverConfig, gift_tx: mpsc::Sender<PushedGift>, mut stop_rx: watch::Receiver<bool>) {
	let room = cfg.room_id;
	let session_id = new_session_id();
	let url = format!("wss://{}:{}/", cfg.endpoint.host, cfg.endpoint.port);
	let mut state = ReceiverState::Idle;
	let mut first_attempt = true;

	info!(%room, session_id, host = %cfg.endpoint.host, "push receiver starting");

	loop {
		if *stop_rx.borrow() {
			break;
		}

		if !first_attempt {
			set_state(&mut state, ReceiverState::Reconnecting, room);
			metrics::counter!("srlog_receiver_reconnects_total").increment(1);
			tokio::select! {
				_ = stop_rx.changed() => break,
				_ = sleep(cfg.reconnect_delay) => {}
			}
		}
		first_attempt = false;

		set_state(&mut state, ReceiverState::Connecting, room);
		let mut ws: PushWs = tokio::select! {
			_ = stop_rx.changed() => break,
			conn = connect_async(url.as_str()) => match conn {
				Ok((ws, _resp)) => ws,
				Err(e) => {
					warn!(%room, session_id, error = %e, "broadcast connect failed");
					continue;
				}
			}
		};

		if let Err(e) = ws.send(Message::Text(wire::subscribe_frame(&cfg.endpoint.key).into())).await {
			warn!(%room, session_id, error = %e, "broadcast subscribe failed");
			continue;
		}
		set_state(&mut state, ReceiverState::Subscribed, room);

		let mut ping = tokio::time::interval(cfg.ping_interval);
		ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
		// the first tick of an interval completes immediately
		ping.tick().await;
		let mut pong_deadline: Option<Instant> = None;

		loop {
			tokio::select! {
				_ = stop_rx.changed() => {
					let _ = ws.close(None).await;
					set_state(&mut state, ReceiverState::Stopped, room);
					return;
				}

				_ = ping.tick() => {
					if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
						break;
					}
					if pong_deadline.is_none() {
						pong_deadline = Some(Instant::now() + cfg.pong_timeout);
					}
				}

				_ = async { sleep_until(pong_deadline.expect("guarded by is_some")) }, if pong_deadline.is_some() => {
					warn!(%room, session_id, "broadcast keepalive timed out");
					let _ = ws.close(None).await;
					break;
				}

				msg = ws.next() => {
					let Some(msg) = msg else {
						warn!(%room, session_id, "broadcast socket ended");
						break;
					};

					let msg = match msg {
						Ok(m) => m,
						Err(e) => {
							warn!(%room, session_id, error = %e, "broadcast read error");
							break;
						}
					};

					match msg {
						Message::Text(t) => {
							set_state(&mut state, ReceiverState::Receiving, room);
							handle_text(&t, room, &gift_tx);
						}
						Message::Ping(p) => {
							let _ = ws.send(Message::Pong(p)).await;
						}
						Message::Pong(_) => {
							pong_deadline = None;
						}
						Message::Close(frame) => {
							info!(%room, session_id, ?frame, "broadcast socket closed");
							break;
						}
						_ => {}
					}
				}
			}
		}
	}

	set_state(&mut state, ReceiverState::Stopped, room);
}

fn set_state(state: &mut ReceiverState, next: ReceiverState, room: RoomId) {
	if *state != next {
		debug!(%room, from = %*state, to = %next, "push receiver state");
		*state = next;
	}
}

fn handle_text(raw: &str, room: RoomId, gift_tx: &mpsc::Sender<PushedGift>) {
	let Some(payload) = wire::parse_frame(raw) else {
		trace!(%room, frame = raw, "non-message broadcast frame");
		return;
	};

	match wire::classify(payload) {
		Ok(BroadcastPayload::Gift(gift)) => {
			let pushed = PushedGift {
				raw: payload.to_string(),
				gift,
			};
			match gift_tx.try_send(pushed) {
				Ok(()) => {
					metrics::counter!("srlog_receiver_gifts_total").increment(1);
				}
				Err(TrySendError::Full(_)) => {
					metrics::counter!("srlog_receiver_gifts_dropped_total").increment(1);
					debug!(%room, "gift queue full; dropping pushed gift");
				}
				Err(TrySendError::Closed(_)) => {}
			}
		}
		Ok(BroadcastPayload::SystemText(text)) => {
			debug!(%room, text, "broadcast system message");
		}
		Ok(BroadcastPayload::Other(t)) => {
			trace!(%room, t, "ignoring broadcast message type");
		}
		Err(e) => {
			debug!(%room, error = %e, "unparseable broadcast payload");
		}
	}
}
