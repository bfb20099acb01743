#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use srlog_domain::{CommentEvent, FreeGiftEvent, LogKind, PaidGiftEvent, RoomId};
use srlog_platform::receiver::{self, DEFAULT_QUEUE_CAPACITY, PushReceiver, PushedGift, ReceiverConfig};
use srlog_platform::{FreeGiftView, GiftCatalog, RoomFeed};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::accumulator::Accumulator;
use crate::csv;
use crate::drain::{self, DrainStats};
use crate::reconcile;
use crate::sink::SnapshotSink;
use crate::snapshot::{self, SnapshotScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Unauthenticated,
	Idle,
	Tracking,
}

/// Which rooms a session may track. The allow-list doubles as the set of
/// valid access codes; the master credential bypasses it entirely.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
	allowed: HashSet<String>,
	master: bool,
}

impl AccessPolicy {
	pub fn allow_list(allowed: HashSet<String>) -> Self {
		Self { allowed, master: false }
	}

	pub fn master() -> Self {
		Self {
			allowed: HashSet::new(),
			master: true,
		}
	}

	pub fn is_master(&self) -> bool {
		self.master
	}

	pub fn permits(&self, room: RoomId) -> bool {
		self.master || self.allowed.contains(room.to_string().as_str())
	}
}

#[derive(Debug, Error)]
pub enum StartError {
	#[error("not authenticated")]
	NotAuthenticated,
	#[error("room {0} is not on the allow-list")]
	RoomNotAllowed(RoomId),
	#[error("room {0} is not currently live")]
	RoomNotLive(RoomId),
	#[error(transparent)]
	Upstream(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
	NotTracking,
	/// The room left the live set; everything was flushed and the session
	/// is back to `Idle`.
	StreamEnded,
	Tracking {
		comments_added: usize,
		paid_gifts_added: usize,
		free_gifts: DrainStats,
	},
}

pub struct SessionDeps {
	pub feed: Arc<dyn RoomFeed>,
	pub sink: Arc<dyn SnapshotSink>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
	pub snapshot_chunk: u64,
	pub queue_capacity: usize,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			snapshot_chunk: snapshot::DEFAULT_CHUNK,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
		}
	}
}

/// Owns everything belonging to one tracking session: the three
/// accumulators, the gift catalog, the snapshot cursors and the push
/// receiver. All of it is reset when a room is (re)started and torn down
/// with a final flush when tracking ends.
pub struct Session {
	deps: SessionDeps,
	cfg: SessionConfig,
	state: SessionState,
	policy: Option<AccessPolicy>,
	room: Option<RoomId>,
	comments: Accumulator<CommentEvent>,
	paid_gifts: Accumulator<PaidGiftEvent>,
	free_gifts: Accumulator<FreeGiftEvent>,
	catalog: GiftCatalog,
	free_view: FreeGiftView,
	scheduler: SnapshotScheduler,
	receiver: Option<PushReceiver>,
	gift_rx: Option<mpsc::Receiver<PushedGift>>,
	/// Paid gift ids that already got their one forced catalog refresh.
	refreshed_misses: HashSet<u64>,
}

impl Session {
	pub fn new(deps: SessionDeps, cfg: SessionConfig) -> Self {
		let scheduler = SnapshotScheduler::new(cfg.snapshot_chunk);
		Self {
			deps,
			cfg,
			state: SessionState::Unauthenticated,
			policy: None,
			room: None,
			comments: Accumulator::new(),
			paid_gifts: Accumulator::new(),
			free_gifts: Accumulator::new(),
			catalog: GiftCatalog::new(),
			free_view: FreeGiftView::default(),
			scheduler,
			receiver: None,
			gift_rx: None,
			refreshed_misses: HashSet::new(),
		}
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn room(&self) -> Option<RoomId> {
		self.room
	}

	pub fn count(&self, kind: LogKind) -> usize {
		match kind {
			LogKind::Comment => self.comments.len(),
			LogKind::PaidGift => self.paid_gifts.len(),
			LogKind::FreeGift => self.free_gifts.len(),
		}
	}

	/// Install the access policy; an unauthenticated session becomes `Idle`.
	pub fn authenticate(&mut self, policy: AccessPolicy) {
		self.policy = Some(policy);
		if self.state == SessionState::Unauthenticated {
			self.state = SessionState::Idle;
		}
	}

	/// Begin tracking a room. Validation happens before anything is touched:
	/// a refused start leaves a running session exactly as it was.
	pub async fn start(&mut self, room: RoomId) -> Result<(), StartError> {
		let Some(policy) = &self.policy else {
			return Err(StartError::NotAuthenticated);
		};
		if !policy.permits(room) {
			return Err(StartError::RoomNotAllowed(room));
		}

		let endpoint = match self.deps.feed.live_info(room).await {
			Ok(Some(ep)) => ep,
			Ok(None) => return Err(StartError::RoomNotLive(room)),
			Err(e) => return Err(StartError::Upstream(e)),
		};

		if self.state == SessionState::Tracking {
			info!(prior_room = ?self.room, %room, "replacing running session");
			self.force_flush_all().await;
			self.stop_receiver().await;
		}

		self.comments.clear();
		self.paid_gifts.clear();
		self.free_gifts.clear();
		self.catalog = GiftCatalog::new();
		self.free_view = FreeGiftView::default();
		self.scheduler.reset();
		self.refreshed_misses.clear();
		self.room = Some(room);

		match self.catalog.refresh(self.deps.feed.as_ref(), room, false).await {
			Ok(()) => self.free_view = self.catalog.free_view(),
			Err(e) => warn!(%room, error = %e, "initial gift catalog fetch failed; retrying on tick"),
		}

		let mut rcfg = ReceiverConfig::new(room, endpoint);
		rcfg.queue_capacity = self.cfg.queue_capacity;
		let (push_receiver, gift_rx) = receiver::spawn(rcfg);
		self.receiver = Some(push_receiver);
		self.gift_rx = Some(gift_rx);

		self.state = SessionState::Tracking;
		info!(%room, "tracking started");
		Ok(())
	}

	/// One reconciliation pass: liveness gate, poll merges, catalog upkeep,
	/// free-gift drain, then any due snapshots.
	pub async fn tick(&mut self) -> TickOutcome {
		let (SessionState::Tracking, Some(room)) = (self.state, self.room) else {
			return TickOutcome::NotTracking;
		};

		match self.deps.feed.onlives().await {
			Ok(live) if !live.contains(&room.as_u64()) => {
				info!(%room, "stream left the live set; storing final snapshots");
				self.force_flush_all().await;
				self.stop_receiver().await;
				self.state = SessionState::Idle;
				return TickOutcome::StreamEnded;
			}
			Ok(_) => {}
			// a failed liveness probe is not evidence the stream ended
			Err(e) => warn!(%room, error = %e, "liveness check failed; continuing to track"),
		}

		let comments_added = reconcile::reconcile_comments(self.deps.feed.as_ref(), room, &mut self.comments).await;
		let paid_gifts_added = reconcile::reconcile_paid_gifts(self.deps.feed.as_ref(), room, &mut self.paid_gifts).await;

		self.ensure_catalog(room).await;

		let free_gifts = match self.gift_rx.as_mut() {
			Some(rx) => drain::drain_free_gifts(rx, &self.free_view, &mut self.free_gifts, chrono::Utc::now().timestamp()),
			None => DrainStats::default(),
		};

		for kind in LogKind::ALL {
			if self.scheduler.is_due(kind, self.count(kind)) {
				self.flush(kind).await;
			}
		}

		TickOutcome::Tracking {
			comments_added,
			paid_gifts_added,
			free_gifts,
		}
	}

	/// Final flush, receiver teardown, back to `Idle`. Idempotent.
	pub async fn stop(&mut self) {
		if self.state == SessionState::Tracking {
			info!(room = ?self.room, "stopping tracking; storing final snapshots");
			self.force_flush_all().await;
		}
		self.stop_receiver().await;
		if self.state != SessionState::Unauthenticated {
			self.state = SessionState::Idle;
		}
	}

	async fn ensure_catalog(&mut self, room: RoomId) {
		if !self.catalog.is_populated() {
			match self.catalog.refresh(self.deps.feed.as_ref(), room, false).await {
				Ok(()) => self.free_view = self.catalog.free_view(),
				Err(e) => warn!(%room, error = %e, "gift catalog fetch failed"),
			}
		}

		// an unknown paid gift id forces one extra refresh; if it is still
		// unknown afterwards the CSV falls back to a placeholder row
		let unresolved: Vec<u64> = self
			.paid_gifts
			.events()
			.iter()
			.map(|ev| ev.gift_id)
			.filter(|id| *id != 0 && self.catalog.resolve(*id).is_none() && !self.refreshed_misses.contains(id))
			.collect();
		if unresolved.is_empty() {
			return;
		}

		info!(%room, ids = ?unresolved, "unknown paid gift ids; forcing catalog refresh");
		match self.catalog.refresh(self.deps.feed.as_ref(), room, true).await {
			Ok(()) => self.free_view = self.catalog.free_view(),
			Err(e) => warn!(%room, error = %e, "forced gift catalog refresh failed"),
		}
		self.refreshed_misses.extend(unresolved);
	}

	async fn force_flush_all(&mut self) {
		for kind in LogKind::ALL {
			self.flush(kind).await;
		}
	}

	/// Serialize and store one accumulator. Empty accumulators are skipped;
	/// store failures advance the cursor anyway and are reported, never
	/// retried within the tick.
	async fn flush(&mut self, kind: LogKind) {
		let count = self.count(kind);
		if count == 0 {
			return;
		}
		let Some(room) = self.room else {
			return;
		};

		let bytes = match kind {
			LogKind::Comment => csv::comment_csv(self.comments.events()),
			LogKind::PaidGift => csv::paid_gift_csv(self.paid_gifts.events(), &self.catalog),
			LogKind::FreeGift => csv::free_gift_csv(self.free_gifts.events()),
		};
		let filename = snapshot::snapshot_filename(kind, room, snapshot::jst_now());

		match self.deps.sink.store(&filename, &bytes).await {
			Ok(()) => {
				info!(%room, kind = %kind, file = %filename, rows = count, "stored snapshot");
				metrics::counter!("srlog_snapshots_total").increment(1);
			}
			Err(e) => {
				warn!(%room, kind = %kind, file = %filename, error = %e, "snapshot store failed");
				metrics::counter!("srlog_snapshot_errors_total").increment(1);
			}
		}

		self.scheduler.mark_flushed(kind, count);
	}

	async fn stop_receiver(&mut self) {
		if let Some(mut push_receiver) = self.receiver.take() {
			push_receiver.stop().await;
		}
		self.gift_rx = None;
	}
}
