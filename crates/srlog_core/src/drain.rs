#![forbid(unsafe_code)]

use srlog_domain::FreeGiftEvent;
use srlog_platform::{FreeGiftView, PushedGift};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

use crate::accumulator::Accumulator;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
	pub accepted: usize,
	pub dropped: usize,
}

/// Pull every pushed gift currently queued, normalize the ones the
/// restricted free-gift view recognizes and head-insert them newest-first.
///
/// Never awaits: the queue is emptied with `try_recv` so a tick can run this
/// inline. Gifts the view does not recognize are counted and dropped, not
/// placeholdered.
pub fn drain_free_gifts(
	rx: &mut mpsc::Receiver<PushedGift>,
	view: &FreeGiftView,
	acc: &mut Accumulator<FreeGiftEvent>,
	now: i64,
) -> DrainStats {
	let mut stats = DrainStats::default();

	loop {
		let pushed = match rx.try_recv() {
			Ok(p) => p,
			Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
		};

		let gift = pushed.gift;
		let Some(entry) = view.resolve(gift.gift_id) else {
			stats.dropped += 1;
			continue;
		};

		acc.push_front(FreeGiftEvent {
			created_at: gift.created_at.unwrap_or(now),
			user_id: gift.user_id,
			name: gift.name,
			avatar_id: gift.avatar_id,
			gift_id: gift.gift_id,
			gift_name: entry.name.clone(),
			point: entry.point,
			num: gift.num,
			image: entry.image.clone(),
		});
		stats.accepted += 1;
	}

	if stats.accepted > 0 {
		acc.sort_newest_first();
		metrics::counter!("srlog_free_gift_events_total").increment(stats.accepted as u64);
	}
	if stats.dropped > 0 {
		metrics::counter!("srlog_free_gifts_dropped_total").increment(stats.dropped as u64);
		debug!(dropped = stats.dropped, "dropped pushed gifts outside the free catalog");
	}

	stats
}

#[cfg(test)]
mod tests {
	use srlog_domain::GiftCatalogEntry;
	use srlog_platform::{BroadcastGift, GiftCatalog};

	use super::*;

	fn view() -> FreeGiftView {
		let mut catalog = GiftCatalog::new();
		catalog.replace(vec![
			GiftCatalogEntry {
				gift_id: 1001,
				name: "Star".to_string(),
				point: 1,
				image: "star.png".to_string(),
				free: true,
			},
			GiftCatalogEntry {
				gift_id: 2001,
				name: "Rocket".to_string(),
				point: 100,
				image: String::new(),
				free: false,
			},
		]);
		catalog.free_view()
	}

	fn pushed(gift_id: u64, created_at: Option<i64>) -> PushedGift {
		PushedGift {
			raw: String::new(),
			gift: BroadcastGift {
				created_at,
				user_id: 55,
				name: "alice".to_string(),
				avatar_id: Some(9),
				gift_id,
				num: 2,
			},
		}
	}

	#[tokio::test]
	async fn normalizes_known_free_gifts_and_drops_the_rest() {
		let (tx, mut rx) = mpsc::channel(8);
		tx.try_send(pushed(1001, Some(100))).unwrap();
		// paid gift id sneaking in over the push socket
		tx.try_send(pushed(2001, Some(101))).unwrap();
		// unknown id
		tx.try_send(pushed(9999, Some(102))).unwrap();

		let mut acc = Accumulator::new();
		let stats = drain_free_gifts(&mut rx, &view(), &mut acc, 500);

		assert_eq!(stats, DrainStats { accepted: 1, dropped: 2 });
		assert_eq!(acc.len(), 1);
		let ev = &acc.events()[0];
		assert_eq!(ev.gift_name, "Star");
		assert_eq!(ev.point, 1);
		assert_eq!(ev.num, 2);
		assert_eq!(ev.image, "star.png");
	}

	#[tokio::test]
	async fn missing_timestamp_uses_drain_time() {
		let (tx, mut rx) = mpsc::channel(8);
		tx.try_send(pushed(1001, None)).unwrap();

		let mut acc = Accumulator::new();
		drain_free_gifts(&mut rx, &view(), &mut acc, 1_700_000_000);

		assert_eq!(acc.events()[0].created_at, 1_700_000_000);
	}

	#[tokio::test]
	async fn drains_until_empty_and_sorts_newest_first() {
		let (tx, mut rx) = mpsc::channel(8);
		tx.try_send(pushed(1001, Some(300))).unwrap();
		tx.try_send(pushed(1001, Some(100))).unwrap();
		tx.try_send(pushed(1001, Some(200))).unwrap();

		let mut acc = Accumulator::new();
		let stats = drain_free_gifts(&mut rx, &view(), &mut acc, 0);

		assert_eq!(stats.accepted, 3);
		assert!(rx.try_recv().is_err());
		let order: Vec<i64> = acc.events().iter().map(|e| e.created_at).collect();
		assert_eq!(order, vec![300, 200, 100]);
	}

	#[tokio::test]
	async fn disconnected_queue_terminates_the_drain() {
		let (tx, mut rx) = mpsc::channel(8);
		tx.try_send(pushed(1001, Some(100))).unwrap();
		drop(tx);

		let mut acc = Accumulator::new();
		let stats = drain_free_gifts(&mut rx, &view(), &mut acc, 0);
		assert_eq!(stats.accepted, 1);
	}
}
