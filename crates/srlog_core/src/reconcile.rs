#![forbid(unsafe_code)]

use srlog_domain::{CommentEvent, PaidGiftEvent, RoomId};
use srlog_platform::RoomFeed;
use tracing::{debug, warn};

use crate::accumulator::Accumulator;

/// Fetch the room's latest comment page and fold it into the accumulator.
/// A failed fetch keeps the prior state untouched and counts as zero new
/// entries; the next tick simply tries again.
pub async fn reconcile_comments(feed: &dyn RoomFeed, room: RoomId, acc: &mut Accumulator<CommentEvent>) -> usize {
	match feed.comment_log(room).await {
		Ok(page) => {
			let added = acc.merge(page);
			if added > 0 {
				debug!(%room, added, total = acc.len(), "merged comment log page");
				metrics::counter!("srlog_comment_events_total").increment(added as u64);
			}
			added
		}
		Err(e) => {
			warn!(%room, error = %e, "comment log fetch failed; keeping prior state");
			metrics::counter!("srlog_reconcile_errors_total").increment(1);
			0
		}
	}
}

/// Same as [`reconcile_comments`] for the paid gift log.
pub async fn reconcile_paid_gifts(feed: &dyn RoomFeed, room: RoomId, acc: &mut Accumulator<PaidGiftEvent>) -> usize {
	match feed.gift_log(room).await {
		Ok(page) => {
			let added = acc.merge(page);
			if added > 0 {
				debug!(%room, added, total = acc.len(), "merged gift log page");
				metrics::counter!("srlog_paid_gift_events_total").increment(added as u64);
			}
			added
		}
		Err(e) => {
			warn!(%room, error = %e, "gift log fetch failed; keeping prior state");
			metrics::counter!("srlog_reconcile_errors_total").increment(1);
			0
		}
	}
}
