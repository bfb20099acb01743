#![forbid(unsafe_code)]

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use srlog_domain::{CommentEvent, GiftCatalogEntry, PaidGiftEvent, RoomId};
use srlog_platform::{BroadcastEndpoint, RoomFeed};

/// Scripted upstream; tests mutate the fields between ticks.
#[derive(Default)]
pub struct StubFeed {
	pub live_rooms: Mutex<HashSet<u64>>,
	pub comments: Mutex<Vec<CommentEvent>>,
	pub paid_gifts: Mutex<Vec<PaidGiftEvent>>,
	pub gifts: Mutex<Vec<GiftCatalogEntry>>,
	pub endpoint: Mutex<Option<BroadcastEndpoint>>,
	pub fail_comments: Mutex<bool>,
	pub fail_onlives: Mutex<bool>,
	pub gift_list_calls: Mutex<usize>,
}

#[async_trait]
impl RoomFeed for StubFeed {
	async fn onlives(&self) -> anyhow::Result<HashSet<u64>> {
		if *self.fail_onlives.lock() {
			anyhow::bail!("onlives unavailable");
		}
		Ok(self.live_rooms.lock().clone())
	}

	async fn comment_log(&self, _room: RoomId) -> anyhow::Result<Vec<CommentEvent>> {
		if *self.fail_comments.lock() {
			anyhow::bail!("comment log unavailable");
		}
		Ok(self.comments.lock().clone())
	}

	async fn gift_log(&self, _room: RoomId) -> anyhow::Result<Vec<PaidGiftEvent>> {
		Ok(self.paid_gifts.lock().clone())
	}

	async fn gift_list(&self, _room: RoomId) -> anyhow::Result<Vec<GiftCatalogEntry>> {
		*self.gift_list_calls.lock() += 1;
		Ok(self.gifts.lock().clone())
	}

	async fn live_info(&self, _room: RoomId) -> anyhow::Result<Option<BroadcastEndpoint>> {
		Ok(self.endpoint.lock().clone())
	}
}

pub fn comment(created_at: i64, name: &str, body: &str) -> CommentEvent {
	CommentEvent {
		created_at,
		user_id: 7,
		name: name.to_string(),
		comment: body.to_string(),
		avatar_url: None,
	}
}

pub fn paid_gift(created_at: i64, name: &str, gift_id: u64) -> PaidGiftEvent {
	PaidGiftEvent {
		created_at,
		user_id: 7,
		name: name.to_string(),
		gift_id,
		num: 1,
		avatar_id: None,
		image: None,
	}
}

pub fn catalog_gift(gift_id: u64, point: u32, free: bool) -> GiftCatalogEntry {
	GiftCatalogEntry {
		gift_id,
		name: format!("gift-{gift_id}"),
		point,
		image: String::new(),
		free,
	}
}

pub fn endpoint() -> BroadcastEndpoint {
	BroadcastEndpoint {
		host: "broadcast.invalid".to_string(),
		key: "abc:def".to_string(),
		port: 443,
	}
}
