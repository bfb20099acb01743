#![forbid(unsafe_code)]

pub mod catalog;
pub mod client;
pub mod receiver;
pub mod wire;

pub use catalog::{FreeGiftView, GiftCatalog};
pub use client::{BroadcastEndpoint, DEFAULT_BASE_URL, FanUser, RoomFeed, RoomProfile, ShowroomClient};
pub use receiver::{PushReceiver, PushedGift, ReceiverConfig, ReceiverState};
pub use wire::{BroadcastGift, BroadcastPayload};

/// Random id correlating one receiver connection lifetime in logs.
pub fn new_session_id() -> String {
	uuid::Uuid::new_v4().to_string()
}
