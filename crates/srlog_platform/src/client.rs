#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use srlog_domain::{CommentEvent, GiftCatalogEntry, PaidGiftEvent, RoomId, lenient};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://www.showroom-live.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The fan ranking is sorted by level; paging stops at the first entry
/// below this floor.
const FAN_LEVEL_FLOOR: u32 = 10;
const FAN_PAGE_SIZE: usize = 50;

/// Where a room's broadcast push socket lives, from the live-info lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEndpoint {
	pub host: String,
	pub key: String,
	pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RoomProfile {
	pub room_name: String,
	pub room_url_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanUser {
	#[serde(default, deserialize_with = "lenient::u64_lenient")]
	pub user_id: u64,
	#[serde(default, alias = "user_name")]
	pub name: String,
	#[serde(default, deserialize_with = "lenient::u32_lenient")]
	pub level: u32,
	#[serde(default, deserialize_with = "lenient::opt_u64_lenient")]
	pub avatar_id: Option<u64>,
}

/// Upstream reads needed by the reconciliation loop. Seam for tests; the
/// production implementation is [`ShowroomClient`].
#[async_trait]
pub trait RoomFeed: Send + Sync {
	async fn onlives(&self) -> anyhow::Result<HashSet<u64>>;
	async fn comment_log(&self, room: RoomId) -> anyhow::Result<Vec<CommentEvent>>;
	async fn gift_log(&self, room: RoomId) -> anyhow::Result<Vec<PaidGiftEvent>>;
	async fn gift_list(&self, room: RoomId) -> anyhow::Result<Vec<GiftCatalogEntry>>;
	async fn live_info(&self, room: RoomId) -> anyhow::Result<Option<BroadcastEndpoint>>;
}

#[derive(Debug, Clone)]
pub struct ShowroomClient {
	base_url: String,
	client: reqwest::Client,
}

impl ShowroomClient {
	pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
		let mut headers = HeaderMap::new();
		headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) srlog/0.1"));
		headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ja,en;q=0.8"));

		let client = reqwest::Client::builder()
			.default_headers(headers)
			.timeout(REQUEST_TIMEOUT)
			.build()
			.context("build http client")?;

		Ok(Self {
			base_url: base_url.into(),
			client,
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url.trim_end_matches('/'), path)
	}

	async fn get_json<T: DeserializeOwned>(&self, url: String, what: &'static str) -> anyhow::Result<T> {
		let resp = self.client.get(&url).send().await.context(what)?;
		if !resp.status().is_success() {
			return Err(anyhow!("{what} failed: status={}", resp.status()));
		}
		resp.json::<T>().await.with_context(|| format!("parse {what} response"))
	}

	/// Room ids of every currently live broadcast, flattened across the
	/// genre groups and the official/talent/amateur sections.
	pub async fn onlives(&self) -> anyhow::Result<HashSet<u64>> {
		let body: OnlivesResponse = self.get_json(self.url("/api/live/onlives"), "onlives").await?;
		Ok(body.live_room_ids())
	}

	pub async fn comment_log(&self, room: RoomId) -> anyhow::Result<Vec<CommentEvent>> {
		let url = self.url(&format!("/api/live/comment_log?room_id={room}"));
		let body: CommentLogResponse = self.get_json(url, "comment log").await?;
		Ok(body.comment_log)
	}

	pub async fn gift_log(&self, room: RoomId) -> anyhow::Result<Vec<PaidGiftEvent>> {
		let url = self.url(&format!("/api/live/gift_log?room_id={room}"));
		let body: GiftLogResponse = self.get_json(url, "gift log").await?;
		Ok(body.gift_log)
	}

	/// Full gift definitions for a room. The response groups gifts into
	/// category arrays, some of which nest the gifts one level deeper in a
	/// `list` array; both shapes are flattened here.
	pub async fn gift_list(&self, room: RoomId) -> anyhow::Result<Vec<GiftCatalogEntry>> {
		let url = self.url(&format!("/api/live/gift_list?room_id={room}"));
		let body: GiftListResponse = self.get_json(url, "gift list").await?;
		Ok(body.flatten())
	}

	/// Broadcast push endpoint for a room, or `None` when the room is not
	/// currently live.
	pub async fn live_info(&self, room: RoomId) -> anyhow::Result<Option<BroadcastEndpoint>> {
		let url = self.url(&format!("/api/live/live_info?room_id={room}"));
		let body: LiveInfoResponse = self.get_json(url, "live info").await?;
		Ok(body.endpoint())
	}

	pub async fn room_profile(&self, room: RoomId) -> anyhow::Result<RoomProfile> {
		let url = self.url(&format!("/api/room/profile?room_id={room}"));
		let body: RoomProfileResponse = self.get_json(url, "room profile").await?;
		Ok(RoomProfile {
			room_name: body.room_name,
			room_url_key: body.room_url_key,
		})
	}

	/// Active fan ranking for a month (`ym` is `yyyymm`), paged until the
	/// ranking runs out or drops below level 10. Also returns the total
	/// number of ranked fans as reported on the first page.
	pub async fn active_fans(&self, room: RoomId, ym: &str) -> anyhow::Result<(Vec<FanUser>, u64)> {
		let mut fans = Vec::new();
		let mut total_user_count = 0;
		let mut offset = 0;

		loop {
			let url = self.url(&format!(
				"/api/active_fan/users?room_id={room}&ym={ym}&offset={offset}&limit={FAN_PAGE_SIZE}"
			));
			let body: ActiveFanResponse = self.get_json(url, "active fan list").await?;
			if offset == 0 {
				total_user_count = body.total_user_count;
			}
			if body.users.is_empty() {
				break;
			}

			let page_len = body.users.len();
			if !take_until_floor(&mut fans, body.users) {
				break;
			}
			offset += page_len;
			if page_len < FAN_PAGE_SIZE {
				break;
			}
		}

		debug!(%room, count = fans.len(), total = total_user_count, "fetched active fan ranking");
		Ok((fans, total_user_count))
	}

	/// Access codes from an externally hosted CSV, first column per line.
	pub async fn fetch_access_codes(&self, url: &str) -> anyhow::Result<HashSet<String>> {
		let resp = self.client.get(url).send().await.context("access code list")?;
		if !resp.status().is_success() {
			return Err(anyhow!("access code list failed: status={}", resp.status()));
		}
		let text = resp.text().await.context("read access code list")?;

		Ok(text
			.lines()
			.filter_map(|line| line.split(',').next())
			.map(|code| code.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '\u{feff}').to_string())
			.filter(|code| !code.is_empty())
			.collect())
	}
}

#[async_trait]
impl RoomFeed for ShowroomClient {
	async fn onlives(&self) -> anyhow::Result<HashSet<u64>> {
		ShowroomClient::onlives(self).await
	}
	async fn comment_log(&self, room: RoomId) -> anyhow::Result<Vec<CommentEvent>> {
		ShowroomClient::comment_log(self, room).await
	}
	async fn gift_log(&self, room: RoomId) -> anyhow::Result<Vec<PaidGiftEvent>> {
		ShowroomClient::gift_log(self, room).await
	}
	async fn gift_list(&self, room: RoomId) -> anyhow::Result<Vec<GiftCatalogEntry>> {
		ShowroomClient::gift_list(self, room).await
	}
	async fn live_info(&self, room: RoomId) -> anyhow::Result<Option<BroadcastEndpoint>> {
		ShowroomClient::live_info(self, room).await
	}
}

#[derive(Debug, Default, Deserialize)]
struct OnlivesResponse {
	#[serde(default)]
	onlives: Vec<OnliveGenre>,
	#[serde(default)]
	official_lives: Vec<OnliveEntry>,
	#[serde(default)]
	talent_lives: Vec<OnliveEntry>,
	#[serde(default)]
	amateur_lives: Vec<OnliveEntry>,
}

impl OnlivesResponse {
	fn live_room_ids(&self) -> HashSet<u64> {
		self.onlives
			.iter()
			.flat_map(|g| g.lives.iter())
			.chain(self.official_lives.iter())
			.chain(self.talent_lives.iter())
			.chain(self.amateur_lives.iter())
			.filter_map(OnliveEntry::resolve_room_id)
			.collect()
	}
}

#[derive(Debug, Default, Deserialize)]
struct OnliveGenre {
	#[serde(default)]
	lives: Vec<OnliveEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct OnliveEntry {
	#[serde(default, deserialize_with = "lenient::opt_u64_lenient")]
	room_id: Option<u64>,
	#[serde(default)]
	live_info: Option<OnliveRoomRef>,
	#[serde(default)]
	room: Option<OnliveRoomRef>,
}

#[derive(Debug, Default, Deserialize)]
struct OnliveRoomRef {
	#[serde(default, deserialize_with = "lenient::opt_u64_lenient")]
	room_id: Option<u64>,
}

impl OnliveEntry {
	fn resolve_room_id(&self) -> Option<u64> {
		self.room_id
			.or_else(|| self.live_info.as_ref().and_then(|r| r.room_id))
			.or_else(|| self.room.as_ref().and_then(|r| r.room_id))
	}
}

#[derive(Debug, Deserialize)]
struct CommentLogResponse {
	#[serde(default)]
	comment_log: Vec<CommentEvent>,
}

#[derive(Debug, Deserialize)]
struct GiftLogResponse {
	#[serde(default)]
	gift_log: Vec<PaidGiftEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct GiftListResponse {
	sections: std::collections::BTreeMap<String, GiftListSection>,
}

impl GiftListResponse {
	fn flatten(self) -> Vec<GiftCatalogEntry> {
		let mut gifts = Vec::new();
		for section in self.sections.into_values() {
			let GiftListSection::Gifts(items) = section else { continue };
			for item in items {
				match item {
					GiftListItem::Group { list } => gifts.extend(list),
					GiftListItem::Gift(g) => gifts.push(g),
				}
			}
		}
		gifts.retain(|g| g.gift_id != 0);
		gifts
	}
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GiftListSection {
	Gifts(Vec<GiftListItem>),
	Other(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GiftListItem {
	Group { list: Vec<GiftCatalogEntry> },
	Gift(GiftCatalogEntry),
}

#[derive(Debug, Deserialize)]
struct LiveInfoResponse {
	#[serde(default)]
	bcsvr_host: Option<String>,
	#[serde(default)]
	bcsvr_key: Option<String>,
	#[serde(default, deserialize_with = "lenient::opt_u64_lenient")]
	bcsvr_port: Option<u64>,
}

impl LiveInfoResponse {
	fn endpoint(self) -> Option<BroadcastEndpoint> {
		let host = self.bcsvr_host.filter(|h| !h.is_empty())?;
		let key = self.bcsvr_key.filter(|k| !k.is_empty())?;
		let port = self.bcsvr_port.and_then(|p| u16::try_from(p).ok()).unwrap_or(443);
		Some(BroadcastEndpoint { host, key, port })
	}
}

#[derive(Debug, Deserialize)]
struct RoomProfileResponse {
	#[serde(default)]
	room_name: String,
	#[serde(default)]
	room_url_key: String,
}

#[derive(Debug, Deserialize)]
struct ActiveFanResponse {
	#[serde(default, deserialize_with = "lenient::u64_lenient")]
	total_user_count: u64,
	#[serde(default)]
	users: Vec<FanUser>,
}

/// Appends ranked users until the first one below the level floor.
/// Returns `false` once the floor is hit, so callers can stop paging.
fn take_until_floor(fans: &mut Vec<FanUser>, page: Vec<FanUser>) -> bool {
	for user in page {
		if user.level < FAN_LEVEL_FLOOR {
			return false;
		}
		fans.push(user);
	}
	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn onlives_flattens_all_sections() {
		let body: OnlivesResponse = serde_json::from_str(
			r#"{
				"onlives": [{"lives": [{"room_id": 1}, {"live_info": {"room_id": 2}}]}],
				"official_lives": [{"room": {"room_id": 3}}],
				"talent_lives": [{"room_id": "4"}],
				"amateur_lives": [{"no_id_here": true}]
			}"#,
		)
		.unwrap();
		let ids = body.live_room_ids();
		assert_eq!(ids, HashSet::from([1, 2, 3, 4]));
	}

	#[test]
	fn gift_list_flattens_flat_and_nested_categories() {
		let body: GiftListResponse = serde_json::from_str(
			r#"{
				"normal": [{"gift_id": 1, "gift_name": "Star", "point": 1, "free": true}],
				"special": [{"list": [{"gift_id": 2, "gift_name": "Rocket", "point": 100}]}],
				"enquete": {"not": "an array"}
			}"#,
		)
		.unwrap();
		let gifts = body.flatten();
		assert_eq!(gifts.len(), 2);
		assert!(gifts.iter().any(|g| g.gift_id == 1 && g.free));
		assert!(gifts.iter().any(|g| g.gift_id == 2 && g.point == 100));
	}

	#[test]
	fn live_info_requires_host_and_key() {
		let live: LiveInfoResponse =
			serde_json::from_str(r#"{"bcsvr_host":"online.showroom-live.com","bcsvr_key":"abc:def","bcsvr_port":443}"#).unwrap();
		let ep = live.endpoint().unwrap();
		assert_eq!(ep.host, "online.showroom-live.com");
		assert_eq!(ep.key, "abc:def");

		let offline: LiveInfoResponse = serde_json::from_str(r#"{"bcsvr_host":"","bcsvr_key":null}"#).unwrap();
		assert!(offline.endpoint().is_none());
	}

	#[test]
	fn fan_ranking_stops_at_the_first_user_below_the_floor() {
		let first_page: ActiveFanResponse = serde_json::from_str(
			r#"{
				"total_user_count": 120,
				"users": [
					{"user_id": 1, "name": "a", "level": 30},
					{"user_id": 2, "name": "b", "level": 10}
				]
			}"#,
		)
		.unwrap();
		assert_eq!(first_page.total_user_count, 120);

		let mut fans = Vec::new();
		assert!(take_until_floor(&mut fans, first_page.users));
		assert_eq!(fans.len(), 2);

		// A below-floor user ends the scan even when higher levels follow.
		let second_page: ActiveFanResponse = serde_json::from_str(
			r#"{"users": [
				{"user_id": 3, "name": "c", "level": 9},
				{"user_id": 4, "name": "d", "level": 25}
			]}"#,
		)
		.unwrap();
		assert_eq!(second_page.total_user_count, 0);
		assert!(!take_until_floor(&mut fans, second_page.users));
		let ids: Vec<u64> = fans.iter().map(|u| u.user_id).collect();
		assert_eq!(ids, vec![1, 2]);
	}
}
