#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Log streams tracked for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
	Comment,
	PaidGift,
	FreeGift,
}

impl LogKind {
	pub const ALL: [LogKind; 3] = [LogKind::Comment, LogKind::PaidGift, LogKind::FreeGift];

	/// Stable string identifier, used in snapshot filenames and metrics labels.
	pub const fn as_str(self) -> &'static str {
		match self {
			LogKind::Comment => "comment_log",
			LogKind::PaidGift => "gift_log",
			LogKind::FreeGift => "free_gift_log",
		}
	}
}

impl fmt::Display for LogKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid room id: {0}")]
	InvalidRoomId(String),
}

/// Numeric broadcast room identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(u64);

impl RoomId {
	pub const fn new(id: u64) -> Self {
		Self(id)
	}
	pub const fn as_u64(self) -> u64 {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		s.parse::<u64>().map(RoomId).map_err(|_| ParseIdError::InvalidRoomId(s.to_string()))
	}
}

/// Identity key for poll-log deduplication: `(created_at, name)`.
///
/// The upstream pages carry no per-entry id, so two entries with the same
/// timestamp and sender are treated as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogKey {
	pub created_at: i64,
	pub name: String,
}

/// Anything carrying an epoch-seconds creation timestamp.
pub trait Timestamped {
	fn created_at(&self) -> i64;
}

/// Events with a `(created_at, name)` identity used for merge deduplication.
pub trait Keyed: Timestamped {
	fn log_key(&self) -> LogKey;
}

/// A viewer comment from the poll-based comment log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentEvent {
	#[serde(default, deserialize_with = "lenient::i64_lenient")]
	pub created_at: i64,
	#[serde(default, deserialize_with = "lenient::u64_lenient")]
	pub user_id: u64,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub comment: String,
	#[serde(default)]
	pub avatar_url: Option<String>,
}

impl Timestamped for CommentEvent {
	fn created_at(&self) -> i64 {
		self.created_at
	}
}

impl Keyed for CommentEvent {
	fn log_key(&self) -> LogKey {
		LogKey {
			created_at: self.created_at,
			name: self.name.clone(),
		}
	}
}

/// A paid gift from the poll-based gift log. Carries only the gift id; the
/// name and point value are resolved against the catalog at serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaidGiftEvent {
	#[serde(default, deserialize_with = "lenient::i64_lenient")]
	pub created_at: i64,
	#[serde(default, deserialize_with = "lenient::u64_lenient")]
	pub user_id: u64,
	#[serde(default)]
	pub name: String,
	#[serde(default, deserialize_with = "lenient::u64_lenient")]
	pub gift_id: u64,
	#[serde(default = "lenient::one", deserialize_with = "lenient::u32_lenient")]
	pub num: u32,
	#[serde(default, deserialize_with = "lenient::opt_u64_lenient")]
	pub avatar_id: Option<u64>,
	#[serde(default)]
	pub image: Option<String>,
}

impl Timestamped for PaidGiftEvent {
	fn created_at(&self) -> i64 {
		self.created_at
	}
}

impl Keyed for PaidGiftEvent {
	fn log_key(&self) -> LogKey {
		LogKey {
			created_at: self.created_at,
			name: self.name.clone(),
		}
	}
}

/// A free gift normalized from a pushed broadcast message. Unlike the paid
/// log this is fully denormalized at enqueue-drain time, so it carries the
/// resolved gift name and point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeGiftEvent {
	pub created_at: i64,
	pub user_id: u64,
	pub name: String,
	pub avatar_id: Option<u64>,
	pub gift_id: u64,
	pub gift_name: String,
	pub point: u32,
	pub num: u32,
	pub image: String,
}

impl Timestamped for FreeGiftEvent {
	fn created_at(&self) -> i64 {
		self.created_at
	}
}

/// One gift definition from the room's gift list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCatalogEntry {
	#[serde(default, deserialize_with = "lenient::u64_lenient")]
	pub gift_id: u64,
	#[serde(default, rename = "gift_name")]
	pub name: String,
	#[serde(default, deserialize_with = "lenient::u32_lenient")]
	pub point: u32,
	#[serde(default)]
	pub image: String,
	#[serde(default)]
	pub free: bool,
}

/// Lenient numeric deserializers. The upstream API is inconsistent about
/// number vs string encoding for ids and counts; unparseable values fall
/// back to the field default instead of failing the whole page.
pub mod lenient {
	use serde::{Deserialize, Deserializer};

	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		U(u64),
		I(i64),
		F(f64),
		S(String),
		Other(serde::de::IgnoredAny),
	}

	impl Raw {
		fn as_i64(&self) -> Option<i64> {
			match self {
				Raw::U(v) => i64::try_from(*v).ok(),
				Raw::I(v) => Some(*v),
				Raw::F(v) => Some(*v as i64),
				Raw::S(s) => s.trim().parse().ok(),
				Raw::Other(_) => None,
			}
		}
	}

	pub const fn one() -> u32 {
		1
	}

	pub fn i64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
		Ok(Raw::deserialize(d)?.as_i64().unwrap_or(0))
	}

	pub fn u64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
		Ok(Raw::deserialize(d)?.as_i64().and_then(|v| u64::try_from(v).ok()).unwrap_or(0))
	}

	pub fn opt_i64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
		Ok(Option::<Raw>::deserialize(d)?.and_then(|r| r.as_i64()))
	}

	pub fn opt_u64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
		Ok(Option::<Raw>::deserialize(d)?
			.and_then(|r| r.as_i64())
			.and_then(|v| u64::try_from(v).ok()))
	}

	pub fn u32_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
		Ok(Raw::deserialize(d)?.as_i64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0))
	}
}
