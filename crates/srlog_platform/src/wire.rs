#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use srlog_domain::lenient;

/// Broadcast message frame prefix: `MSG\t<room>\t<json>`.
const MSG_PREFIX: &str = "MSG\t";

/// Gift message type.
const TYPE_GIFT: i64 = 2;
/// Free-form system text message type.
const TYPE_SYSTEM_TEXT: i64 = 18;

/// Subscription handshake sent right after connecting.
pub fn subscribe_frame(key: &str) -> String {
	format!("SUB\t{key}")
}

/// Extract the JSON payload of a `MSG\t<room>\t<json>` frame. Returns `None`
/// for every other frame (ACKs, pings, unknown verbs).
pub fn parse_frame(raw: &str) -> Option<&str> {
	let rest = raw.strip_prefix(MSG_PREFIX)?;
	let (_room, payload) = rest.split_once('\t')?;
	let payload = payload.trim();
	if payload.is_empty() { None } else { Some(payload) }
}

/// One gift pushed over the broadcast socket. Field names follow the wire
/// format's single-letter keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastGift {
	#[serde(default, rename = "created_at", deserialize_with = "lenient::opt_i64_lenient")]
	pub created_at: Option<i64>,
	#[serde(default, rename = "u", deserialize_with = "lenient::u64_lenient")]
	pub user_id: u64,
	#[serde(default, rename = "ac")]
	pub name: String,
	#[serde(default, rename = "av", deserialize_with = "lenient::opt_u64_lenient")]
	pub avatar_id: Option<u64>,
	#[serde(rename = "g", deserialize_with = "lenient::u64_lenient")]
	pub gift_id: u64,
	#[serde(default = "lenient::one", rename = "n", deserialize_with = "lenient::u32_lenient")]
	pub num: u32,
}

/// Classified broadcast payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastPayload {
	Gift(BroadcastGift),
	SystemText(String),
	/// Any other message type, by its `t` value.
	Other(i64),
}

/// Classify a broadcast JSON payload by its `t` field. `t` arrives as either
/// a number or a numeric string depending on the message type.
pub fn classify(payload: &str) -> anyhow::Result<BroadcastPayload> {
	let value: Value = serde_json::from_str(payload).context("parse broadcast payload")?;
	let t = message_type(&value).ok_or_else(|| anyhow!("broadcast payload without message type"))?;

	match t {
		TYPE_GIFT => {
			let gift: BroadcastGift = serde_json::from_value(value).context("parse gift payload")?;
			Ok(BroadcastPayload::Gift(gift))
		}
		TYPE_SYSTEM_TEXT => {
			let text = value.get("m").and_then(Value::as_str).unwrap_or_default();
			let text = repair_mojibake(text).unwrap_or_else(|| text.to_string());
			Ok(BroadcastPayload::SystemText(text))
		}
		other => Ok(BroadcastPayload::Other(other)),
	}
}

fn message_type(value: &Value) -> Option<i64> {
	match value.get("t")? {
		Value::Number(n) => n.as_i64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

/// System text arrives UTF-8 encoded but latin-1 decoded, so multibyte
/// characters show up as runs of U+0080..U+00FF. Re-encode each scalar as a
/// single byte and decode the result as UTF-8. Returns `None` when the text
/// is not shaped like that, in which case the original is already correct.
fn repair_mojibake(text: &str) -> Option<String> {
	let bytes: Vec<u8> = text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect::<Option<_>>()?;
	match String::from_utf8(bytes) {
		Ok(repaired) if repaired != text => Some(repaired),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_frame_accepts_only_msg_frames() {
		assert_eq!(parse_frame("MSG\t261582\t{\"t\":2}"), Some("{\"t\":2}"));
		assert_eq!(parse_frame("ACK\tabc"), None);
		assert_eq!(parse_frame("MSG\t261582\t"), None);
		assert_eq!(parse_frame("PING"), None);
	}

	#[test]
	fn classify_gift_with_string_type() {
		let payload = r#"{"t":"2","g":1001,"u":55,"ac":"alice","av":9,"n":3,"created_at":1700000000}"#;
		match classify(payload).unwrap() {
			BroadcastPayload::Gift(g) => {
				assert_eq!(g.gift_id, 1001);
				assert_eq!(g.user_id, 55);
				assert_eq!(g.name, "alice");
				assert_eq!(g.num, 3);
				assert_eq!(g.created_at, Some(1_700_000_000));
			}
			other => panic!("expected gift, got {other:?}"),
		}
	}

	#[test]
	fn classify_gift_defaults_num_to_one() {
		let payload = r#"{"t":2,"g":1001}"#;
		let BroadcastPayload::Gift(g) = classify(payload).unwrap() else {
			panic!("expected gift");
		};
		assert_eq!(g.num, 1);
		assert_eq!(g.created_at, None);
	}

	#[test]
	fn classify_repairs_latin1_system_text() {
		// "あ" (E3 81 82) latin-1 decoded into three scalars.
		let garbled = "\u{e3}\u{81}\u{82}";
		let payload = format!(r#"{{"t":18,"m":"{garbled}"}}"#);
		assert_eq!(classify(&payload).unwrap(), BroadcastPayload::SystemText("あ".to_string()));
	}

	#[test]
	fn classify_keeps_clean_system_text() {
		let payload = r#"{"t":18,"m":"event starts soon"}"#;
		assert_eq!(
			classify(payload).unwrap(),
			BroadcastPayload::SystemText("event starts soon".to_string())
		);
	}

	#[test]
	fn classify_other_and_errors() {
		assert_eq!(classify(r#"{"t":100}"#).unwrap(), BroadcastPayload::Other(100));
		assert!(classify("not json").is_err());
		assert!(classify(r#"{"no_type":true}"#).is_err());
	}
}
