#![forbid(unsafe_code)]

use chrono::TimeZone;
use srlog_domain::{CommentEvent, FreeGiftEvent, PaidGiftEvent};
use srlog_platform::GiftCatalog;

use crate::snapshot::jst;

/// Snapshots are read by spreadsheet tools that sniff encoding, so every
/// file starts with a UTF-8 BOM.
const BOM: &str = "\u{feff}";

/// Comments whose sender or body contains any of these markers are service
/// chatter, not viewer speech, and are excluded from snapshots.
pub const SYSTEM_COMMENT_KEYWORDS: &[&str] = &[
	"SHOWROOM Management",
	"Earn weekly glittery rewards!",
	"ウィークリーグリッター特典獲得中！",
	"SHOWROOM運営",
];

fn format_jst(epoch_secs: i64) -> String {
	match jst().timestamp_opt(epoch_secs, 0).single() {
		Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
		None => String::new(),
	}
}

fn is_system_comment(ev: &CommentEvent) -> bool {
	SYSTEM_COMMENT_KEYWORDS
		.iter()
		.any(|kw| ev.name.contains(kw) || ev.comment.contains(kw))
}

fn escape(field: &str) -> String {
	if field.contains([',', '"', '\n', '\r']) {
		format!("\"{}\"", field.replace('"', "\"\""))
	} else {
		field.to_string()
	}
}

fn row(fields: &[&str]) -> String {
	let mut line = fields.iter().map(|f| escape(f)).collect::<Vec<_>>().join(",");
	line.push('\n');
	line
}

/// Serialize the comment accumulator, filtering out system chatter.
pub fn comment_csv(events: &[CommentEvent]) -> Vec<u8> {
	let mut out = String::from(BOM);
	out.push_str("time,name,comment,user_id\n");
	for ev in events.iter().filter(|ev| !is_system_comment(ev)) {
		out.push_str(&row(&[
			&format_jst(ev.created_at),
			&ev.name,
			&ev.comment,
			&ev.user_id.to_string(),
		]));
	}
	out.into_bytes()
}

/// Serialize the paid gift accumulator, annotating each row with the gift
/// name and point value from the catalog. Unresolvable gift ids fall back to
/// an empty name and zero points.
pub fn paid_gift_csv(events: &[PaidGiftEvent], catalog: &GiftCatalog) -> Vec<u8> {
	let mut out = String::from(BOM);
	out.push_str("time,name,gift_name,num,point,user_id\n");
	for ev in events {
		let entry = catalog.resolve(ev.gift_id);
		let gift_name = entry.map(|g| g.name.as_str()).unwrap_or_default();
		let point = entry.map(|g| g.point).unwrap_or(0);
		out.push_str(&row(&[
			&format_jst(ev.created_at),
			&ev.name,
			gift_name,
			&ev.num.to_string(),
			&point.to_string(),
			&ev.user_id.to_string(),
		]));
	}
	out.into_bytes()
}

/// Serialize the free gift accumulator; these rows were denormalized at
/// drain time and need no catalog.
pub fn free_gift_csv(events: &[FreeGiftEvent]) -> Vec<u8> {
	let mut out = String::from(BOM);
	out.push_str("time,name,gift_name,num,point,user_id\n");
	for ev in events {
		out.push_str(&row(&[
			&format_jst(ev.created_at),
			&ev.name,
			&ev.gift_name,
			&ev.num.to_string(),
			&ev.point.to_string(),
			&ev.user_id.to_string(),
		]));
	}
	out.into_bytes()
}

#[cfg(test)]
mod tests {
	use srlog_domain::GiftCatalogEntry;

	use super::*;

	fn comment(name: &str, body: &str) -> CommentEvent {
		CommentEvent {
			created_at: 1_700_000_000,
			user_id: 42,
			name: name.to_string(),
			comment: body.to_string(),
			avatar_url: None,
		}
	}

	#[test]
	fn comment_csv_has_bom_and_jst_times() {
		let bytes = comment_csv(&[comment("alice", "hello")]);
		let text = String::from_utf8(bytes).unwrap();

		assert!(text.starts_with("\u{feff}time,name,comment,user_id\n"));
		// 2023-11-14 22:13:20 UTC is 2023-11-15 07:13:20 JST
		assert!(text.contains("2023-11-15 07:13:20,alice,hello,42\n"));
	}

	#[test]
	fn system_comments_are_filtered_at_serialization() {
		let bytes = comment_csv(&[
			comment("alice", "hello"),
			comment("SHOWROOM運営", "announcement"),
			comment("bob", "Earn weekly glittery rewards!"),
		]);
		let text = String::from_utf8(bytes).unwrap();

		assert_eq!(text.lines().count(), 2);
		assert!(text.contains("alice"));
		assert!(!text.contains("announcement"));
	}

	#[test]
	fn fields_with_commas_and_quotes_are_escaped() {
		let bytes = comment_csv(&[comment("a\"b", "hi, there")]);
		let text = String::from_utf8(bytes).unwrap();
		assert!(text.contains("\"a\"\"b\",\"hi, there\""));
	}

	#[test]
	fn paid_rows_resolve_against_the_catalog() {
		let mut catalog = GiftCatalog::new();
		catalog.replace(vec![GiftCatalogEntry {
			gift_id: 2001,
			name: "Rocket".to_string(),
			point: 100,
			image: String::new(),
			free: false,
		}]);

		let known = PaidGiftEvent {
			created_at: 1_700_000_000,
			user_id: 42,
			name: "alice".to_string(),
			gift_id: 2001,
			num: 3,
			avatar_id: None,
			image: None,
		};
		let unknown = PaidGiftEvent { gift_id: 4040, ..known.clone() };

		let text = String::from_utf8(paid_gift_csv(&[known, unknown], &catalog)).unwrap();
		assert!(text.contains("alice,Rocket,3,100,42\n"));
		assert!(text.contains("alice,,3,0,42\n"));
	}
}
