//! Field extraction from raw upstream payloads.
//!
//! Extraction is pure: no I/O, no clocks, same payload in, same record out.
//! Upstream markup and JSON have changed shape over the years, so every field
//! is resolved through an ordered list of [`Strategy`] functions, each of which
//! understands one historical shape. The first strategy that yields a value
//! wins; if none does, the field is left absent rather than failing the whole
//! extraction.
//!
//! An extractor returns `None` only when the payload is of the wrong kind or
//! nothing usable could be found at all. The caller treats that exactly like
//! a failed fetch and retries.

pub mod detail_page;
pub mod verification;
pub mod volume_list;

pub use detail_page::DetailPageExtractor;
pub use verification::VerificationExtractor;
pub use volume_list::VolumeListExtractor;

use crate::models::PartialRecord;
use crate::sources::RawPayload;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scraper::ElementRef;
use serde_json::Value;

/// Maps a raw payload onto a partial entity record.
pub trait FieldExtractor {
    fn extract(&self, payload: &RawPayload) -> Option<PartialRecord>;
}

/// One way of finding one field in a payload of type `P`.
pub type Strategy<P> = fn(&P) -> Option<Value>;

/// Try `strategies` in order and return the first value found.
pub fn first_match<P: ?Sized>(strategies: &[Strategy<P>], payload: &P) -> Option<Value> {
    strategies.iter().find_map(|strategy| strategy(payload))
}

/// Date spellings seen in listing text, in priority order.
static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(\d{4})\.\s*(\d{1,2})\.\s*(\d{1,2})",
        r"(\d{4})-(\d{1,2})-(\d{1,2})",
        r"(\d{4})년\s*(\d{1,2})월\s*(\d{1,2})일",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("date pattern is valid"))
    .collect()
});

/// `YYYY-MM-DD` from year/month/day capture groups 1..=3, if it is a real date.
pub(crate) fn ymd_from_captures(caps: &Captures<'_>) -> Option<String> {
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

/// First date found in free text, normalised to `YYYY-MM-DD`.
pub fn find_date_in_text(text: &str) -> Option<String> {
    DATE_PATTERNS
        .iter()
        .find_map(|re| re.captures(text).and_then(|caps| ymd_from_captures(&caps)))
}

/// Normalise an API date value (epoch millis, RFC 3339, or plain text) to
/// `YYYY-MM-DD` in UTC.
pub fn normalize_date(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64()?;
            DateTime::<Utc>::from_timestamp_millis(millis)
                .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc).format("%Y-%m-%d").to_string());
            }
            for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y.%m.%d %H:%M:%S"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(dt.format("%Y-%m-%d").to_string());
                }
            }
            find_date_in_text(s)
        }
        _ => None,
    }
}

/// Whitespace-normalised text content of an element.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A string field value, or `None` when empty.
pub(crate) fn non_empty(text: String) -> Option<Value> {
    let text = text.trim();
    (!text.is_empty()).then(|| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn never(_: &Value) -> Option<Value> {
        None
    }
    fn first(_: &Value) -> Option<Value> {
        Some(json!("first"))
    }
    fn second(_: &Value) -> Option<Value> {
        Some(json!("second"))
    }

    #[test]
    fn test_first_match_priority() {
        let payload = json!({});
        assert_eq!(first_match(&[never, first, second], &payload), Some(json!("first")));
        assert_eq!(first_match(&[second, first], &payload), Some(json!("second")));
        assert_eq!(first_match::<Value>(&[never], &payload), None);
        assert_eq!(first_match::<Value>(&[], &payload), None);
    }

    #[test]
    fn test_find_date_in_text_patterns() {
        assert_eq!(find_date_in_text("연재 2024. 1. 15"), Some("2024-01-15".into()));
        assert_eq!(find_date_in_text("since 2023-7-3"), Some("2023-07-03".into()));
        assert_eq!(find_date_in_text("2022년 12월 1일 시작"), Some("2022-12-01".into()));
        assert_eq!(find_date_in_text("no date here"), None);
    }

    #[test]
    fn test_find_date_rejects_impossible_dates() {
        assert_eq!(find_date_in_text("2024. 13. 40"), None);
    }

    #[test]
    fn test_normalize_date_variants() {
        assert_eq!(normalize_date(&json!("2021-03-04 12:00:00")), Some("2021-03-04".into()));
        assert_eq!(normalize_date(&json!("2021-03-04T23:30:00Z")), Some("2021-03-04".into()));
        assert_eq!(normalize_date(&json!("2021-03-05T01:00:00+09:00")), Some("2021-03-04".into()));
        assert_eq!(normalize_date(&json!("2021.03.04")), Some("2021-03-04".into()));
        assert_eq!(normalize_date(&json!(1_614_816_000_000_i64)), Some("2021-03-04".into()));
        assert_eq!(normalize_date(&json!(null)), None);
        assert_eq!(normalize_date(&json!("garbage")), None);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  ".to_string()), None);
        assert_eq!(non_empty(" x ".to_string()), Some(json!("x")));
    }
}
