//! Completion-status verification against the series detail page.
//!
//! Only the two terminal tokens `완결` / `연재중` count as a verified status.
//! Title, author, genre and the highest `N화` episode number are recorded
//! alongside for later cross-checking, but a page that yields only those is
//! still a failed verification.

use super::{FieldExtractor, Strategy, element_text, first_match, non_empty};
use crate::config::FieldNames;
use crate::models::{PartialRecord, SerialStatus};
use crate::sources::RawPayload;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node, Selector};
use serde_json::Value;

pub const TITLE_FIELD: &str = "htmlTitle";
pub const AUTHOR_FIELD: &str = "htmlAuthor";
pub const GENRE_FIELD: &str = "htmlGenre";
pub const EPISODE_COUNT_FIELD: &str = "htmlEpisodeCount";

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("valid selector")
}

static INFO_LIST_SPANS: Lazy<Selector> = Lazy::new(|| selector("li.info_lst span"));
static GENERIC_TEXT: Lazy<Selector> = Lazy::new(|| selector("span, div, li"));
static STATUS_HINTS: Lazy<Selector> =
    Lazy::new(|| selector(r#"[class*="complete"], [class*="ongoing"], [data-status]"#));
static LD_JSON: Lazy<Selector> = Lazy::new(|| selector(r#"script[type="application/ld+json"]"#));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("h1, .title, .work_title"));
static AUTHOR: Lazy<Selector> = Lazy::new(|| selector(".author, .writer"));
static GENRE: Lazy<Selector> = Lazy::new(|| selector(r#"li.info_lst a[href*="genreCode"]"#));
static EPISODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)화").expect("valid pattern"));

const STATUS_STRATEGIES: &[Strategy<Html>] = &[
    status_from_info_list,
    status_from_any_text,
    status_from_hints,
    status_from_structured_data,
];

/// Exact match against the terminal vocabulary.
fn terminal_token(text: &str) -> Option<SerialStatus> {
    SerialStatus::from_token(text)
        .filter(|s| matches!(s, SerialStatus::Completed | SerialStatus::Ongoing))
}

fn status_from_info_list(doc: &Html) -> Option<Value> {
    doc.select(&INFO_LIST_SPANS)
        .find_map(|el| terminal_token(&element_text(el)))
        .map(|s| s.label().into())
}

fn status_from_any_text(doc: &Html) -> Option<Value> {
    doc.select(&GENERIC_TEXT)
        .find_map(|el| terminal_token(&element_text(el)))
        .map(|s| s.label().into())
}

fn status_from_hints(doc: &Html) -> Option<Value> {
    doc.select(&STATUS_HINTS)
        .find_map(|el| {
            let class = el.value().attr("class").unwrap_or_default();
            let data_status = el.value().attr("data-status").unwrap_or_default();
            let text = element_text(el);
            if class.contains("complete") || data_status.contains("complete") || text.contains("완결") {
                Some(SerialStatus::Completed)
            } else if class.contains("ongoing") || data_status.contains("ongoing") || text.contains("연재") {
                Some(SerialStatus::Ongoing)
            } else {
                None
            }
        })
        .map(|s| s.label().into())
}

fn status_from_structured_data(doc: &Html) -> Option<Value> {
    doc.select(&LD_JSON)
        .find_map(|script| {
            let raw = script.text().collect::<String>();
            let data: Value = serde_json::from_str(&raw).ok()?;
            let work_status = data.get("workStatus")?.as_str()?;
            Some(SerialStatus::from_terminated(work_status == "completed"))
        })
        .map(|s| s.label().into())
}

fn first_text(doc: &Html, selector: &Selector) -> Option<Value> {
    doc.select(selector).next().map(element_text).and_then(non_empty)
}

/// Highest `N화` number found in any text node.
fn max_episode(doc: &Html) -> Option<Value> {
    doc.tree
        .values()
        .filter_map(|node| match node {
            Node::Text(text) => Some(&**text),
            _ => None,
        })
        .flat_map(|text| EPISODE.captures_iter(text))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .max()
        .map(Value::from)
}

#[derive(Debug, Clone)]
pub struct VerificationExtractor {
    status_field: String,
}

impl VerificationExtractor {
    pub fn new(fields: &FieldNames) -> Self {
        Self {
            status_field: fields.completion_status.clone(),
        }
    }
}

impl FieldExtractor for VerificationExtractor {
    fn extract(&self, payload: &RawPayload) -> Option<PartialRecord> {
        let RawPayload::Html(html) = payload else {
            return None;
        };
        let doc = Html::parse_document(html);
        let status = first_match(STATUS_STRATEGIES, &doc)?;

        Some(
            PartialRecord::new()
                .with(&self.status_field, Some(status))
                .with(TITLE_FIELD, first_text(&doc, &TITLE))
                .with(AUTHOR_FIELD, first_text(&doc, &AUTHOR))
                .with(GENRE_FIELD, first_text(&doc, &GENRE))
                .with(EPISODE_COUNT_FIELD, max_episode(&doc)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(html: &str) -> Option<PartialRecord> {
        VerificationExtractor::new(&FieldNames::default()).extract(&RawPayload::Html(html.into()))
    }

    #[test]
    fn test_info_list_status_and_details() {
        let html = r#"<html><body>
            <h1>달빛 조각사</h1>
            <span class="author">남희성</span>
            <ul><li class="info_lst">
                <span>완결</span>
                <a href="/novel/categoryProductList.series?genreCode=201">판타지</a>
            </li></ul>
            <p>총 1권 (1화 ~ 1454화)</p>
        </body></html>"#;
        let partial = extract(html).unwrap();
        assert_eq!(partial.get("completionStatus"), Some(&json!("완결")));
        assert_eq!(partial.get(TITLE_FIELD), Some(&json!("달빛 조각사")));
        assert_eq!(partial.get(AUTHOR_FIELD), Some(&json!("남희성")));
        assert_eq!(partial.get(GENRE_FIELD), Some(&json!("판타지")));
        assert_eq!(partial.get(EPISODE_COUNT_FIELD), Some(&json!(1454)));
    }

    #[test]
    fn test_generic_text_fallback() {
        let partial = extract("<html><body><div>연재중</div></body></html>").unwrap();
        assert_eq!(partial.get("completionStatus"), Some(&json!("연재중")));
        assert_eq!(partial.get(TITLE_FIELD), None);
    }

    #[test]
    fn test_class_hint_fallback() {
        let html = r#"<html><body><i class="badge_complete"></i></body></html>"#;
        let partial = extract(html).unwrap();
        assert_eq!(partial.get("completionStatus"), Some(&json!("완결")));

        let html = r#"<html><body><i data-status="ongoing"></i></body></html>"#;
        let partial = extract(html).unwrap();
        assert_eq!(partial.get("completionStatus"), Some(&json!("연재중")));
    }

    #[test]
    fn test_structured_data_fallback() {
        let html = r#"<html><head>
            <script type="application/ld+json">not json</script>
            <script type="application/ld+json">{"workStatus": "completed"}</script>
        </head><body></body></html>"#;
        let partial = extract(html).unwrap();
        assert_eq!(partial.get("completionStatus"), Some(&json!("완결")));
    }

    #[test]
    fn test_details_without_status_fail() {
        let html = r#"<html><body><h1>제목</h1><p>휴재</p></body></html>"#;
        assert!(extract(html).is_none());
    }
}
