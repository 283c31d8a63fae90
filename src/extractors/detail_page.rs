//! Start date and serialization status from the series detail page.
//!
//! Lookup order for the status:
//! 1. the `ing` item of the info list (`.end_info .info_lst ul li.ing span`)
//! 2. dedicated status elements (`.status`, `.serial_status`, `.end_status`)
//!
//! Lookup order for the start date:
//! 1. info list items containing a date
//! 2. `.meta_info` blocks
//! 3. a `연재 시작` label anywhere in the body
//!
//! Within the first two, the last dated element on the page wins.

use super::{
    FieldExtractor, Strategy, element_text, find_date_in_text, first_match, ymd_from_captures,
};
use crate::config::FieldNames;
use crate::models::{PartialRecord, SerialStatus};
use crate::sources::RawPayload;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

static INFO_ITEMS: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".end_info .info_lst ul li").expect("valid selector"));
static INFO_ING_SPAN: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".end_info .info_lst ul li.ing span").expect("valid selector"));
static META_INFO: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".meta_info").expect("valid selector"));
static STATUS_ELEMENTS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [".status", ".serial_status", ".end_status"]
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid selector"));

static STATUS_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new("완결|연재중|휴재|중단").expect("valid status pattern"));
static START_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"연재\s*시작[:\s]*(\d{4})\.\s*(\d{1,2})\.\s*(\d{1,2})").expect("valid pattern")
});

const STATUS_STRATEGIES: &[Strategy<Html>] = &[status_from_info_list, status_from_status_elements];
const START_DATE_STRATEGIES: &[Strategy<Html>] =
    &[start_date_from_info_list, start_date_from_meta_info, start_date_from_body_label];

/// First status token inside `text`.
pub(crate) fn find_status_token(text: &str) -> Option<SerialStatus> {
    STATUS_TOKEN
        .find(text)
        .and_then(|m| SerialStatus::from_token(m.as_str()))
}

fn status_from_info_list(doc: &Html) -> Option<Value> {
    doc.select(&INFO_ING_SPAN)
        .find_map(|span| find_status_token(&element_text(span)))
        .map(|s| s.label().into())
}

fn status_from_status_elements(doc: &Html) -> Option<Value> {
    STATUS_ELEMENTS.iter().find_map(|selector| {
        let text = doc.select(selector).map(element_text).collect::<Vec<_>>().join(" ");
        find_status_token(&text).map(|s| s.label().into())
    })
}

fn start_date_from_info_list(doc: &Html) -> Option<Value> {
    doc.select(&INFO_ITEMS)
        .filter_map(|li| find_date_in_text(&element_text(li)))
        .last()
        .map(Value::String)
}

fn start_date_from_meta_info(doc: &Html) -> Option<Value> {
    doc.select(&META_INFO)
        .filter_map(|el| find_date_in_text(&element_text(el)))
        .last()
        .map(Value::String)
}

fn start_date_from_body_label(doc: &Html) -> Option<Value> {
    let body = doc.select(&BODY).next().map(element_text)?;
    START_LABEL
        .captures(&body)
        .and_then(|caps| ymd_from_captures(&caps))
        .map(Value::String)
}

#[derive(Debug, Clone)]
pub struct DetailPageExtractor {
    start_date_field: String,
    status_field: String,
}

impl DetailPageExtractor {
    pub fn new(fields: &FieldNames) -> Self {
        Self {
            start_date_field: fields.start_date.clone(),
            status_field: fields.completion_status.clone(),
        }
    }
}

impl FieldExtractor for DetailPageExtractor {
    fn extract(&self, payload: &RawPayload) -> Option<PartialRecord> {
        let RawPayload::Html(html) = payload else {
            return None;
        };
        let doc = Html::parse_document(html);
        let partial = PartialRecord::new()
            .with(&self.start_date_field, first_match(START_DATE_STRATEGIES, &doc))
            .with(&self.status_field, first_match(STATUS_STRATEGIES, &doc));

        (!partial.is_empty()).then_some(partial)
    }
}
