//! Extraction from the volume list API.
//!
//! Expected body:
//!
//! ```json
//! {"resultData": [
//!   {"registerDate": "2021-03-04 12:00:00", "lastVolumeUpdateDate": "...", "termination": false},
//!   ...
//! ]}
//! ```
//!
//! The start date comes from the first volume, the completion flag from the
//! last one. Older responses carry `terminationYn: "Y"|"N"` instead of the
//! boolean `termination`.

use super::{FieldExtractor, Strategy, first_match, normalize_date};
use crate::config::FieldNames;
use crate::models::{PartialRecord, SerialStatus};
use crate::sources::RawPayload;
use serde_json::Value;
use tracing::debug;

/// Number of volumes returned.
pub const EPISODE_COUNT_FIELD: &str = "apiEpisodeCount";
/// Raw register date of the first volume.
pub const FIRST_REGISTER_DATE_FIELD: &str = "apiFirstRegisterDate";
/// Raw update date of the last volume.
pub const LAST_UPDATE_DATE_FIELD: &str = "apiLastUpdateDate";

const START_DATE_STRATEGIES: &[Strategy<Value>] = &[register_date, last_volume_update_date];
const STATUS_STRATEGIES: &[Strategy<Value>] = &[termination_flag, termination_yn];

fn register_date(volume: &Value) -> Option<Value> {
    volume.get("registerDate").and_then(normalize_date).map(Value::String)
}

fn last_volume_update_date(volume: &Value) -> Option<Value> {
    volume
        .get("lastVolumeUpdateDate")
        .and_then(normalize_date)
        .map(Value::String)
}

fn termination_flag(volume: &Value) -> Option<Value> {
    let terminated = volume.get("termination")?.as_bool()?;
    Some(SerialStatus::from_terminated(terminated).label().into())
}

fn termination_yn(volume: &Value) -> Option<Value> {
    let flag = volume.get("terminationYn")?.as_str()?;
    Some(SerialStatus::from_terminated(flag.eq_ignore_ascii_case("Y")).label().into())
}

#[derive(Debug, Clone)]
pub struct VolumeListExtractor {
    start_date_field: String,
    status_field: String,
}

impl VolumeListExtractor {
    pub fn new(fields: &FieldNames) -> Self {
        Self {
            start_date_field: fields.start_date.clone(),
            status_field: fields.completion_status.clone(),
        }
    }
}

impl FieldExtractor for VolumeListExtractor {
    fn extract(&self, payload: &RawPayload) -> Option<PartialRecord> {
        let RawPayload::Json(body) = payload else {
            debug!("Volume list extractor received a non-JSON payload");
            return None;
        };
        let Some(volumes) = body.get("resultData").and_then(Value::as_array) else {
            debug!("Volume list response has no resultData array");
            return None;
        };
        let (Some(first), Some(last)) = (volumes.first(), volumes.last()) else {
            debug!("Volume list response contains no volumes");
            return None;
        };

        let partial = PartialRecord::new()
            .with(&self.start_date_field, first_match(START_DATE_STRATEGIES, first))
            .with(&self.status_field, first_match(STATUS_STRATEGIES, last))
            .with(EPISODE_COUNT_FIELD, Some(Value::from(volumes.len())))
            .with(FIRST_REGISTER_DATE_FIELD, first.get("registerDate").cloned())
            .with(LAST_UPDATE_DATE_FIELD, last.get("lastVolumeUpdateDate").cloned());

        (!partial.is_empty()).then_some(partial)
    }
}
