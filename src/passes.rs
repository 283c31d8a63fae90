//! Enrichment pass definitions.
//!
//! | Pass | Source | Target field | Eligibility | Default batch |
//! |------|--------|--------------|-------------|---------------|
//! | `api-start-date` | volume list API | start date | author set, start date empty | 10 |
//! | `html-start-date` | detail page | start date | author set, start date empty | 3 |
//! | `html-verify` | detail page | completion status | author set | 5 |
//!
//! Every pass leaves provenance markers on the entities it touched: a
//! success timestamp, or a failure flag plus timestamp. Resume detection and
//! scoping are driven by those markers, never by positions.

use crate::config::{FieldNames, PassSettings};
use crate::models::Entity;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum PassKind {
    /// Fill start date and status from the volume list API
    ApiStartDate,
    /// Fill start date and status by scraping the detail page
    HtmlStartDate,
    /// Re-verify completion status against the detail page
    HtmlVerify,
}

/// Field names a pass uses to annotate the entities it processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    /// Timestamp of the last successful enrichment
    pub checked_at: &'static str,
    /// `true` once the retry budget was exhausted
    pub failed: &'static str,
    /// Timestamp of the last failure
    pub failed_at: &'static str,
}

impl PassKind {
    pub fn name(self) -> &'static str {
        match self {
            PassKind::ApiStartDate => "api-start-date",
            PassKind::HtmlStartDate => "html-start-date",
            PassKind::HtmlVerify => "html-verify",
        }
    }

    /// Output files are named `<prefix>_<timestamp>.json`.
    pub fn file_prefix(self) -> &'static str {
        match self {
            PassKind::ApiStartDate => "api_start_date_updated",
            PassKind::HtmlStartDate => "html_start_date_updated",
            PassKind::HtmlVerify => "html_verified",
        }
    }

    /// Key of this pass's progress block inside the corpus summary.
    pub fn summary_key(self) -> &'static str {
        match self {
            PassKind::ApiStartDate => "apiStartDateUpdate",
            PassKind::HtmlStartDate => "htmlStartDateUpdate",
            PassKind::HtmlVerify => "htmlVerification",
        }
    }

    pub fn provenance(self) -> Provenance {
        match self {
            PassKind::ApiStartDate => Provenance {
                checked_at: "apiStartDateCheckedAt",
                failed: "apiStartDateFailed",
                failed_at: "apiStartDateFailedAt",
            },
            PassKind::HtmlStartDate => Provenance {
                checked_at: "htmlStartDateCheckedAt",
                failed: "htmlStartDateFailed",
                failed_at: "htmlStartDateFailedAt",
            },
            PassKind::HtmlVerify => Provenance {
                checked_at: "htmlVerifiedAt",
                failed: "htmlVerificationFailed",
                failed_at: "htmlVerificationFailedAt",
            },
        }
    }

    /// Built-in tuning. The API is faster than page scraping, so it gets a
    /// shorter delay and larger batches.
    pub fn defaults(self) -> PassSettings {
        let (batch_size, delay_ms, timeout_secs) = match self {
            PassKind::ApiStartDate => (10, 800, 10),
            PassKind::HtmlStartDate => (3, 1000, 15),
            PassKind::HtmlVerify => (5, 1000, 15),
        };
        PassSettings {
            batch_size: Some(batch_size),
            delay_ms: Some(delay_ms),
            jitter_ms: Some(0),
            max_retries: Some(3),
            timeout_secs: Some(timeout_secs),
        }
    }

    /// Whether the pass only targets entities whose target field is empty.
    fn fills_empty_target(self) -> bool {
        !matches!(self, PassKind::HtmlVerify)
    }
}

/// A pass bound to the corpus's field names.
#[derive(Debug, Clone)]
pub struct PassSpec {
    pub kind: PassKind,
    pub fields: FieldNames,
}

impl PassSpec {
    pub fn new(kind: PassKind, fields: FieldNames) -> Self {
        Self { kind, fields }
    }

    pub fn target_field(&self) -> &str {
        match self.kind {
            PassKind::ApiStartDate | PassKind::HtmlStartDate => &self.fields.start_date,
            PassKind::HtmlVerify => &self.fields.completion_status,
        }
    }

    pub fn provenance(&self) -> Provenance {
        self.kind.provenance()
    }

    /// The pass-specific eligibility predicate.
    pub fn needs_enrichment(&self, entity: &Entity) -> bool {
        entity.has_value(&self.fields.guard)
            && (!self.kind.fills_empty_target() || !entity.has_value(self.target_field()))
    }

    pub fn has_succeeded(&self, entity: &Entity) -> bool {
        entity.has_value(self.provenance().checked_at)
    }

    pub fn has_failed(&self, entity: &Entity) -> bool {
        entity.is_flagged(self.provenance().failed)
    }

    /// Entities counted in this pass's target set: those still needing work
    /// plus those this pass already annotated.
    pub fn in_scope(&self, entity: &Entity) -> bool {
        entity.has_value(&self.fields.guard)
            && (self.needs_enrichment(entity)
                || self.has_succeeded(entity)
                || self.has_failed(entity))
    }

    /// Durably processed by an earlier run of this pass.
    pub fn is_done(&self, entity: &Entity, retry_failed: bool) -> bool {
        self.has_succeeded(entity) || (!retry_failed && self.has_failed(entity))
    }
}
