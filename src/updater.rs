//! Per-entity enrichment with bounded retries.
//!
//! [`EntityUpdater::update`] runs up to `max_retries` attempts of
//! fetch-then-extract for one entity:
//!
//! ```text
//! attempt n: fetch ─ok─▶ extract ─Some─▶ merge, stamp checked_at ─▶ Enriched
//!              │                │
//!             err             None
//!              └───────┬────────┘
//!          n < max: wait n * base_delay, retry
//!          n = max: stamp failed + failed_at    ─▶ Failed
//! ```
//!
//! Nothing escapes as an error. A failure is returned as data on the entity,
//! and the runner keeps going.

use crate::error::FailureReason;
use crate::extractors::FieldExtractor;
use crate::models::{Entity, EntityId, PartialRecord};
use crate::passes::{PassSpec, Provenance};
use crate::rate_limit::RateLimiter;
use crate::sources::{RawPayload, UpstreamClient};
use crate::utils::{now_rfc3339, truncate_for_log};
use itertools::Itertools;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Result of updating one entity.
#[derive(Debug)]
pub enum UpdateOutcome {
    Enriched {
        entity: Entity,
        attempts: usize,
    },
    Failed {
        entity: Entity,
        reason: FailureReason,
        attempts: usize,
    },
}

impl UpdateOutcome {
    pub fn entity(&self) -> &Entity {
        match self {
            UpdateOutcome::Enriched { entity, .. } | UpdateOutcome::Failed { entity, .. } => entity,
        }
    }

    pub fn into_entity(self) -> Entity {
        match self {
            UpdateOutcome::Enriched { entity, .. } | UpdateOutcome::Failed { entity, .. } => entity,
        }
    }

    pub fn is_enriched(&self) -> bool {
        matches!(self, UpdateOutcome::Enriched { .. })
    }

    pub fn attempts(&self) -> usize {
        match self {
            UpdateOutcome::Enriched { attempts, .. } | UpdateOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Copy every populated field of `partial` over `entity`.
///
/// Absent or `null` values in `partial` never overwrite existing data.
pub fn merge_partial(entity: &Entity, partial: &PartialRecord) -> Entity {
    let mut merged = entity.clone();
    for (field, value) in partial.populated() {
        merged.set(field, value.clone());
    }
    merged
}

pub struct EntityUpdater<C, X> {
    client: C,
    extractor: X,
    limiter: RateLimiter,
    max_retries: usize,
    id_field: String,
    title_field: String,
    provenance: Provenance,
}

impl<C, X> EntityUpdater<C, X>
where
    C: UpstreamClient,
    X: FieldExtractor,
{
    /// Build an updater for one pass.
    ///
    /// # Arguments
    ///
    /// * `client` - Upstream the entity is fetched from
    /// * `extractor` - Turns a fetched payload into a partial record
    /// * `limiter` - Supplies the linear backoff between attempts
    /// * `max_retries` - Attempts per entity; values below 1 are raised to 1
    /// * `pass` - Supplies the id and title fields and the provenance markers
    ///
    /// # Returns
    ///
    /// An updater whose [`update`](Self::update) never returns an error.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let pass = PassSpec::new(PassKind::ApiStartDate, FieldNames::default());
    /// let limiter = RateLimiter::new(Duration::from_millis(800));
    /// let updater = EntityUpdater::new(source, extractor, limiter, 3, &pass);
    /// let outcome = updater.update(&entity).await;
    /// ```
    pub fn new(
        client: C,
        extractor: X,
        limiter: RateLimiter,
        max_retries: usize,
        pass: &PassSpec,
    ) -> Self {
        Self {
            client,
            extractor,
            limiter,
            max_retries: max_retries.max(1),
            id_field: pass.fields.id.clone(),
            title_field: pass.fields.title.clone(),
            provenance: pass.provenance(),
        }
    }

    /// Enrich one entity. Never fails; see the module docs.
    #[instrument(level = "info", skip_all, fields(id = ?entity.id(&self.id_field)))]
    pub async fn update(&self, entity: &Entity) -> UpdateOutcome {
        let label = entity.label(&self.title_field, &self.id_field);
        let Some(id) = entity.id(&self.id_field) else {
            error!(%label, id_field = %self.id_field, "Entity has no usable id; skipping fetch");
            return self.fail(entity, FailureReason::MissingId, 0);
        };

        let t0 = Instant::now();
        let mut last_reason = FailureReason::ExtractionMismatch;
        for attempt in 1..=self.max_retries {
            debug!(%label, attempt, max = self.max_retries, "Updating entity");
            match self.attempt(&id).await {
                Ok(partial) => {
                    let mut merged = merge_partial(entity, &partial);
                    merged.set(self.provenance.checked_at, now_rfc3339());
                    if merged.is_flagged(self.provenance.failed) {
                        merged.set(self.provenance.failed, false);
                    }
                    info!(
                        %label,
                        attempt,
                        fields = %partial.populated().map(|(name, _)| name).join(", "),
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Entity enriched"
                    );
                    return UpdateOutcome::Enriched {
                        entity: merged,
                        attempts: attempt,
                    };
                }
                Err(reason) => {
                    warn!(
                        %label,
                        attempt,
                        max = self.max_retries,
                        category = reason.category(),
                        error = %reason,
                        "Update attempt failed"
                    );
                    last_reason = reason;
                    if attempt < self.max_retries {
                        self.limiter.wait_retry(attempt).await;
                    }
                }
            }
        }

        error!(
            %label,
            attempts = self.max_retries,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Retries exhausted; marking entity as failed"
        );
        self.fail(entity, last_reason, self.max_retries)
    }

    async fn attempt(&self, id: &EntityId) -> Result<PartialRecord, FailureReason> {
        let payload = self.client.fetch(id).await?;
        match self.extractor.extract(&payload) {
            Some(partial) => Ok(partial),
            None => {
                debug!(payload = %preview(&payload), "Payload matched no known shape");
                Err(FailureReason::ExtractionMismatch)
            }
        }
    }

    fn fail(&self, entity: &Entity, reason: FailureReason, attempts: usize) -> UpdateOutcome {
        let mut failed = entity.clone();
        failed.set(self.provenance.failed, true);
        failed.set(self.provenance.failed_at, now_rfc3339());
        UpdateOutcome::Failed {
            entity: failed,
            reason,
            attempts,
        }
    }
}

fn preview(payload: &RawPayload) -> String {
    match payload {
        RawPayload::Json(value) => truncate_for_log(&value.to_string(), 300),
        RawPayload::Html(html) => truncate_for_log(html, 300),
    }
}
