//! Batch orchestration with checkpoint and resume.
//!
//! ```text
//! Loading ─▶ Scoping ─▶ Running(1) ─▶ Checkpointing(1) ─▶ Running(2) ─▶ … ─▶ Done
//!    │          │            │               │
//!    └──────────┴────────────┴───────────────┴──▶ Aborted (corpus I/O failure)
//! ```
//!
//! Resume state is read from the entities themselves, never from a saved
//! position, so a checkpoint produced by an earlier run can be resumed even
//! when the eligible subset has shifted in between. The full entity sequence
//! is rewritten after every batch; only the entities touched in that batch
//! differ from the previous checkpoint. A fresh output is written once even
//! when nothing is pending.

use crate::error::{PipelineError, Result};
use crate::extractors::FieldExtractor;
use crate::models::{CorpusDocument, Entity, EntityId};
use crate::outputs::checkpoint::{load_corpus, write_checkpoint};
use crate::outputs::discovery::{find_latest, fresh_output_path};
use crate::passes::{PassKind, PassSpec};
use crate::rate_limit::RateLimiter;
use crate::sources::UpstreamClient;
use crate::updater::{EntityUpdater, UpdateOutcome};
use crate::utils::{format_duration, now_rfc3339, percent_label, progress_bar};
use chrono::Local;
use itertools::Itertools;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

const PROGRESS_BAR_WIDTH: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Loading,
    Scoping,
    Running { batch: usize },
    Checkpointing { batch: usize },
    Done,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Loading => write!(f, "loading"),
            RunPhase::Scoping => write!(f, "scoping"),
            RunPhase::Running { batch } => write!(f, "running batch {batch}"),
            RunPhase::Checkpointing { batch } => write!(f, "checkpointing batch {batch}"),
            RunPhase::Done => write!(f, "done"),
            RunPhase::Aborted => write!(f, "aborted"),
        }
    }
}

/// Outcome tallies for one batch or a whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub success: usize,
    pub failed: usize,
    /// Successes whose target field differs from its prior value.
    pub changed: usize,
    pub unchanged: usize,
    /// Processed entities that an earlier run had already marked failed.
    pub retried: usize,
}

impl BatchStats {
    pub fn record(&mut self, pass: &PassSpec, before: &Entity, outcome: &UpdateOutcome) {
        let target_field = pass.target_field();
        if pass.has_failed(before) {
            self.retried += 1;
        }
        if !outcome.is_enriched() {
            self.failed += 1;
        } else if before.get(target_field) != outcome.entity().get(target_field) {
            self.success += 1;
            self.changed += 1;
        } else {
            self.success += 1;
            self.unchanged += 1;
        }
    }

    /// Fold one batch into per-entity totals spanning several runs.
    ///
    /// A retried entity was already counted as failed by the run that gave
    /// up on it, so its earlier failure is taken back before the new outcome
    /// is added.
    pub fn carry(&mut self, batch: BatchStats) {
        self.success += batch.success;
        self.changed += batch.changed;
        self.unchanged += batch.unchanged;
        self.failed = (self.failed + batch.failed).saturating_sub(batch.retried);
    }

    pub fn processed(&self) -> usize {
        self.success + self.failed
    }

    /// Tallies stored by an earlier run under a summary block.
    fn from_summary(block: Option<&Value>) -> Self {
        let count = |key: &str| {
            block
                .and_then(|b| b.get("stats"))
                .and_then(|s| s.get(key))
                .and_then(Value::as_u64)
                .map_or(0, |n| n as usize)
        };
        Self {
            success: count("success"),
            failed: count("fail"),
            changed: count("changed"),
            unchanged: count("unchanged"),
            retried: 0,
        }
    }

    fn to_json(self) -> Value {
        json!({
            "success": self.success,
            "fail": self.failed,
            "changed": self.changed,
            "unchanged": self.unchanged,
        })
    }
}

impl AddAssign for BatchStats {
    fn add_assign(&mut self, other: Self) {
        self.success += other.success;
        self.failed += other.failed;
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.retried += other.retried;
    }
}

/// An in-scope entity and where it sits in the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scoped {
    pub id: EntityId,
    pub position: usize,
}

/// Which entities a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Every in-scope entity, in corpus order.
    pub target: Vec<EntityId>,
    /// Entities this run will fetch, in corpus order.
    pub pending: Vec<Scoped>,
    /// Target entities that count as already processed.
    pub resume_offset: usize,
}

/// Compute the target set and the pending work for `pass`.
///
/// An entity is in the target set when it passes the guard and either
/// still needs enrichment or already carries this pass's provenance. It is
/// pending unless a previous run marked it done (see [`PassSpec::is_done`]).
///
/// # Arguments
///
/// * `doc` - The loaded corpus
/// * `pass` - The pass whose predicates and markers apply
/// * `start_index` - Number of target entities to skip; they count as processed
/// * `retry_failed` - Whether entities marked failed are pending again
///
/// # Returns
///
/// The target ids, the pending entities with their corpus positions, and the
/// number of target entities treated as already processed.
///
/// When an id occurs more than once, only its first in-scope occurrence is
/// part of the scope, and updates are written back to that same record.
///
/// # Examples
///
/// ```ignore
/// let s = scope(&doc, &pass, 0, false);
/// for Scoped { id, position } in &s.pending {
///     assert_eq!(doc.entities[*position].id(&pass.fields.id).as_ref(), Some(id));
/// }
/// ```
pub fn scope(doc: &CorpusDocument, pass: &PassSpec, start_index: usize, retry_failed: bool) -> Scope {
    let id_field = &pass.fields.id;
    let mut seen = HashSet::new();
    let in_scope: Vec<(Scoped, bool)> = doc
        .entities
        .iter()
        .enumerate()
        .filter(|(_, e)| pass.in_scope(e))
        .filter_map(|(position, e)| {
            let id = e.id(id_field)?;
            Some((Scoped { id, position }, pass.is_done(e, retry_failed)))
        })
        .filter(|(scoped, _)| seen.insert(scoped.id.clone()))
        .collect();

    let pending: Vec<Scoped> = in_scope
        .iter()
        .skip(start_index)
        .filter(|(_, done)| !done)
        .map(|(scoped, _)| scoped.clone())
        .collect();
    let target: Vec<EntityId> = in_scope.into_iter().map(|(scoped, _)| scoped.id).collect();
    Scope {
        resume_offset: target.len() - pending.len(),
        target,
        pending,
    }
}

/// Input and output of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub input: PathBuf,
    pub output: PathBuf,
    /// The input is a prior output of the same pass.
    pub resumed: bool,
}

/// Decide where to read from and where to checkpoint to.
///
/// An explicit output wins. Otherwise the latest prior output of the pass is
/// resumed in place, unless `resume` is off or none exists, in which case a
/// fresh timestamped file in `output_dir` is started from `input`.
///
/// # Arguments
///
/// * `kind` - The pass, which fixes the output file prefix
/// * `input` - Corpus to start from when no prior output is resumed
/// * `output` - Explicit checkpoint path; disables discovery
/// * `output_dir` - Directory for a fresh output file
/// * `search_dirs` - Directories scanned for prior outputs
/// * `resume` - Whether prior outputs are considered at all
///
/// # Returns
///
/// The resolved [`RunPaths`], or a configuration error when no input is
/// given and nothing can be resumed.
///
/// # Examples
///
/// ```ignore
/// let dirs = vec![PathBuf::from("output")];
/// let paths = resolve_paths(
///     PassKind::ApiStartDate,
///     Some(Path::new("novels.json")),
///     None,
///     Path::new("output"),
///     &dirs,
///     true,
/// )
/// .await?;
/// assert!(paths.resumed || paths.input == Path::new("novels.json"));
/// ```
#[instrument(level = "info", skip_all, fields(pass = kind.name()))]
pub async fn resolve_paths(
    kind: PassKind,
    input: Option<&Path>,
    output: Option<&Path>,
    output_dir: &Path,
    search_dirs: &[PathBuf],
    resume: bool,
) -> Result<RunPaths> {
    let missing_input = || {
        PipelineError::Configuration(format!(
            "no prior {} output found; an input corpus path is required",
            kind.name()
        ))
    };

    if let Some(output) = output {
        let input = input.ok_or_else(missing_input)?;
        return Ok(RunPaths {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            resumed: false,
        });
    }

    if resume {
        if let Some(prior) = find_latest(kind.file_prefix(), search_dirs).await {
            info!(path = %prior.path.display(), timestamp = %prior.timestamp, "Resuming from prior output");
            return Ok(RunPaths {
                input: prior.path.clone(),
                output: prior.path,
                resumed: true,
            });
        }
    } else {
        info!("Resume disabled; starting a fresh output");
    }

    let input = input.ok_or_else(missing_input)?;
    Ok(RunPaths {
        input: input.to_path_buf(),
        output: fresh_output_path(output_dir, kind.file_prefix(), chrono::Utc::now()),
        resumed: false,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub batch_size: usize,
    pub start_index: usize,
    pub retry_failed: bool,
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub phase: RunPhase,
    pub output: PathBuf,
    pub total_target: usize,
    pub pending: usize,
    pub checkpoints_written: usize,
    pub stats: BatchStats,
    pub elapsed: Duration,
}

pub struct ResumableBatchRunner<C, X> {
    pass: PassSpec,
    updater: EntityUpdater<C, X>,
    limiter: RateLimiter,
    options: RunOptions,
    phase: RunPhase,
}

impl<C, X> ResumableBatchRunner<C, X>
where
    C: UpstreamClient,
    X: FieldExtractor,
{
    pub fn new(
        pass: PassSpec,
        updater: EntityUpdater<C, X>,
        limiter: RateLimiter,
        options: RunOptions,
    ) -> Self {
        Self {
            pass,
            updater,
            limiter,
            options: RunOptions {
                batch_size: options.batch_size.max(1),
                ..options
            },
            phase: RunPhase::Loading,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Run the pass over `paths.input`, checkpointing to `paths.output`.
    #[instrument(level = "info", skip_all, fields(pass = self.pass.kind.name()))]
    pub async fn run(&mut self, paths: &RunPaths) -> Result<RunReport> {
        let t0 = Instant::now();
        match self.run_inner(paths, t0).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.enter(RunPhase::Aborted);
                error!(error = %e, output = %paths.output.display(), "Run aborted");
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, paths: &RunPaths, t0: Instant) -> Result<RunReport> {
        self.enter(RunPhase::Loading);
        let mut doc = load_corpus(&paths.input).await?;

        self.enter(RunPhase::Scoping);
        self.report_id_anomalies(&doc);
        let scope = scope(&doc, &self.pass, self.options.start_index, self.options.retry_failed);
        let total = scope.target.len();
        info!(
            entities = doc.entities.len(),
            target = total,
            already_processed = scope.resume_offset,
            pending = scope.pending.len(),
            start_index = self.options.start_index,
            retry_failed = self.options.retry_failed,
            "Scoped run"
        );

        let summary_key = self.pass.kind.summary_key();
        let mut cumulative = BatchStats::from_summary(doc.summary.get(summary_key));
        let mut session = BatchStats::default();
        let mut checkpoints_written = 0;

        if scope.pending.is_empty() {
            info!(target = total, "Nothing left to process");
            if !fs::try_exists(&paths.output).await.unwrap_or(false) {
                self.enter(RunPhase::Checkpointing { batch: 0 });
                let block = summary_block(&paths.output, total, total, 0, 0, cumulative);
                doc.summary.insert(summary_key.to_string(), block);
                write_checkpoint(&doc, &paths.output).await?;
                checkpoints_written += 1;
            }
        }

        let batches: Vec<&[Scoped]> = scope.pending.chunks(self.options.batch_size).collect();
        let batch_count = batches.len();
        let mut session_done = 0;
        for (i, batch) in batches.into_iter().enumerate() {
            let batch_no = i + 1;
            self.enter(RunPhase::Running { batch: batch_no });
            self.log_progress(
                scope.resume_offset + session_done,
                total,
                session_done,
                scope.pending.len(),
                t0.elapsed(),
            );
            info!(batch = batch_no, of = batch_count, size = batch.len(), "Starting batch");

            let mut batch_stats = BatchStats::default();
            for (j, Scoped { id, position }) in batch.iter().enumerate() {
                let before = &doc.entities[*position];
                let outcome = self.updater.update(before).await;
                debug!(%id, enriched = outcome.is_enriched(), attempts = outcome.attempts(), "Entity processed");
                batch_stats.record(&self.pass, before, &outcome);
                doc.entities[*position] = outcome.into_entity();
                session_done += 1;
                if j + 1 < batch.len() {
                    self.limiter.wait().await;
                }
            }

            session += batch_stats;
            cumulative.carry(batch_stats);
            info!(
                batch = batch_no,
                success = batch_stats.success,
                fail = batch_stats.failed,
                changed = batch_stats.changed,
                unchanged = batch_stats.unchanged,
                "Batch finished"
            );

            self.enter(RunPhase::Checkpointing { batch: batch_no });
            let block = summary_block(
                &paths.output,
                scope.resume_offset + session_done,
                total,
                session_done,
                scope.pending.len(),
                cumulative,
            );
            doc.summary.insert(summary_key.to_string(), block);
            write_checkpoint(&doc, &paths.output).await?;
            checkpoints_written += 1;

            if batch_no < batch_count {
                self.limiter.inter_batch_wait().await;
            }
        }

        self.enter(RunPhase::Done);
        let elapsed = t0.elapsed();
        let avg = (session.processed() > 0)
            .then(|| elapsed / session.processed() as u32)
            .map(format_duration);
        info!(
            processed = session.processed(),
            success = session.success,
            fail = session.failed,
            changed = session.changed,
            unchanged = session.unchanged,
            checkpoints = checkpoints_written,
            progress = %percent_label(scope.resume_offset + session_done, total),
            elapsed = %format_duration(elapsed),
            avg_per_entity = avg.as_deref().unwrap_or("-"),
            output = %paths.output.display(),
            "Pass complete"
        );

        Ok(RunReport {
            phase: self.phase,
            output: paths.output.clone(),
            total_target: total,
            pending: scope.pending.len(),
            checkpoints_written,
            stats: session,
            elapsed,
        })
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }

    fn report_id_anomalies(&self, doc: &CorpusDocument) {
        let id_field = &self.pass.fields.id;
        let ids = doc.entities.iter().map(|e| e.id(id_field));

        let duplicates: Vec<EntityId> = ids.clone().flatten().duplicates().collect();
        if !duplicates.is_empty() {
            warn!(
                count = duplicates.len(),
                ids = %duplicates.iter().take(10).join(", "),
                "Duplicate entity ids; only the first in-scope occurrence is processed"
            );
        }
        let missing = ids.filter(Option::is_none).count();
        if missing > 0 {
            warn!(count = missing, id_field = %id_field, "Entities without an id are never processed");
        }
    }

    fn log_progress(&self, done: usize, total: usize, session_done: usize, session_total: usize, elapsed: Duration) {
        let eta = (session_done > 0).then(|| {
            let per_entity = elapsed / session_done as u32;
            per_entity * (session_total - session_done) as u32
        });
        let finish = eta
            .and_then(|eta| chrono::Duration::from_std(eta).ok())
            .map(|eta| (Local::now() + eta).format("%H:%M:%S").to_string());
        info!(
            progress = %format!(
                "[{}] {}/{} ({})",
                progress_bar(done, total, PROGRESS_BAR_WIDTH),
                done,
                total,
                percent_label(done, total)
            ),
            session = %format!("{session_done}/{session_total} ({})", percent_label(session_done, session_total)),
            elapsed = %format_duration(elapsed),
            eta = %eta.map(format_duration).unwrap_or_else(|| "-".to_string()),
            finish_at = finish.as_deref().unwrap_or("-"),
            "Progress"
        );
    }
}

fn summary_block(
    output: &Path,
    processed: usize,
    total: usize,
    session_done: usize,
    session_total: usize,
    stats: BatchStats,
) -> Value {
    json!({
        "updatedAt": now_rfc3339(),
        "processedCount": processed,
        "totalTarget": total,
        "progress": percent_label(processed, total),
        "processedInSession": session_done,
        "sessionProgress": percent_label(session_done, session_total),
        "outputFile": output.display().to_string(),
        "stats": stats.to_json(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldNames;
    use crate::updater::tests::{ObjectExtractor, ScriptedClient};
    use serde_json::json;

    fn pass() -> PassSpec {
        PassSpec::new(PassKind::ApiStartDate, FieldNames::default())
    }

    fn doc(entities: Value) -> CorpusDocument {
        serde_json::from_value(json!({"summary": {"source": "test"}, "entities": entities})).unwrap()
    }

    fn runner(
        client: &ScriptedClient,
        batch_size: usize,
        start_index: usize,
        retry_failed: bool,
    ) -> ResumableBatchRunner<&ScriptedClient, ObjectExtractor> {
        let limiter = RateLimiter::new(Duration::ZERO);
        let updater = EntityUpdater::new(client, ObjectExtractor, limiter, 3, &pass());
        ResumableBatchRunner::new(
            pass(),
            updater,
            limiter,
            RunOptions {
                batch_size,
                start_index,
                retry_failed,
            },
        )
    }

    fn write_corpus(dir: &Path, doc: &CorpusDocument) -> RunPaths {
        let path = dir.join("api_start_date_updated_2025-07-03T10-00-00-000Z.json");
        std::fs::write(&path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
        RunPaths {
            input: path.clone(),
            output: path,
            resumed: true,
        }
    }

    fn read(path: &Path) -> CorpusDocument {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn pending_ids(s: &Scope) -> Vec<EntityId> {
        s.pending.iter().map(|p| p.id.clone()).collect()
    }

    fn five_pending() -> CorpusDocument {
        doc(json!([
            {"id": 1, "author": "A", "startDate": null},
            {"id": 2, "author": "B", "startDate": null},
            {"id": 3, "author": "C", "startDate": null},
            {"id": 4, "author": "D", "startDate": ""},
            {"id": 5, "author": "E", "startDate": null}
        ]))
    }

    #[test]
    fn test_target_set_is_guard_gated() {
        let d = doc(json!([
            {"id": 1, "author": "A", "startDate": null},
            {"id": 2, "author": null, "startDate": null},
            {"id": 3, "author": "B", "startDate": "2023-01-01"}
        ]));
        let s = scope(&d, &pass(), 0, false);
        assert_eq!(s.target, vec![EntityId::new("1")]);
        assert_eq!(
            s.pending,
            vec![Scoped {
                id: EntityId::new("1"),
                position: 0
            }]
        );
        assert_eq!(s.resume_offset, 0);
    }

    #[test]
    fn test_scope_counts_marked_entities_as_done() {
        let d = doc(json!([
            {"id": 1, "author": "A", "startDate": "2024-01-15", "apiStartDateCheckedAt": "t"},
            {"id": 2, "author": "B", "startDate": null, "apiStartDateFailed": true},
            {"id": 3, "author": "C", "startDate": null}
        ]));
        let s = scope(&d, &pass(), 0, false);
        assert_eq!(s.target.len(), 3);
        assert_eq!(pending_ids(&s), vec![EntityId::new("3")]);
        assert_eq!(s.resume_offset, 2);

        let retry = scope(&d, &pass(), 0, true);
        assert_eq!(pending_ids(&retry), vec![EntityId::new("2"), EntityId::new("3")]);
    }

    #[test]
    fn test_scope_start_index_and_duplicates() {
        let d = doc(json!([
            {"id": 1, "author": "A"},
            {"id": 2, "author": "B"},
            {"id": 1, "author": "A again"},
            {"id": 3, "author": "C"}
        ]));
        let s = scope(&d, &pass(), 1, false);
        assert_eq!(s.target.len(), 3);
        assert_eq!(pending_ids(&s), vec![EntityId::new("2"), EntityId::new("3")]);
        assert_eq!(s.pending[1].position, 3);
        assert_eq!(s.resume_offset, 1);
    }

    #[test]
    fn test_scope_uses_first_in_scope_occurrence_of_duplicate_id() {
        let d = doc(json!([
            {"id": 7, "author": null, "tag": "no guard"},
            {"id": 7, "author": "A", "tag": "eligible"}
        ]));
        let s = scope(&d, &pass(), 0, false);
        assert_eq!(
            s.pending,
            vec![Scoped {
                id: EntityId::new("7"),
                position: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_duplicate_id_updates_the_scoped_record() {
        let tmp = tempfile::tempdir().unwrap();
        let original = doc(json!([
            {"id": 1, "author": null, "tag": "no guard"},
            {"id": 1, "author": "A", "tag": "eligible"}
        ]));
        let paths = write_corpus(tmp.path(), &original);
        let client = ScriptedClient::always(Ok(json!({"startDate": "2024-01-15"})));
        runner(&client, 10, 0, false).run(&paths).await.unwrap();

        let out = read(&paths.output);
        assert_eq!(out.entities[0], original.entities[0]);
        assert_eq!(out.entities[1].get("startDate"), Some(&json!("2024-01-15")));
        assert!(out.entities[1].get("apiStartDateCheckedAt").is_some());

        let again = ScriptedClient::always(Ok(json!({"startDate": "1999-01-01"})));
        runner(&again, 10, 0, false).run(&paths).await.unwrap();
        assert_eq!(again.calls(), 0);
    }

    #[tokio::test]
    async fn test_batches_checkpoint_after_each_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = write_corpus(tmp.path(), &five_pending());
        let client = ScriptedClient::always(Ok(json!({"startDate": "2024-01-15"})));

        let report = runner(&client, 2, 0, false).run(&paths).await.unwrap();
        assert_eq!(report.phase, RunPhase::Done);
        assert_eq!(report.checkpoints_written, 3);
        assert_eq!(report.stats.success, 5);
        assert_eq!(report.stats.changed, 5);
        assert_eq!(client.calls(), 5);
        assert_eq!(client.seen(), vec!["1", "2", "3", "4", "5"]);

        let out = read(&paths.output);
        let block = &out.summary["apiStartDateUpdate"];
        assert_eq!(block["progress"], json!("100.00%"));
        assert_eq!(block["processedCount"], json!(5));
        assert_eq!(block["totalTarget"], json!(5));
        assert_eq!(block["stats"]["success"], json!(5));
        assert_eq!(out.summary["source"], json!("test"));
        assert!(out.entities.iter().all(|e| e.get("startDate") == Some(&json!("2024-01-15"))));
    }

    #[tokio::test]
    async fn test_rerun_after_completion_fetches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = write_corpus(tmp.path(), &five_pending());
        let client = ScriptedClient::always(Ok(json!({"startDate": "2024-01-15"})));
        runner(&client, 2, 0, false).run(&paths).await.unwrap();
        let after_first = std::fs::read_to_string(&paths.output).unwrap();

        let again = ScriptedClient::always(Ok(json!({"startDate": "1999-01-01"})));
        let report = runner(&again, 2, 0, false).run(&paths).await.unwrap();
        assert_eq!(again.calls(), 0);
        assert_eq!(report.pending, 0);
        assert_eq!(report.total_target, 5);
        assert_eq!(report.checkpoints_written, 0);
        assert_eq!(std::fs::read_to_string(&paths.output).unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_untouched_entities_survive_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let original = doc(json!([
            {"id": 1, "author": null, "title": "no guard", "extra": [1, 2]},
            {"id": 2, "author": "B", "startDate": null},
            {"id": 3, "author": "C", "startDate": "2020-05-05", "note": "kept"}
        ]));
        let paths = write_corpus(tmp.path(), &original);
        let client = ScriptedClient::always(Ok(json!({"startDate": "2024-01-15"})));
        runner(&client, 10, 0, false).run(&paths).await.unwrap();

        let out = read(&paths.output);
        assert_eq!(out.entities.len(), 3);
        assert_eq!(out.entities[0], original.entities[0]);
        assert_eq!(out.entities[2], original.entities[2]);
        assert_eq!(out.entities[1].get("startDate"), Some(&json!("2024-01-15")));
        assert_eq!(client.seen(), vec!["2"]);
    }

    #[tokio::test]
    async fn test_newly_eligible_entity_before_resume_point_is_processed() {
        let tmp = tempfile::tempdir().unwrap();
        let d = doc(json!([
            {"id": 1, "author": "A", "startDate": null},
            {"id": 2, "author": "B", "startDate": "2024-01-15", "apiStartDateCheckedAt": "t"},
            {"id": 3, "author": "C", "startDate": "2024-01-16", "apiStartDateCheckedAt": "t"},
            {"id": 4, "author": "D", "startDate": null}
        ]));
        let paths = write_corpus(tmp.path(), &d);
        let client = ScriptedClient::always(Ok(json!({"startDate": "2024-02-01"})));
        let report = runner(&client, 10, 0, false).run(&paths).await.unwrap();

        assert_eq!(client.seen(), vec!["1", "4"]);
        assert_eq!(report.total_target, 4);
        let block = &read(&paths.output).summary["apiStartDateUpdate"];
        assert_eq!(block["processedCount"], json!(4));
        assert_eq!(block["processedInSession"], json!(2));
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_skipped_on_rerun() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = write_corpus(tmp.path(), &five_pending());
        let client = ScriptedClient::new(vec![Err(503), Err(503), Err(503)], Ok(json!({"startDate": "2024-01-15"})));
        let report = runner(&client, 5, 0, false).run(&paths).await.unwrap();
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.success, 4);
        assert_eq!(client.calls(), 7);

        let out = read(&paths.output);
        assert!(out.entities[0].is_flagged("apiStartDateFailed"));
        assert_eq!(out.summary["apiStartDateUpdate"]["stats"]["fail"], json!(1));

        let rerun = ScriptedClient::always(Ok(json!({"startDate": "2024-01-15"})));
        runner(&rerun, 5, 0, false).run(&paths).await.unwrap();
        assert_eq!(rerun.calls(), 0);

        let retry = ScriptedClient::always(Ok(json!({"startDate": "2024-01-15"})));
        runner(&retry, 5, 0, true).run(&paths).await.unwrap();
        assert_eq!(retry.seen(), vec!["1"]);
        let out = read(&paths.output);
        assert_eq!(out.entities[0].get("apiStartDateFailed"), Some(&json!(false)));
        assert_eq!(out.summary["apiStartDateUpdate"]["stats"]["success"], json!(5));
        assert_eq!(out.summary["apiStartDateUpdate"]["stats"]["fail"], json!(0));
    }

    #[tokio::test]
    async fn test_retry_that_fails_again_is_counted_once() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = write_corpus(tmp.path(), &five_pending());
        let client = ScriptedClient::new(vec![Err(503), Err(503), Err(503)], Ok(json!({"startDate": "2024-01-15"})));
        runner(&client, 5, 0, false).run(&paths).await.unwrap();

        let retry = ScriptedClient::always(Err(503));
        let report = runner(&retry, 5, 0, true).run(&paths).await.unwrap();
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.retried, 1);
        let stats = &read(&paths.output).summary["apiStartDateUpdate"]["stats"];
        assert_eq!(stats["fail"], json!(1));
        assert_eq!(stats["success"], json!(4));
    }

    #[test]
    fn test_carry_takes_back_retried_failures() {
        let mut total = BatchStats {
            success: 4,
            failed: 2,
            ..Default::default()
        };
        total.carry(BatchStats {
            success: 1,
            failed: 1,
            changed: 1,
            retried: 2,
            ..Default::default()
        });
        assert_eq!(total.success, 5);
        assert_eq!(total.failed, 1);
        assert_eq!(total.processed(), 6);
    }

    #[tokio::test]
    async fn test_fresh_output_is_written_when_nothing_is_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("corpus.json");
        let original = doc(json!([
            {"id": 1, "author": null},
            {"id": 2, "author": "B", "startDate": "2020-05-05"}
        ]));
        std::fs::write(&input, serde_json::to_string(&original).unwrap()).unwrap();
        let paths = RunPaths {
            input,
            output: tmp.path().join("api_start_date_updated_2025-07-04T00-00-00-000Z.json"),
            resumed: false,
        };
        let client = ScriptedClient::always(Ok(json!({})));
        let report = runner(&client, 2, 0, false).run(&paths).await.unwrap();

        assert_eq!(client.calls(), 0);
        assert_eq!(report.checkpoints_written, 1);
        let out = read(&paths.output);
        assert_eq!(out.entities, original.entities);
        assert_eq!(out.summary["apiStartDateUpdate"]["progress"], json!("100.00%"));
        assert_eq!(out.summary["apiStartDateUpdate"]["totalTarget"], json!(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_paced_by_base_and_double_delay() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = write_corpus(tmp.path(), &five_pending());
        let client = ScriptedClient::always(Ok(json!({"startDate": "2024-01-15"})));
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let updater = EntityUpdater::new(&client, ObjectExtractor, limiter, 3, &pass());
        let mut r = ResumableBatchRunner::new(
            pass(),
            updater,
            limiter,
            RunOptions {
                batch_size: 2,
                start_index: 0,
                retry_failed: false,
            },
        );

        let t0 = tokio::time::Instant::now();
        r.run(&paths).await.unwrap();
        // Batches of 2, 2 and 1: two in-batch waits of 100ms and two
        // inter-batch waits of 200ms. No wait follows the last entity.
        let elapsed = t0.elapsed();
        assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
        assert_eq!(client.calls(), 5);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_aborts_run() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_corpus(tmp.path(), &five_pending()).input;
        std::fs::write(tmp.path().join("blocker"), "file").unwrap();
        let paths = RunPaths {
            input,
            output: tmp.path().join("blocker").join("out.json"),
            resumed: false,
        };
        let client = ScriptedClient::always(Ok(json!({"startDate": "2024-01-15"})));
        let mut r = runner(&client, 2, 0, false);

        let err = r.run(&paths).await.unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointWrite { .. }));
        assert_eq!(r.phase(), RunPhase::Aborted);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_corpus_aborts_run() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = RunPaths {
            input: tmp.path().join("missing.json"),
            output: tmp.path().join("out.json"),
            resumed: false,
        };
        let client = ScriptedClient::always(Ok(json!({})));
        let mut r = runner(&client, 2, 0, false);
        assert!(matches!(r.run(&paths).await, Err(PipelineError::CorpusRead { .. })));
        assert_eq!(r.phase(), RunPhase::Aborted);
    }

    #[tokio::test]
    async fn test_resolve_paths_prefers_prior_output() {
        let tmp = tempfile::tempdir().unwrap();
        let prior = tmp.path().join("api_start_date_updated_2025-07-03T11-00-00-000Z.json");
        std::fs::write(&prior, "{}").unwrap();
        let dirs = vec![tmp.path().to_path_buf()];

        let paths = resolve_paths(PassKind::ApiStartDate, Some(Path::new("corpus.json")), None, tmp.path(), &dirs, true)
            .await
            .unwrap();
        assert_eq!(paths.input, prior);
        assert_eq!(paths.output, prior);
        assert!(paths.resumed);

        let fresh = resolve_paths(PassKind::ApiStartDate, Some(Path::new("corpus.json")), None, tmp.path(), &dirs, false)
            .await
            .unwrap();
        assert_eq!(fresh.input, PathBuf::from("corpus.json"));
        assert_ne!(fresh.output, prior);
        assert!(!fresh.resumed);
    }

    #[tokio::test]
    async fn test_resolve_paths_requires_input_without_prior_output() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = vec![tmp.path().to_path_buf()];
        let err = resolve_paths(PassKind::HtmlVerify, None, None, tmp.path(), &dirs, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        let explicit = resolve_paths(
            PassKind::HtmlVerify,
            Some(Path::new("in.json")),
            Some(Path::new("out.json")),
            tmp.path(),
            &dirs,
            true,
        )
        .await
        .unwrap();
        assert_eq!(explicit.output, PathBuf::from("out.json"));
    }
}
