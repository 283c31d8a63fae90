//! Loading and checkpointing the corpus document.
//!
//! A checkpoint is always a full rewrite. The document is serialized first,
//! written to `<path>.tmp` and flushed to disk, then renamed over `<path>`;
//! a crash or power loss at any point leaves either the previous checkpoint
//! or the new one, never a truncated file.

use crate::error::{PipelineError, Result};
use crate::models::CorpusDocument;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument};

/// Read and parse the corpus document at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_corpus(path: &Path) -> Result<CorpusDocument> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| PipelineError::CorpusRead {
            path: path.to_path_buf(),
            source,
        })?;
    let doc: CorpusDocument =
        serde_json::from_str(&raw).map_err(|source| PipelineError::CorpusFormat {
            path: path.to_path_buf(),
            source,
        })?;
    info!(entities = doc.entities.len(), "Loaded corpus");
    Ok(doc)
}

/// Atomically replace the document at `path`.
///
/// # Arguments
///
/// * `doc` - The full corpus, summary included
/// * `path` - Checkpoint file; missing parent directories are created
///
/// # Returns
///
/// `Ok(())` once the new contents are durable under `path`. On error the
/// previous file at `path`, if any, is left as it was.
///
/// # Examples
///
/// ```ignore
/// let doc = load_corpus(Path::new("novels.json")).await?;
/// write_checkpoint(&doc, Path::new("output/api_start_date_updated_2025-07-03T10-00-00-000Z.json")).await?;
/// ```
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_checkpoint(doc: &CorpusDocument, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(doc).map_err(|source| {
        error!(error = %source, "Failed to encode checkpoint");
        PipelineError::CheckpointEncode {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let tmp_path = temp_path(path);
    let write_err = |source: std::io::Error| {
        error!(error = %source, "Failed to write checkpoint");
        PipelineError::CheckpointWrite {
            path: path.to_path_buf(),
            source,
        }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    if let Err(e) = write_synced(&tmp_path, json.as_bytes()).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    info!(entities = doc.entities.len(), "Wrote checkpoint");
    Ok(())
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("corpus.json"));
    name.push(".tmp");
    path.with_file_name(name)
}
