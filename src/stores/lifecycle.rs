//! Reclaims physical shard storage after collections are deleted.
//!
//! The sqlite backend keeps shard directories alive after a collection is
//! logically removed; file handles held by pooled connections make eager
//! removal unreliable. The janitor runs the quiesce-and-reclaim protocol:
//! delete the collection, and once no collections remain anywhere, reset the
//! backend's connection handles and sweep orphaned shard directories with a
//! retry ladder.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::stores::{SqliteVectorIndex, VectorIndex};
use crate::types::Result;

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Best-effort storage reclaimer for the sqlite vector index.
pub struct StorageJanitor {
    index: Arc<SqliteVectorIndex>,
}

impl StorageJanitor {
    pub fn new(index: Arc<SqliteVectorIndex>) -> Self {
        Self { index }
    }

    /// Deletes the conversation's collection and, when it was the last one,
    /// reclaims every orphaned shard directory under the storage root.
    ///
    /// Returns `true` when the collection was removed or at least one shard
    /// directory was reclaimed; cleanup problems are logged, never raised.
    pub async fn delete_conversation(&self, conversation_id: &str) -> bool {
        match self.delete_inner(conversation_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    conversation = conversation_id,
                    error = %err,
                    "index deletion failed"
                );
                false
            }
        }
    }

    async fn delete_inner(&self, conversation_id: &str) -> Result<bool> {
        let collection_deleted = self.index.delete_collection(conversation_id).await?;
        let remaining = self.index.list_collections().await?.len();
        tracing::info!(
            conversation = conversation_id,
            collection_deleted,
            remaining,
            "collection deletion finished"
        );

        if remaining > 0 {
            tracing::debug!("live collections remain, skipping shard sweep");
            return Ok(collection_deleted);
        }

        // Release held file descriptors before touching shard directories.
        self.index.reset().await?;

        let shards = shard_directories(self.index.root()).await?;
        if shards.is_empty() {
            return Ok(collection_deleted);
        }

        let mut reclaimed = 0usize;
        for shard in &shards {
            if force_remove_dir(shard).await {
                reclaimed += 1;
            }
        }
        tracing::info!(reclaimed, total = shards.len(), "shard sweep finished");
        Ok(collection_deleted || reclaimed > 0)
    }
}

fn shard_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .expect("shard name pattern is valid")
    })
}

/// Shard directories under `root`, identified by their uuid names.
async fn shard_directories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut shards = Vec::new();
    if !root.exists() {
        return Ok(shards);
    }
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if shard_name_pattern().is_match(name) {
            shards.push(path);
        }
    }
    Ok(shards)
}

/// Removes a shard directory, escalating through three strategies:
/// direct removal, a delayed retry, and finally a file-by-file walk that
/// relaxes permissions and removes directories bottom-up.
async fn force_remove_dir(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }

    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            tracing::info!(shard = %path.display(), "removed shard directory");
            return true;
        }
        Err(err) => {
            tracing::warn!(shard = %path.display(), error = %err, "direct shard removal failed");
        }
    }

    tokio::time::sleep(RETRY_DELAY).await;
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            tracing::info!(shard = %path.display(), "removed shard directory on retry");
            return true;
        }
        Err(err) => {
            tracing::warn!(shard = %path.display(), error = %err, "delayed shard removal failed");
        }
    }

    let target = path.to_path_buf();
    match tokio::task::spawn_blocking(move || remove_tree_file_by_file(&target)).await {
        Ok(Ok(())) => {
            tracing::info!(shard = %path.display(), "removed shard directory file by file");
            true
        }
        Ok(Err(err)) => {
            tracing::error!(
                shard = %path.display(),
                error = %err,
                "all shard removal strategies failed"
            );
            false
        }
        Err(err) => {
            tracing::error!(shard = %path.display(), error = %err, "shard removal task failed");
            false
        }
    }
}

fn remove_tree_file_by_file(path: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let child = entry.path();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            if let Err(err) = remove_tree_file_by_file(&child) {
                tracing::debug!(path = %child.display(), error = %err, "failed to remove subdirectory");
            }
        } else {
            relax_permissions(&child);
            if let Err(err) = std::fs::remove_file(&child) {
                tracing::debug!(path = %child.display(), error = %err, "failed to remove file");
            }
        }
    }
    std::fs::remove_dir(path)
}

#[cfg(unix)]
fn relax_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777));
}

#[cfg(not(unix))]
fn relax_permissions(path: &Path) {
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut permissions = metadata.permissions();
        permissions.set_readonly(false);
        let _ = std::fs::set_permissions(path, permissions);
    }
}
