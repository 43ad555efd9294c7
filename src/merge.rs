//! 最后一个分片到达后，在目标路径锁内把暂存分片合并为共享文件。

use chrono::Local;
use std::io;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::atomic::AtomicFile;
use crate::error::ShareError;
use crate::locking::PathGuard;
use crate::staging::{ChunkStore, SessionState};
use crate::storage::{SharedDir, sanitize_filename};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The chunk was not the last one; nothing was merged.
    Pending,
    Finalized { filename: String, size: u64 },
}

#[derive(Debug)]
pub struct MergeEngine {
    shared: Arc<SharedDir>,
    staging: Arc<ChunkStore>,
}

impl MergeEngine {
    pub fn new(shared: Arc<SharedDir>, staging: Arc<ChunkStore>) -> Self {
        Self { shared, staging }
    }

    /// Merges the session into the shared directory when `chunk_index` is the
    /// last index; returns [`FinalizeOutcome::Pending`] otherwise.
    ///
    /// The lock of the sanitized candidate path is held from the collision
    /// check until the merged file is published. A renamed target is locked
    /// as well, always after the candidate; renamed names are strictly longer
    /// than the name they derive from, so the lock order has no cycles.
    /// Publishing never replaces an existing file. On any failure the staging
    /// directory is left untouched and no file appears under the final name.
    pub async fn maybe_finalize(
        &self,
        upload_id: &str,
        chunk_index: u64,
        total_chunks: u64,
        raw_filename: &str,
    ) -> Result<FinalizeOutcome, ShareError> {
        if total_chunks.checked_sub(1) != Some(chunk_index) {
            return Ok(FinalizeOutcome::Pending);
        }

        let filename = sanitize_filename(raw_filename);
        if filename != raw_filename {
            info!(op = "merge", upload_id, raw_filename, filename, "normalized filename");
        }
        let candidate = self.shared.path_for(&filename);
        let _guard = self.shared.locks().acquire(&candidate).await;

        match self.staging.inspect(upload_id, total_chunks).await? {
            SessionState::Ready { .. } => {}
            SessionState::Partial { missing, .. } => {
                let index = missing.first().copied().unwrap_or_default();
                warn!(op = "merge", upload_id, index, "missing chunk, merge aborted");
                return Err(ShareError::MissingChunk { index });
            }
            SessionState::Absent => {
                warn!(op = "merge", upload_id, "staging directory vanished, merge aborted");
                return Err(ShareError::MissingChunk { index: 0 });
            }
        }

        let mut atomic = AtomicFile::create(&candidate).await?;
        let mut size = 0u64;
        for index in 0..total_chunks {
            let copied = match self.staging.open_chunk(upload_id, index).await {
                Ok(mut chunk) => tokio::io::copy(&mut chunk, atomic.file_mut()).await,
                Err(err) => Err(err),
            };
            match copied {
                Ok(bytes) => size += bytes,
                Err(err) => {
                    atomic.discard().await;
                    if err.kind() == io::ErrorKind::NotFound {
                        warn!(op = "merge", upload_id, index, "chunk disappeared during merge");
                        return Err(ShareError::MissingChunk { index });
                    }
                    return Err(err.into());
                }
            }
        }

        let published = self.publish(&mut atomic, &filename, upload_id).await;
        atomic.discard().await;
        let filename = published?;

        let _ = self.staging.remove_session(upload_id, "merge").await;
        info!(op = "merge", upload_id, filename, size, total_chunks, "upload finalized");
        Ok(FinalizeOutcome::Finalized { filename, size })
    }

    /// Links the merged content under `filename`, or under a time-suffixed
    /// name when that one is taken. Caller holds the lock of `filename`.
    async fn publish(
        &self,
        atomic: &mut AtomicFile,
        filename: &str,
        upload_id: &str,
    ) -> Result<String, ShareError> {
        let mut taken = fs::try_exists(self.shared.path_for(filename)).await?;
        loop {
            let (name, _renamed_guard) = if taken {
                let (renamed, guard) = self.claim_renamed(filename).await?;
                info!(op = "merge", upload_id, from = filename, to = renamed, "name collision resolved");
                (renamed, Some(guard))
            } else {
                (filename.to_string(), None)
            };
            match atomic.link_new(&self.shared.path_for(&name)).await {
                Ok(()) => return Ok(name),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    warn!(op = "merge", upload_id, name, "target appeared before publish, renaming");
                    taken = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Picks a free suffixed name and takes its lock. The name is checked
    /// again once the lock is held, since another finalization may have
    /// published it meanwhile.
    async fn claim_renamed(&self, filename: &str) -> Result<(String, PathGuard), ShareError> {
        loop {
            let renamed = self.shared.disambiguate(filename, Local::now()).await?;
            let path = self.shared.path_for(&renamed);
            let guard = self.shared.locks().acquire(&path).await;
            if !fs::try_exists(&path).await? {
                return Ok((renamed, guard));
            }
        }
    }
}
