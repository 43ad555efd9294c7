//! 分片暂存区：每个上传会话一个子目录，分片按序号命名。

use serde::Serialize;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{MAX_TOTAL_CHUNKS, MAX_UPLOAD_ID_LEN};
use crate::error::ShareError;

const CHUNK_PREFIX: &str = "chunk_";

/// Upload session state, derived from which chunk files are staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SessionState {
    /// No staging directory exists for the session.
    Absent,
    Partial {
        received: Vec<u64>,
        missing: Vec<u64>,
    },
    /// Every index in `0..chunks` is staged.
    Ready { chunks: u64 },
}

#[derive(Debug)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(upload_id)
    }

    pub fn chunk_path(&self, upload_id: &str, chunk_index: u64) -> PathBuf {
        self.session_dir(upload_id)
            .join(format!("{CHUNK_PREFIX}{chunk_index}"))
    }

    /// 写入一个分片。同一序号重复写入时整体替换旧内容。
    ///
    /// The bytes go to a uniquely named sibling first and are renamed into the
    /// slot, so a reader never observes a half-written chunk.
    pub async fn stage_chunk(
        &self,
        upload_id: &str,
        chunk_index: u64,
        total_chunks: u64,
        bytes: &[u8],
    ) -> Result<(), ShareError> {
        validate_upload_id(upload_id)?;
        validate_chunk_position(chunk_index, total_chunks)?;

        let dir = self.session_dir(upload_id);
        fs::create_dir_all(&dir).await?;
        let slot = self.chunk_path(upload_id, chunk_index);
        let scratch = dir.join(format!(".{CHUNK_PREFIX}{chunk_index}.{}", Uuid::new_v4()));
        if let Err(err) = fs::write(&scratch, bytes).await {
            let _ = fs::remove_file(&scratch).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&scratch, &slot).await {
            let _ = fs::remove_file(&scratch).await;
            return Err(err.into());
        }

        debug!(
            op = "upload",
            upload_id,
            chunk_index,
            total_chunks,
            bytes = bytes.len(),
            "chunk staged"
        );
        Ok(())
    }

    /// Reports which of the `total_chunks` expected chunks are staged.
    pub async fn inspect(
        &self,
        upload_id: &str,
        total_chunks: u64,
    ) -> Result<SessionState, ShareError> {
        validate_upload_id(upload_id)?;
        let mut dir = match fs::read_dir(self.session_dir(upload_id)).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(SessionState::Absent),
            Err(err) => return Err(err.into()),
        };

        let mut staged = BTreeSet::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|name| name.strip_prefix(CHUNK_PREFIX))
                .and_then(|index| index.parse::<u64>().ok())
            else {
                continue;
            };
            if index < total_chunks {
                staged.insert(index);
            }
        }

        if staged.len() as u64 == total_chunks {
            return Ok(SessionState::Ready {
                chunks: total_chunks,
            });
        }
        let missing = (0..total_chunks)
            .filter(|index| !staged.contains(index))
            .collect();
        Ok(SessionState::Partial {
            received: staged.into_iter().collect(),
            missing,
        })
    }

    pub async fn open_chunk(&self, upload_id: &str, chunk_index: u64) -> io::Result<File> {
        File::open(self.chunk_path(upload_id, chunk_index)).await
    }

    /// 删除会话暂存目录。目录不存在视为成功并返回 `false`。
    pub async fn remove_session(&self, upload_id: &str, op: &'static str) -> io::Result<bool> {
        let dir = self.session_dir(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(op, upload_id, "removed staging directory");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                warn!(op, upload_id, error = %err, "failed to remove staging directory");
                Err(err)
            }
        }
    }
}

/// Upload ids become directory names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_upload_id(upload_id: &str) -> Result<(), ShareError> {
    let valid = !upload_id.is_empty()
        && upload_id.len() <= MAX_UPLOAD_ID_LEN
        && upload_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ShareError::InvalidInput("uploadId is invalid".into()))
    }
}

pub fn validate_chunk_position(chunk_index: u64, total_chunks: u64) -> Result<(), ShareError> {
    if total_chunks == 0 || total_chunks > MAX_TOTAL_CHUNKS {
        return Err(ShareError::InvalidInput("totalChunks is out of range".into()));
    }
    if chunk_index >= total_chunks {
        return Err(ShareError::InvalidInput(
            "chunkIndex must be below totalChunks".into(),
        ));
    }
    Ok(())
}
