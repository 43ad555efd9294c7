//! 进程级组件的装配。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::UploadConfig;
use crate::error::ShareError;
use crate::locking::LockRegistry;
use crate::merge::MergeEngine;
use crate::messages::MessageBoard;
use crate::reaper::TempReaper;
use crate::staging::ChunkStore;
use crate::storage::SharedDir;

/// Every shared component, wired to a single [`LockRegistry`].
///
/// Tests build isolated instances by pointing it at temporary directories.
#[derive(Clone)]
pub struct AppContext {
    pub shared: Arc<SharedDir>,
    pub staging: Arc<ChunkStore>,
    pub merge: Arc<MergeEngine>,
    pub reaper: Arc<TempReaper>,
    pub messages: Arc<MessageBoard>,
    pub upload: Arc<UploadConfig>,
}

impl AppContext {
    pub fn new(
        shared_dir: PathBuf,
        temp_dir: PathBuf,
        messages_file: PathBuf,
        upload: UploadConfig,
    ) -> Self {
        let locks = Arc::new(LockRegistry::new());
        let shared = Arc::new(SharedDir::new(shared_dir, locks.clone()));
        let staging = Arc::new(ChunkStore::new(temp_dir));
        let merge = Arc::new(MergeEngine::new(shared.clone(), staging.clone()));
        let reaper = Arc::new(TempReaper::new(staging.clone(), locks.clone()));
        let messages = Arc::new(MessageBoard::new(messages_file, locks.clone()));
        Self {
            shared,
            staging,
            merge,
            reaper,
            messages,
            upload: Arc::new(upload),
        }
    }

    /// 创建共享目录、暂存目录与留言文档。
    pub async fn prepare(&self) -> Result<(), ShareError> {
        self.shared.ensure_root().await?;
        self.staging.ensure_root().await?;
        self.messages.ensure_document().await
    }
}
