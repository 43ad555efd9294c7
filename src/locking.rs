//! 按路径分配的进程内互斥锁，用于串行化同一文件上的冲突操作。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard returned by [`LockRegistry::acquire`]; the path stays locked until it is dropped.
pub type PathGuard = OwnedMutexGuard<()>;

/// Maps a resource path to its mutex. Entries are created lazily.
///
/// The registry-level mutex is only held while looking up or inserting an
/// entry, never while the caller waits on or holds a path lock.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    /// 创建空的锁注册表。
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 获取路径锁；若已被占用则等待，不会失败。
    pub async fn acquire(&self, path: &Path) -> PathGuard {
        let key = normalize_lock_key(path);
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drops entries that no task currently holds or waits on.
    ///
    /// A task that wants a path lock clones the entry's `Arc` while holding the
    /// registry mutex, so a strong count of 1 observed under that mutex means
    /// the entry is idle. Returns the number of entries removed.
    pub async fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    /// 当前注册的路径数量。
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

fn normalize_lock_key(path: &Path) -> PathBuf {
    path.components().collect()
}
