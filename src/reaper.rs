//! 过期上传暂存目录清理。

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::ShareError;
use crate::locking::LockRegistry;
use crate::staging::ChunkStore;

/// Deletes staging session directories that have been inactive longer than a
/// threshold.
///
/// Activity is the newest mtime among the session directory and every file
/// below it, recomputed by walking each subtree on every sweep, so a sweep
/// costs O(sessions x files per session).
#[derive(Debug)]
pub struct TempReaper {
    staging: Arc<ChunkStore>,
    locks: Arc<LockRegistry>,
}

impl TempReaper {
    pub fn new(staging: Arc<ChunkStore>, locks: Arc<LockRegistry>) -> Self {
        Self { staging, locks }
    }

    /// 扫描暂存根目录，删除超过 `max_age` 未活动的会话目录，返回删除数量。
    ///
    /// Afterwards idle entries are pruned from the lock registry.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize, ShareError> {
        let root = self.staging.root_path().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || sweep_root(&root, max_age))
            .await
            .map_err(|err| io::Error::other(err.to_string()))??;
        let pruned = self.locks.prune_idle().await;
        let tracked = self.locks.len().await;
        if removed > 0 || pruned > 0 {
            info!(
                op = "reap",
                removed,
                pruned_locks = pruned,
                tracked_locks = tracked,
                "temp sweep finished"
            );
        }
        Ok(removed)
    }
}

fn sweep_root(root: &Path, max_age: Duration) -> io::Result<usize> {
    let sessions: Vec<PathBuf> = match std::fs::read_dir(root) {
        Ok(dir) => dir
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for session in sessions {
        match reap_session(&session, max_age, now) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => warn!(op = "reap", path = ?session, error = %err, "failed to reap session"),
        }
    }
    Ok(removed)
}

/// Removes `session` if it is older than `max_age`. A directory that vanished
/// before or during inspection counts as not removed, never as an error.
fn reap_session(session: &Path, max_age: Duration, now: SystemTime) -> io::Result<bool> {
    let Some(last_activity) = last_activity(session)? else {
        return Ok(false);
    };
    let age = now.duration_since(last_activity).unwrap_or_default();
    if age <= max_age {
        return Ok(false);
    }
    match std::fs::remove_dir_all(session) {
        Ok(()) => {
            info!(
                op = "reap",
                path = ?session,
                age_hours = age.as_secs_f64() / 3600.0,
                "removed stale staging directory"
            );
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Newest mtime of `dir` and everything below it, or `None` if `dir` is gone.
fn last_activity(dir: &Path) -> io::Result<Option<SystemTime>> {
    let mut latest = match std::fs::metadata(dir).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(Result::ok) {
        if let Ok(modified) = entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
            latest = latest.max(modified);
        }
    }
    Ok(Some(latest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_reaper() -> (tempfile::TempDir, Arc<ChunkStore>, TempReaper) {
        let temp = tempdir().expect("tempdir");
        let staging = Arc::new(ChunkStore::new(temp.path().join("temp_uploads")));
        let reaper = TempReaper::new(staging.clone(), Arc::new(LockRegistry::new()));
        (temp, staging, reaper)
    }

    #[cfg(unix)]
    fn backdate(path: &Path, by: Duration) {
        let when = SystemTime::now() - by;
        std::fs::File::open(path)
            .expect("open")
            .set_modified(when)
            .expect("set mtime");
    }

    #[tokio::test]
    async fn missing_root_is_empty_sweep() {
        let (_temp, _staging, reaper) = make_reaper();
        assert_eq!(reaper.sweep(Duration::from_secs(3600)).await.expect("sweep"), 0);
    }

    #[tokio::test]
    async fn young_session_is_kept() {
        let (_temp, staging, reaper) = make_reaper();
        staging.stage_chunk("fresh", 0, 2, b"x").await.expect("stage");

        let removed = reaper.sweep(Duration::from_secs(2 * 3600)).await.expect("sweep");
        assert_eq!(removed, 0);
        assert!(staging.session_dir("fresh").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_session_is_removed() {
        let (_temp, staging, reaper) = make_reaper();
        staging.stage_chunk("stale", 0, 2, b"x").await.expect("stage");
        staging.stage_chunk("fresh", 0, 2, b"y").await.expect("stage");
        let three_hours = Duration::from_secs(3 * 3600);
        backdate(&staging.chunk_path("stale", 0), three_hours);
        backdate(&staging.session_dir("stale"), three_hours);

        let removed = reaper.sweep(Duration::from_secs(2 * 3600)).await.expect("sweep");
        assert_eq!(removed, 1);
        assert!(!staging.session_dir("stale").exists());
        assert!(staging.session_dir("fresh").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn recent_chunk_keeps_old_directory_alive() {
        let (_temp, staging, reaper) = make_reaper();
        staging.stage_chunk("slow", 0, 3, b"x").await.expect("stage");
        staging.stage_chunk("slow", 1, 3, b"y").await.expect("stage");
        let three_hours = Duration::from_secs(3 * 3600);
        backdate(&staging.chunk_path("slow", 0), three_hours);
        backdate(&staging.session_dir("slow"), three_hours);

        let removed = reaper.sweep(Duration::from_secs(2 * 3600)).await.expect("sweep");
        assert_eq!(removed, 0);
        assert!(staging.session_dir("slow").exists());
    }

    #[test]
    fn vanished_session_is_not_an_error() {
        let temp = tempdir().expect("tempdir");
        let gone = temp.path().join("already-cleaned");
        let reaped = reap_session(&gone, Duration::ZERO, SystemTime::now()).expect("reap");
        assert!(!reaped);
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn sweep_future_is_send() {
        let (_temp, _staging, reaper) = make_reaper();
        assert_send(reaper.sweep(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn sweep_runs_on_spawned_task() {
        let (_temp, staging, reaper) = make_reaper();
        staging.stage_chunk("fresh", 0, 2, b"x").await.expect("stage");
        let reaper = Arc::new(reaper);
        let removed = tokio::spawn(async move { reaper.sweep(Duration::from_secs(3600)).await })
            .await
            .expect("join")
            .expect("sweep");
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn sweep_prunes_idle_locks() {
        let temp = tempdir().expect("tempdir");
        let locks = Arc::new(LockRegistry::new());
        let staging = Arc::new(ChunkStore::new(temp.path().join("temp_uploads")));
        let reaper = TempReaper::new(staging, locks.clone());
        drop(locks.acquire(Path::new("/srv/shared/old.txt")).await);

        reaper.sweep(Duration::from_secs(3600)).await.expect("sweep");
        assert_eq!(locks.len().await, 0);
    }
}
