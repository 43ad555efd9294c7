//! 周期性暂存目录清理任务。

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::UploadConfig;
use crate::reaper::TempReaper;

/// 按配置间隔启动后台清理；间隔为 0 时不启动。
pub fn spawn_background_tasks(reaper: Arc<TempReaper>, upload: &UploadConfig) {
    if upload.cleanup_interval.is_zero() {
        return;
    }
    let period = upload.cleanup_interval;
    let max_age = upload.temp_max_age;
    info!(interval_secs = period.as_secs(), "periodic staging sweep enabled");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // the first tick fires immediately and start-up has already swept
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = reaper.sweep(max_age).await {
                warn!(op = "reap", error = %err, "periodic staging sweep failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::LockRegistry;
    use crate::staging::ChunkStore;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn periodic_sweep_reaps_stale_sessions() {
        let temp = tempdir().expect("tempdir");
        let staging = Arc::new(ChunkStore::new(temp.path().join("temp_uploads")));
        let reaper = Arc::new(TempReaper::new(staging.clone(), Arc::new(LockRegistry::new())));
        staging.stage_chunk("abandoned", 0, 4, b"x").await.expect("stage");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let upload = UploadConfig {
            temp_max_age: Duration::ZERO,
            cleanup_interval: Duration::from_millis(30),
            ..UploadConfig::default()
        };
        spawn_background_tasks(reaper, &upload);

        let mut gone = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !staging.session_dir("abandoned").exists() {
                gone = true;
                break;
            }
        }
        assert!(gone, "background sweep should remove the session");
    }

    #[tokio::test]
    async fn zero_interval_spawns_nothing() {
        let temp = tempdir().expect("tempdir");
        let staging = Arc::new(ChunkStore::new(temp.path().join("temp_uploads")));
        let reaper = Arc::new(TempReaper::new(staging.clone(), Arc::new(LockRegistry::new())));
        staging.stage_chunk("kept", 0, 4, b"x").await.expect("stage");

        let upload = UploadConfig {
            temp_max_age: Duration::ZERO,
            ..UploadConfig::default()
        };
        spawn_background_tasks(reaper, &upload);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(staging.session_dir("kept").exists());
    }
}
