//! 先写临时文件、校验完成后再改名发布的辅助类型。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use uuid::Uuid;

/// Hidden scratch file next to its target; the target name only appears once
/// [`AtomicFile::publish`] renames the finished content into place.
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建隐藏临时文件。
    pub async fn create(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_path = parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()));
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 以硬链接发布到 `target`，不覆盖已有文件。
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] when `target` exists; the
    /// temporary file is kept either way and is removed by [`AtomicFile::discard`].
    pub async fn link_new(&mut self, target: &Path) -> io::Result<()> {
        self.file.sync_all().await?;
        fs::hard_link(&self.temp_path, target).await?;
        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(())
    }

    /// 放弃并删除临时文件。
    pub async fn discard(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 落盘后改名到目标路径。
    pub async fn publish(self) -> io::Result<()> {
        if let Err(err) = self.file.sync_all().await {
            drop(self.file);
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::File::open(path)?.sync_all())
        .await
        .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(not(unix))]
async fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn target_appears_only_after_publish() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("out.bin");

        let mut atomic = AtomicFile::create(&target).await.expect("create");
        atomic.file_mut().write_all(b"payload").await.expect("write");
        assert!(!target.exists());

        atomic.publish().await.expect("publish");
        assert_eq!(std::fs::read(&target).expect("read"), b"payload");
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 1);
    }

    #[tokio::test]
    async fn discard_leaves_nothing_behind() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("out.bin");

        let mut atomic = AtomicFile::create(&target).await.expect("create");
        atomic.file_mut().write_all(b"partial").await.expect("write");
        atomic.discard().await;

        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }

    #[tokio::test]
    async fn link_new_never_replaces_existing_target() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("taken.bin");
        std::fs::write(&target, b"first").expect("write");

        let mut atomic = AtomicFile::create(&target).await.expect("create");
        atomic.file_mut().write_all(b"second").await.expect("write");
        let err = atomic.link_new(&target).await.expect_err("target exists");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&target).expect("read"), b"first");

        let other = temp.path().join("taken_1.bin");
        atomic.link_new(&other).await.expect("link");
        atomic.discard().await;
        assert_eq!(std::fs::read(&other).expect("read"), b"second");
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 2);
    }
}
