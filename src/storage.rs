//! 共享目录：文件名规范化、冲突改名、列表、下载与删除。

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs::{self, File};
use tracing::info;

use crate::error::ShareError;
use crate::locking::{LockRegistry, PathGuard};

pub const PLACEHOLDER_FILENAME: &str = "unnamed_file";

/// Flat directory holding the finished shared files.
///
/// Every operation that reads, removes, or publishes a file goes through the
/// path lock of that file in the shared [`LockRegistry`].
#[derive(Debug)]
pub struct SharedDir {
    root: PathBuf,
    locks: Arc<LockRegistry>,
}

/// A file opened for download. The path lock is held for as long as this
/// value (or the guard moved out of it) is alive.
pub struct OpenedFile {
    pub name: String,
    pub file: File,
    pub metadata: Metadata,
    pub guard: PathGuard,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedFile {
    pub name: String,
    pub size: u64,
    pub size_display: String,
    pub created: String,
    #[serde(skip)]
    created_at: SystemTime,
}

impl SharedDir {
    pub fn new(root: PathBuf, locks: Arc<LockRegistry>) -> Self {
        Self { root, locks }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Path of an already sanitized file name.
    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// 计算不与现有文件冲突的新文件名：`stem_HHMMSS.ext`，同秒再冲突时追加序号。
    ///
    /// Callers must hold the lock of the original candidate path.
    pub async fn disambiguate(
        &self,
        filename: &str,
        now: DateTime<Local>,
    ) -> Result<String, ShareError> {
        let (stem, ext) = split_extension(filename);
        let stamp = now.format("%H%M%S");
        let mut candidate = format!("{stem}_{stamp}{ext}");
        let mut attempt = 0u32;
        while fs::try_exists(self.path_for(&candidate)).await? {
            attempt += 1;
            candidate = format!("{stem}_{stamp}_{attempt}{ext}");
        }
        Ok(candidate)
    }

    /// 在路径锁内打开文件用于下载。
    pub async fn open_for_download(&self, raw: &str) -> Result<OpenedFile, ShareError> {
        let name = basename(raw).ok_or_else(|| ShareError::NotFound("file".into()))?;
        let path = self.path_for(&name);
        let guard = self.locks.acquire(&path).await;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ShareError::NotFound(name));
            }
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(ShareError::NotFound(name));
        }
        Ok(OpenedFile {
            name,
            file,
            metadata,
            guard,
        })
    }

    /// Removes a shared file under its path lock. Returns `false` when there
    /// was nothing to delete.
    pub async fn delete(&self, raw: &str) -> Result<bool, ShareError> {
        let Some(name) = basename(raw) else {
            return Ok(false);
        };
        let path = self.path_for(&name);
        let _guard = self.locks.acquire(&path).await;
        match fs::symlink_metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Ok(false),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        }
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(op = "delete", name, "deleted shared file");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// 列出共享文件，按创建时间倒序。隐藏文件（合并中的临时文件）不列出。
    pub async fn list(&self) -> Result<Vec<SharedFile>, ShareError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            let created_at = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let created: DateTime<Local> = created_at.into();
            files.push(SharedFile {
                name,
                size: metadata.len(),
                size_display: format_size(metadata.len()),
                created: created.format("%m-%d %H:%M").to_string(),
                created_at,
            });
        }
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }
}

/// Reduces a client-supplied name to a single safe path segment.
///
/// Directory components and traversal sequences are stripped. If stripping
/// removed the extension while a base name survived, the original extension
/// is re-appended. An empty result becomes [`PLACEHOLDER_FILENAME`].
pub fn sanitize_filename(raw: &str) -> String {
    let last_segment = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last_segment
        .replace("..", "")
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        return PLACEHOLDER_FILENAME.to_string();
    }

    let (_, raw_ext) = split_extension(last_segment);
    let (_, kept_ext) = split_extension(&cleaned);
    let raw_ext_is_clean = !raw_ext.contains("..") && raw_ext.len() > 1;
    if kept_ext.is_empty() && raw_ext_is_clean {
        return format!("{cleaned}{raw_ext}");
    }
    cleaned
}

/// Splits `name` into stem and extension (with its dot). Leading dots do
/// not start an extension, so `.profile` has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// 下载/删除使用的文件名：仅保留最后一个路径段。
fn basename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return None;
    }
    Some(name.to_string())
}

fn format_size(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1}TB")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn make_shared() -> (tempfile::TempDir, SharedDir) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("shared");
        std::fs::create_dir_all(&root).expect("create shared root");
        (temp, SharedDir::new(root, Arc::new(LockRegistry::new())))
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("报告 2024.docx"), "报告 2024.docx");
    }

    #[test]
    fn sanitize_falls_back_to_placeholder() {
        assert_eq!(sanitize_filename(""), PLACEHOLDER_FILENAME);
        assert_eq!(sanitize_filename("../.."), PLACEHOLDER_FILENAME);
        assert_eq!(sanitize_filename("dir/"), PLACEHOLDER_FILENAME);
    }

    #[test]
    fn sanitize_restores_stripped_extension() {
        assert_eq!(sanitize_filename("archive..tar"), "archivetar.tar");
        assert_eq!(sanitize_filename("notes"), "notes");
    }

    #[test]
    fn split_extension_ignores_leading_dots() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_extension(".profile"), (".profile", ""));
        assert_eq!(split_extension("plain"), ("plain", ""));
    }

    #[test]
    fn format_size_uses_binary_units() {
        assert_eq!(format_size(512), "512.0B");
        assert_eq!(format_size(1536), "1.5KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }

    #[tokio::test]
    async fn disambiguate_appends_time_then_counter() {
        let (_temp, shared) = make_shared();
        let now = Local
            .with_ymd_and_hms(2024, 5, 6, 13, 4, 5)
            .single()
            .expect("valid time");

        let first = shared.disambiguate("report.pdf", now).await.expect("name");
        assert_eq!(first, "report_130405.pdf");

        std::fs::write(shared.path_for(&first), b"x").expect("write");
        let second = shared.disambiguate("report.pdf", now).await.expect("name");
        assert_eq!(second, "report_130405_1.pdf");
    }

    #[tokio::test]
    async fn delete_reports_absent_file() {
        let (_temp, shared) = make_shared();
        assert!(!shared.delete("missing.txt").await.expect("delete"));

        std::fs::write(shared.path_for("present.txt"), b"data").expect("write");
        assert!(shared.delete("../present.txt").await.expect("delete"));
        assert!(!shared.path_for("present.txt").exists());
    }

    #[tokio::test]
    async fn open_for_download_missing_is_not_found() {
        let (_temp, shared) = make_shared();
        let result = shared.open_for_download("nope.bin").await;
        assert!(matches!(result, Err(ShareError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_hides_temporaries_and_directories() {
        let (_temp, shared) = make_shared();
        std::fs::write(shared.path_for("a.txt"), b"abc").expect("write");
        std::fs::write(shared.path_for(".a.txt.tmp.1"), b"partial").expect("write");
        std::fs::create_dir(shared.path_for("nested")).expect("mkdir");

        let files = shared.list().await.expect("list");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].size, 3);
    }
}
