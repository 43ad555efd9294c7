//! 留言板：单个 JSON 数组文档的追加、删除与读取。

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{Extension, Form, Json};
use axum::response::Json as JsonResponse;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::atomic::AtomicFile;
use crate::error::{ApiError, ShareError};
use crate::locking::LockRegistry;

const MAX_NAME_CHARS: usize = 50;
const MAX_CONTENT_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub name: String,
    pub content: String,
    /// Display time, `%Y-%m-%d %H:%M:%S` local.
    pub time: String,
    /// Seconds since the epoch, used for ordering.
    #[serde(default)]
    pub timestamp: f64,
}

/// Message list persisted as one document. Every read-modify-write cycle
/// holds the registry lock of the document path.
#[derive(Debug)]
pub struct MessageBoard {
    path: PathBuf,
    locks: Arc<LockRegistry>,
}

impl MessageBoard {
    pub fn new(path: PathBuf, locks: Arc<LockRegistry>) -> Self {
        Self { path, locks }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文档不存在时写入空数组。
    pub async fn ensure_document(&self) -> Result<(), ShareError> {
        let _guard = self.locks.acquire(&self.path).await;
        if fs::try_exists(&self.path).await? {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        self.write_all(&[]).await
    }

    /// Messages, newest first.
    pub async fn list(&self) -> Result<Vec<Message>, ShareError> {
        let _guard = self.locks.acquire(&self.path).await;
        let mut messages = self.read_all().await?;
        messages.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        Ok(messages)
    }

    pub async fn add(&self, name: &str, content: &str) -> Result<Message, ShareError> {
        let name = name.trim();
        let content = content.trim();
        if name.is_empty() || content.is_empty() {
            return Err(ShareError::InvalidInput("name and message are required".into()));
        }
        if name.chars().count() > MAX_NAME_CHARS || content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ShareError::InvalidInput("name or message is too long".into()));
        }

        let now = Local::now();
        let message = Message {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            content: content.to_string(),
            time: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            timestamp: now.timestamp_millis() as f64 / 1000.0,
        };

        let _guard = self.locks.acquire(&self.path).await;
        let mut messages = self.read_all().await?;
        messages.push(message.clone());
        self.write_all(&messages).await?;
        Ok(message)
    }

    /// Returns whether a message with `id` existed.
    pub async fn delete(&self, id: &str) -> Result<bool, ShareError> {
        let _guard = self.locks.acquire(&self.path).await;
        let mut messages = self.read_all().await?;
        let before = messages.len();
        messages.retain(|message| message.id != id);
        if messages.len() == before {
            return Ok(false);
        }
        self.write_all(&messages).await?;
        Ok(true)
    }

    async fn read_all(&self) -> Result<Vec<Message>, ShareError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(messages) => Ok(messages),
            Err(err) => {
                warn!(op = "message", path = ?self.path, error = %err, "unreadable message document, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn write_all(&self, messages: &[Message]) -> Result<(), ShareError> {
        let content = serde_json::to_vec_pretty(messages)
            .map_err(|err| ShareError::Io(io::Error::other(err.to_string())))?;
        let mut atomic = AtomicFile::create(&self.path).await?;
        if let Err(err) = atomic.file_mut().write_all(&content).await {
            atomic.discard().await;
            return Err(err.into());
        }
        atomic.publish().await?;
        Ok(())
    }
}

#[derive(Deserialize)]
pub(crate) struct MessageForm {
    name: String,
    message: String,
}

#[derive(Deserialize)]
pub(crate) struct DeleteMessageRequest {
    message_id: Option<String>,
}

/// 新增留言。
pub async fn add_message(
    Extension(board): Extension<Arc<MessageBoard>>,
    form: Result<Form<MessageForm>, FormRejection>,
) -> Result<JsonResponse<Value>, ApiError> {
    let Form(form) = form?;
    let message = board.add(&form.name, &form.message).await.map_err(|err| {
        if !matches!(err, ShareError::InvalidInput(_)) {
            error!(op = "message", error = %err, "failed to add message");
        }
        ApiError::from(err)
    })?;
    info!(op = "message", id = message.id, name = message.name, "message added");
    Ok(JsonResponse(json!({ "success": true, "id": message.id })))
}

/// 删除留言。
pub async fn delete_message(
    Extension(board): Extension<Arc<MessageBoard>>,
    payload: Result<Json<DeleteMessageRequest>, JsonRejection>,
) -> Result<JsonResponse<Value>, ApiError> {
    let Json(payload) = payload?;
    let Some(message_id) = payload.message_id.filter(|id| !id.is_empty()) else {
        return Err(ApiError::BadRequest("message_id is required".into()));
    };
    let deleted = board.delete(&message_id).await.map_err(|err| {
        error!(op = "message", message_id, error = %err, "failed to delete message");
        ApiError::from(err)
    })?;
    if deleted {
        info!(op = "message", message_id, "message deleted");
    }
    Ok(JsonResponse(json!({ "success": true, "deleted": deleted })))
}

/// 留言列表（新的在前）。
pub async fn list_messages(
    Extension(board): Extension<Arc<MessageBoard>>,
) -> Result<JsonResponse<Vec<Message>>, ApiError> {
    Ok(JsonResponse(board.list().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_board() -> (tempfile::TempDir, Arc<MessageBoard>) {
        let temp = tempdir().expect("tempdir");
        let board = MessageBoard::new(
            temp.path().join("messages.json"),
            Arc::new(LockRegistry::new()),
        );
        (temp, Arc::new(board))
    }

    #[tokio::test]
    async fn ensure_document_creates_empty_array() {
        let (_temp, board) = make_board();
        board.ensure_document().await.expect("ensure");
        let content = std::fs::read_to_string(board.path()).expect("read");
        assert_eq!(content.trim(), "[]");
    }

    #[tokio::test]
    async fn add_then_delete_roundtrip() {
        let (_temp, board) = make_board();
        let first = board.add("  alice ", "你好").await.expect("add");
        let second = board.add("bob", "second").await.expect("add");
        assert_eq!(first.name, "alice");

        let listed = board.list().await.expect("list");
        assert_eq!(listed.len(), 2);
        assert!(listed[0].timestamp >= listed[1].timestamp);

        assert!(board.delete(&first.id).await.expect("delete"));
        assert!(!board.delete(&first.id).await.expect("delete"));
        let listed = board.list().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);

        let raw = std::fs::read_to_string(board.path()).expect("read");
        assert!(!raw.contains("你好"));
    }

    #[tokio::test]
    async fn non_ascii_is_stored_verbatim() {
        let (_temp, board) = make_board();
        board.add("张三", "留言内容").await.expect("add");
        let raw = std::fs::read_to_string(board.path()).expect("read");
        assert!(raw.contains("留言内容"));
    }

    #[tokio::test]
    async fn blank_fields_are_rejected() {
        let (_temp, board) = make_board();
        assert!(matches!(
            board.add("   ", "hi").await,
            Err(ShareError::InvalidInput(_))
        ));
        assert!(matches!(
            board.add("name", "x".repeat(1001).as_str()).await,
            Err(ShareError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_document_reads_as_empty() {
        let (_temp, board) = make_board();
        std::fs::write(board.path(), b"{not json").expect("write");
        assert!(board.list().await.expect("list").is_empty());
        board.add("carol", "recovered").await.expect("add");
        assert_eq!(board.list().await.expect("list").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_are_not_lost() {
        let (_temp, board) = make_board();
        let mut tasks = Vec::new();
        for i in 0..20 {
            let board = board.clone();
            tasks.push(tokio::spawn(async move {
                board.add("writer", &format!("message {i}")).await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("add");
        }
        assert_eq!(board.list().await.expect("list").len(), 20);
    }
}
