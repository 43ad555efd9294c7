//! 共享文件的列表、下载与删除处理器。

use axum::body::Body as AxumBody;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Json, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::stream::StreamExt;
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::error::{ApiError, ShareError};
use crate::storage::{SharedDir, SharedFile};

#[derive(Serialize)]
pub(crate) struct FileListResponse {
    files: Vec<SharedFile>,
    total: usize,
}

#[derive(Deserialize)]
pub(crate) struct DeleteFileRequest {
    filename: Option<String>,
}

/// 共享文件列表（新的在前）。
pub async fn list_files(
    Extension(shared): Extension<Arc<SharedDir>>,
) -> Result<JsonResponse<FileListResponse>, ApiError> {
    let files = shared.list().await?;
    let total = files.len();
    Ok(JsonResponse(FileListResponse { files, total }))
}

/// 以附件形式流式下载文件。
///
/// The path lock is moved into the body stream, so a delete or merge on the
/// same name waits until the transfer has finished or the client went away.
pub async fn download_file(
    filename: Result<Path<String>, PathRejection>,
    Extension(shared): Extension<Arc<SharedDir>>,
) -> Result<Response, ApiError> {
    let Path(filename) = filename?;
    let opened = match shared.open_for_download(&filename).await {
        Ok(opened) => opened,
        Err(ShareError::NotFound(name)) => {
            warn!(op = "download", name, "file not found");
            return Err(ApiError::NotFound("file not found".into()));
        }
        Err(err) => {
            error!(op = "download", filename, error = %err, "download failed");
            return Err(err.into());
        }
    };

    let size = opened.metadata.len();
    let mime = mime_guess::from_path(&opened.name).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&size.to_string())
            .map_err(|_| ApiError::Internal("failed to build headers".into()))?,
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&opened.name))
            .map_err(|_| ApiError::Internal("failed to build headers".into()))?,
    );
    if let Ok(modified) = opened.metadata.modified() {
        headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("failed to build headers".into()))?,
        );
    }

    info!(op = "download", name = opened.name, size, "download started");
    let guard = opened.guard;
    let stream = ReaderStream::new(opened.file).map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

/// 删除共享文件；文件不存在时返回 400。
pub async fn delete_file(
    Extension(shared): Extension<Arc<SharedDir>>,
    payload: Result<Json<DeleteFileRequest>, JsonRejection>,
) -> Result<JsonResponse<Value>, ApiError> {
    let Json(payload) = payload?;
    let Some(filename) = payload.filename.filter(|name| !name.is_empty()) else {
        return Err(ApiError::BadRequest("filename is required".into()));
    };
    match shared.delete(&filename).await {
        Ok(true) => Ok(JsonResponse(json!({ "success": true }))),
        Ok(false) => Err(ApiError::BadRequest("nothing to delete".into())),
        Err(err) => {
            error!(op = "delete", filename, error = %err, "delete failed");
            Err(err.into())
        }
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
