//! 分片上传、取消、暂存清理与上传状态查询处理器。

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Json, Multipart, Query};
use axum::extract::multipart::Field;
use axum::response::Json as JsonResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::UploadConfig;
use crate::error::{ApiError, ShareError};
use crate::merge::{FinalizeOutcome, MergeEngine};
use crate::reaper::TempReaper;
use crate::staging::{ChunkStore, SessionState, validate_chunk_position, validate_upload_id};

/// A fully parsed `/upload_chunk` form.
#[derive(Debug)]
pub(crate) struct ChunkUpload {
    chunk: Bytes,
    chunk_index: u64,
    total_chunks: u64,
    upload_id: String,
    filename: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CancelUploadRequest {
    upload_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadStatusQuery {
    upload_id: String,
    total_chunks: u64,
}

/// 接收单个分片；最后一片到达时同步完成合并。
pub async fn upload_chunk(
    Extension(staging): Extension<Arc<ChunkStore>>,
    Extension(merge): Extension<Arc<MergeEngine>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<Value>, ApiError> {
    let form = read_chunk_form(multipart?).await?;
    let ChunkUpload {
        chunk,
        chunk_index,
        total_chunks,
        upload_id,
        filename,
    } = form;

    let result = async {
        staging
            .stage_chunk(&upload_id, chunk_index, total_chunks, &chunk)
            .await?;
        merge
            .maybe_finalize(&upload_id, chunk_index, total_chunks, &filename)
            .await
    }
    .await;

    match result {
        Ok(FinalizeOutcome::Pending) => Ok(JsonResponse(json!({ "success": true }))),
        Ok(FinalizeOutcome::Finalized { filename, size }) => Ok(JsonResponse(json!({
            "success": true,
            "filename": filename,
            "size": size,
        }))),
        Err(err) => {
            error!(
                op = "upload",
                upload_id,
                chunk_index,
                total_chunks,
                error = %err,
                "upload chunk failed"
            );
            Err(err.into())
        }
    }
}

/// 取消上传：删除会话暂存目录。会话不存在同样返回成功。
pub async fn cancel_upload(
    Extension(staging): Extension<Arc<ChunkStore>>,
    payload: Result<Json<CancelUploadRequest>, JsonRejection>,
) -> Result<JsonResponse<Value>, ApiError> {
    let Json(payload) = payload?;
    let Some(upload_id) = payload.upload_id else {
        return Ok(JsonResponse(json!({ "success": true })));
    };
    if validate_upload_id(&upload_id).is_err() {
        return Ok(JsonResponse(json!({ "success": true })));
    }
    match staging.remove_session(&upload_id, "cancel").await {
        Ok(removed) => {
            info!(op = "cancel", upload_id, removed, "upload cancelled");
            Ok(JsonResponse(json!({ "success": true })))
        }
        Err(err) => {
            error!(op = "cancel", upload_id, error = %err, "cancel failed");
            Err(ShareError::from(err).into())
        }
    }
}

/// 手动触发一次暂存目录清理。
pub async fn cleanup_temp(
    Extension(reaper): Extension<Arc<TempReaper>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
) -> Result<JsonResponse<Value>, ApiError> {
    let removed = reaper.sweep(upload.temp_max_age).await.map_err(|err| {
        error!(op = "reap", error = %err, "manual staging sweep failed");
        ApiError::from(err)
    })?;
    Ok(JsonResponse(json!({ "success": true, "removed": removed })))
}

/// Which chunks of a session are staged, so a client can resend only the
/// missing ones.
pub async fn upload_status(
    query: Result<Query<UploadStatusQuery>, QueryRejection>,
    Extension(staging): Extension<Arc<ChunkStore>>,
) -> Result<JsonResponse<SessionState>, ApiError> {
    let Query(query) = query?;
    validate_chunk_position(0, query.total_chunks)?;
    let state = staging.inspect(&query.upload_id, query.total_chunks).await?;
    Ok(JsonResponse(state))
}

async fn read_chunk_form(mut multipart: Multipart) -> Result<ChunkUpload, ApiError> {
    let mut chunk = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut upload_id = None;
    let mut filename = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "chunk" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(err.body_text()))?;
                chunk = Some(bytes);
            }
            "chunkIndex" => chunk_index = Some(parse_number(field, "chunkIndex").await?),
            "totalChunks" => total_chunks = Some(parse_number(field, "totalChunks").await?),
            "uploadId" => upload_id = Some(read_text(field).await?),
            "filename" => filename = Some(read_text(field).await?),
            _ => {}
        }
    }

    let missing = |field: &str| ApiError::BadRequest(format!("{field} is required"));
    Ok(ChunkUpload {
        chunk: chunk.ok_or_else(|| missing("chunk"))?,
        chunk_index: chunk_index.ok_or_else(|| missing("chunkIndex"))?,
        total_chunks: total_chunks.ok_or_else(|| missing("totalChunks"))?,
        upload_id: upload_id.ok_or_else(|| missing("uploadId"))?,
        filename: filename.ok_or_else(|| missing("filename"))?,
    })
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))
}

async fn parse_number(field: Field<'_>, name: &str) -> Result<u64, ApiError> {
    read_text(field)
        .await?
        .trim()
        .parse::<u64>()
        .map_err(|_| ApiError::BadRequest(format!("{name} must be a non-negative integer")))
}
