//! 路由装配、CORS 与安全响应头。

use axum::body::Body as AxumBody;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware, response::Response};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span, warn};

use crate::state::AppContext;
use crate::{files, messages, upload};

/// Builds the application router.
///
/// JSON endpoints are gzip-compressed; downloads are streamed untouched so the
/// advertised `Content-Length` stays exact.
pub fn build_router(ctx: &AppContext, cors_origins: Option<&str>) -> Router {
    let api = Router::new()
        .route(
            "/upload_chunk",
            post(upload::upload_chunk).layer(DefaultBodyLimit::max(ctx.upload.max_upload_size)),
        )
        .route("/cancel_upload", post(upload::cancel_upload))
        .route("/cleanup_temp", post(upload::cleanup_temp))
        .route("/api/upload/status", get(upload::upload_status))
        .route("/api/files", get(files::list_files))
        .route("/delete_file", post(files::delete_file))
        .route("/message", post(messages::add_message))
        .route("/delete_message", post(messages::delete_message))
        .route("/api/messages", get(messages::list_messages))
        .layer(CompressionLayer::new());

    let downloads = Router::new().route("/download/{filename}", get(files::download_file));

    let mut app = api
        .merge(downloads)
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(ctx.shared.clone()))
        .layer(Extension(ctx.staging.clone()))
        .layer(Extension(ctx.merge.clone()))
        .layer(Extension(ctx.reaper.clone()))
        .layer(Extension(ctx.messages.clone()))
        .layer(Extension(ctx.upload.clone()));

    if let Some(cors_layer) = build_cors_layer(cors_origins) {
        app = app.layer(cors_layer);
    }
    app
}

/// 构建 CORS Layer（逗号分隔的来源列表）。
pub fn build_cors_layer(cors_origins: Option<&str>) -> Option<CorsLayer> {
    let origins = cors_origins?
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}
