mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::status_handler,
        api::search_text_handler,
        api::search_image_handler,
        api::search_caption_handler,
        api::history_handler,
        api::clear_history_handler,
        api::remove_history_handler,
        api::dataset_stats_handler,
        api::list_images_handler,
        api::add_images_handler,
        api::remove_image_handler,
        api::rebuild_handler,
        api::image_file_handler,
        api::metrics_handler,
    ),
    components(schemas(types::ImageSearchForm, types::AddImagesForm,))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(api::status_handler))
        .route("/search/text", post(api::search_text_handler))
        .route("/search/image", post(api::search_image_handler))
        .route("/search/caption", post(api::search_caption_handler))
        .route("/history", get(api::history_handler).delete(api::clear_history_handler))
        .route("/history/{timestamp}", delete(api::remove_history_handler))
        .route("/dataset/stats", get(api::dataset_stats_handler))
        .route("/dataset/images", get(api::list_images_handler).post(api::add_images_handler))
        .route("/dataset/images/{filename}", delete(api::remove_image_handler))
        .route("/dataset/rebuild", post(api::rebuild_handler))
        .route("/images/{filename}", get(api::image_file_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：单个文件 10M，整个请求 100M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 100))
        .with_state(state)
}
