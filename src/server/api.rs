use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum_typed_multipart::TypedMultipart;
use log::{info, warn};
use tokio::task::block_in_place;

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::collection::SharedCollection;
use crate::dataset::{AddReport, DatasetStats, ImagePage, UploadedFile};
use crate::embedding::decode_image;
use crate::error::Error;
use crate::history::{QueryRecord, QueryType};
use crate::metrics;
use crate::retrieval::{RetrievalService, SearchHit};

/// 执行一次检索，成功后写入历史记录
fn run_search<F>(
    state: &AppState,
    kind: QueryType,
    query: String,
    k: Option<usize>,
    search: F,
) -> Result<Json<SearchResponse>>
where
    F: FnOnce(&RetrievalService, usize) -> crate::error::Result<Vec<SearchHit>>,
{
    let service = state.retrieval()?;
    let k = k.unwrap_or(state.search.topk as usize);

    let start = Instant::now();
    let result = block_in_place(|| search(service, k))?;
    let elapsed = start.elapsed();

    metrics::observe_search(kind, elapsed.as_secs_f32(), result.first().map(|hit| hit.score));

    let record = QueryRecord::new(kind, query, k, result.iter().map(|hit| hit.label.clone()));
    if let Err(e) = state.history.add(record) {
        warn!("写入检索历史失败: {}", e);
    }

    Ok(Json(SearchResponse { time: elapsed.as_millis() as u64, result }))
}

fn search_uploaded(
    state: &AppState,
    kind: QueryType,
    data: ImageSearchRequest,
    collection: &SharedCollection,
) -> Result<Json<SearchResponse>> {
    let query = data.file.metadata.file_name.clone().unwrap_or_default();
    info!("正在搜索上传图片: {}", query);
    run_search(state, kind, query, data.k, |service, k| {
        let image = decode_image(&data.file.contents)?;
        service.search_by_image(&image, k, collection)
    })
}

/// 服务状态
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, body = StatusResponse),
    )
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = |c: &SharedCollection| CollectionStatus {
        ready: c.is_ready(),
        count: c.len(),
        needs_rebuild: c.needs_rebuild(),
    };
    Json(StatusResponse {
        model: state.retrieval.as_ref().map(|r| r.embedder().name().to_string()),
        images: status(state.images()),
        captions: status(&state.captions),
    })
}

/// 以文搜图
#[utoipa::path(
    post,
    path = "/search/text",
    request_body = TextSearchRequest,
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_text_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<TextSearchRequest>,
) -> Result<Json<SearchResponse>> {
    let query = data.query.clone();
    run_search(&state, QueryType::TextToImage, query, data.k, |service, k| {
        service.search_by_text(&data.query, k, state.images())
    })
}

/// 以图搜图
#[utoipa::path(
    post,
    path = "/search/image",
    request_body(content = ImageSearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_image_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<ImageSearchRequest>,
) -> Result<Json<SearchResponse>> {
    search_uploaded(&state, QueryType::ImageToImage, data, state.images())
}

/// 以图搜描述
#[utoipa::path(
    post,
    path = "/search/caption",
    request_body(content = ImageSearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_caption_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<ImageSearchRequest>,
) -> Result<Json<SearchResponse>> {
    search_uploaded(&state, QueryType::ImageToCaption, data, &state.captions)
}

/// 检索历史，按时间从新到旧
#[utoipa::path(
    get,
    path = "/history",
    responses(
        (status = 200, body = Vec<QueryRecord>),
    )
)]
pub async fn history_handler(State(state): State<Arc<AppState>>) -> Json<Vec<QueryRecord>> {
    Json(state.history.list())
}

/// 清空检索历史
#[utoipa::path(delete, path = "/history")]
pub async fn clear_history_handler(State(state): State<Arc<AppState>>) -> Result<StatusCode> {
    state.history.clear()?;
    Ok(StatusCode::NO_CONTENT)
}

/// 删除一条检索历史
#[utoipa::path(
    delete,
    path = "/history/{timestamp}",
    params(("timestamp" = String, Path, description = "记录的时间"))
)]
pub async fn remove_history_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(timestamp): UrlPath<String>,
) -> Result<StatusCode> {
    if !state.history.remove(&timestamp)? {
        return Err(Error::NotFound(timestamp).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// 数据集统计
#[utoipa::path(
    get,
    path = "/dataset/stats",
    responses(
        (status = 200, body = DatasetStats),
    )
)]
pub async fn dataset_stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<DatasetStats>> {
    Ok(Json(block_in_place(|| state.dataset.stats())?))
}

/// 分页列出数据集中的图片
#[utoipa::path(
    get,
    path = "/dataset/images",
    params(ListQuery),
    responses(
        (status = 200, body = ImagePage),
    )
)]
pub async fn list_images_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ImagePage>> {
    let (page, per_page) = (query.page.unwrap_or(1), query.per_page.unwrap_or(20));
    Ok(Json(block_in_place(|| state.dataset.list_page(page, per_page))?))
}

/// 添加图片到数据集
#[utoipa::path(
    post,
    path = "/dataset/images",
    request_body(content = AddImagesForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = AddReport),
    )
)]
pub async fn add_images_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<AddImagesRequest>,
) -> Result<Json<AddReport>> {
    let files = data
        .file
        .into_iter()
        .map(|f| UploadedFile::new(f.metadata.file_name.unwrap_or_default(), f.contents.to_vec()))
        .collect::<Vec<_>>();
    let report = block_in_place(|| state.dataset.add_images(&files))?;
    metrics::inc_images_added(report.added);
    Ok(Json(report))
}

/// 删除数据集中的图片，索引需要重建后才会更新
#[utoipa::path(
    delete,
    path = "/dataset/images/{filename}",
    params(("filename" = String, Path, description = "图片文件名"))
)]
pub async fn remove_image_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(filename): UrlPath<String>,
) -> Result<StatusCode> {
    state.dataset.remove_image(&filename)?;
    metrics::inc_images_removed();
    Ok(StatusCode::NO_CONTENT)
}

/// 重建图片索引
#[utoipa::path(
    post,
    path = "/dataset/rebuild",
    responses(
        (status = 200, body = RebuildResponse),
    )
)]
pub async fn rebuild_handler(State(state): State<Arc<AppState>>) -> Result<Json<RebuildResponse>> {
    let count = block_in_place(|| state.dataset.rebuild_index())?;
    metrics::inc_rebuild();
    Ok(Json(RebuildResponse { count }))
}

/// 获取数据集中的图片
#[utoipa::path(
    get,
    path = "/images/{filename}",
    params(("filename" = String, Path, description = "图片文件名"))
)]
pub async fn image_file_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(filename): UrlPath<String>,
) -> Result<impl IntoResponse> {
    let path = state.dataset.image_path(&filename)?;
    let data = tokio::fs::read(&path).await?;
    Ok(([(header::CONTENT_TYPE, content_type(&path))], data))
}

/// Prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> Result<impl IntoResponse> {
    let text = metrics::gather_text()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text))
}

fn content_type(path: &Path) -> &'static str {
    let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("tif" | "tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}
