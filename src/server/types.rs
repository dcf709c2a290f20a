use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::retrieval::SearchHit;

/// 文本检索请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct TextSearchRequest {
    /// 查询文本
    pub query: String,
    /// 返回的结果数量，默认使用启动参数
    pub k: Option<usize>,
}

/// 以图检索请求参数
#[derive(TryFromMultipart)]
pub struct ImageSearchRequest {
    #[form_data(limit = "10MiB")]
    pub file: FieldData<Bytes>,
    pub k: Option<usize>,
}

/// 以图检索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct ImageSearchForm {
    /// 查询图片，最大 10 MiB
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 返回的结果数量
    pub k: Option<usize>,
}

/// 检索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 检索耗时，单位为毫秒
    pub time: u64,
    /// 按相似度从高到低排序的结果
    pub result: Vec<SearchHit>,
}

/// 添加图片请求参数
#[derive(TryFromMultipart)]
pub struct AddImagesRequest {
    pub file: Vec<FieldData<Bytes>>,
}

/// 添加图片表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct AddImagesForm {
    /// 上传的图片文件，可以是多张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 分页参数
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// 页码，从 1 开始
    pub page: Option<usize>,
    /// 每页数量，默认 20
    pub per_page: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CollectionStatus {
    pub ready: bool,
    /// 记录数量，未就绪时为空
    pub count: Option<usize>,
    /// 索引中有已删除的文件
    pub needs_rebuild: bool,
}

/// 服务状态
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// 嵌入模型名称，未加载时为空
    pub model: Option<String>,
    pub images: CollectionStatus,
    pub captions: CollectionStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RebuildResponse {
    /// 重建后索引中的图片数量
    pub count: usize,
}
