use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::collection::SharedCollection;
use crate::embedding::{Embedder, Embedding, check_text};
use crate::error::{Error, Result};

/// 一条检索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchHit {
    /// 图片文件名或描述文本
    pub label: String,
    /// 余弦相似度
    pub score: f32,
}

/// 检索服务
///
/// 负责把查询转换为向量，在集合中搜索，再把位置转换为标签。
/// 检索本身没有副作用，历史记录由调用方在检索成功后写入。
#[derive(Clone)]
pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
}

impl RetrievalService {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// 文本检索
    pub fn search_by_text(
        &self,
        query: &str,
        k: usize,
        collection: &SharedCollection,
    ) -> Result<Vec<SearchHit>> {
        let query = check_text(query)?;
        check_k(k)?;
        let embedding = self.embedder.embed_text(query)?;
        self.search_by_vector(&embedding, k, collection)
    }

    /// 以图搜图或以图搜描述，取决于传入的集合
    pub fn search_by_image(
        &self,
        image: &DynamicImage,
        k: usize,
        collection: &SharedCollection,
    ) -> Result<Vec<SearchHit>> {
        check_k(k)?;
        let embedding = self.embedder.embed_image(image)?;
        self.search_by_vector(&embedding, k, collection)
    }

    /// 按向量检索，结果顺序与索引返回的顺序完全一致
    ///
    /// 无法解析为标签的位置会被跳过，而不是让整个查询失败。
    pub fn search_by_vector(
        &self,
        query: &Embedding,
        k: usize,
        collection: &SharedCollection,
    ) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let collection = collection.read()?;
        let neighbors = collection.search(query, k)?;

        let hits = neighbors
            .into_iter()
            .filter_map(|n| match collection.label(n.position) {
                Ok(label) => Some(SearchHit { label: label.to_string(), score: n.score }),
                Err(e) => {
                    warn!("跳过失效的索引位置: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!("检索 {} 条结果，耗时 {:.2}ms", hits.len(), start.elapsed().as_secs_f32() * 1000.);
        Ok(hits)
    }
}

fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(Error::invalid_input("返回结果数量必须大于 0"));
    }
    Ok(())
}
