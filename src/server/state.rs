use std::path::PathBuf;
use std::sync::Arc;

use crate::collection::SharedCollection;
use crate::config::{Opts, SearchOptions};
use crate::dataset::DatasetManager;
use crate::embedding::Embedder;
use crate::error::Error;
use crate::history::HistoryLog;
use crate::retrieval::RetrievalService;

/// 应用状态
pub struct AppState {
    /// 检索服务，模型未加载时为空
    pub retrieval: Option<RetrievalService>,
    /// 图片数据集，持有图片索引
    pub dataset: DatasetManager,
    /// 描述索引
    pub captions: Arc<SharedCollection>,
    /// 检索历史
    pub history: HistoryLog,
    /// 搜索配置选项
    pub search: SearchOptions,
    /// 模型目录，用于提示模型缺失
    pub model_dir: PathBuf,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(opts: &Opts, embedder: Option<Arc<dyn Embedder>>, search: SearchOptions) -> Arc<Self> {
        let dataset = DatasetManager::new(opts.images_dir(), embedder.clone(), opts.image_collection());
        Arc::new(AppState {
            retrieval: embedder.map(RetrievalService::new),
            dataset,
            captions: opts.caption_collection(),
            history: opts.history(),
            search,
            model_dir: opts.model_dir(),
        })
    }

    pub fn images(&self) -> &SharedCollection {
        self.dataset.collection()
    }

    pub fn retrieval(&self) -> Result<&RetrievalService, Error> {
        self.retrieval.as_ref().ok_or_else(|| Error::ResourceMissing {
            what: "嵌入模型",
            path: self.model_dir.clone(),
        })
    }
}
