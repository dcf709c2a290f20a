use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::{StagedFile, stage_json};

/// 元数据记录
///
/// `filename` 在图片索引中是文件名，在描述索引中是描述文本本身。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// 在向量索引中的位置
    pub id: u64,
    pub filename: String,
}

/// 与向量索引一一对应的有序元数据列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStore {
    entries: Vec<IndexEntry>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 获取指定位置的标签
    pub fn get(&self, position: u64) -> Result<&str> {
        self.entries
            .get(position as usize)
            .map(|e| e.filename.as_str())
            .ok_or(Error::OutOfRange { position, len: self.entries.len() })
    }

    /// 追加一条记录，返回分配的位置
    pub fn append(&mut self, label: impl Into<String>) -> u64 {
        let id = self.entries.len() as u64;
        self.entries.push(IndexEntry { id, filename: label.into() });
        id
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.filename.as_str())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ResourceMissing { what: "元数据", path: path.to_path_buf() });
        }
        let data = fs::read(path)?;
        let entries: Vec<IndexEntry> = serde_json::from_slice(&data)
            .map_err(|e| Error::Corrupt { path: path.to_path_buf(), reason: e.to_string() })?;

        // 顺序即位置，id 必须和下标一致
        if let Some((i, e)) = entries.iter().enumerate().find(|(i, e)| e.id != *i as u64) {
            return Err(Error::Corrupt {
                path: path.to_path_buf(),
                reason: format!("第 {} 条记录的 id 为 {}", i, e.id),
            });
        }

        debug!("加载元数据 {}: {} 条记录", path.display(), entries.len());
        Ok(Self { entries })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.stage(path.as_ref())?.commit()
    }

    pub(crate) fn stage(&self, path: &Path) -> Result<StagedFile> {
        stage_json(path, &self.entries)
    }
}
