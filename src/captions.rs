//! 描述索引的准备
//!
//! 描述文本来自 RSICD / RSITMD 格式的数据集文件，或每行一条描述的文本文件。

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{info, warn};
use rayon::prelude::*;
use serde::Deserialize;

use crate::collection::Collection;
use crate::embedding::Embedder;
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct Dataset {
    images: Vec<DatasetImage>,
}

#[derive(Deserialize)]
struct DatasetImage {
    #[serde(default)]
    sentences: Vec<Sentence>,
}

#[derive(Deserialize)]
struct Sentence {
    raw: String,
}

/// 从数据集文件中提取所有描述，去除首尾空白和重复项，保持首次出现的顺序
pub fn extract_captions(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    let dataset: Dataset = serde_json::from_slice(&data)
        .map_err(|e| Error::Corrupt { path: path.to_path_buf(), reason: e.to_string() })?;
    let captions = dedup(dataset.images.into_iter().flat_map(|i| i.sentences).map(|s| s.raw));
    info!("从 {} 中提取了 {} 条描述", path.display(), captions.len());
    Ok(captions)
}

/// 读取每行一条的描述文件，空行会被忽略
pub fn read_caption_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(dedup(text.lines().map(str::to_string)))
}

fn dedup(captions: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    captions
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}

/// 计算所有描述的向量，返回集合和跳过的数量
pub fn build_caption_collection(embedder: &dyn Embedder, captions: &[String]) -> (Collection, usize) {
    build_caption_collection_with(embedder, captions, |_| {})
}

/// 同 [`build_caption_collection`]，每处理一条描述调用一次 `progress`
pub fn build_caption_collection_with<F>(
    embedder: &dyn Embedder,
    captions: &[String],
    progress: F,
) -> (Collection, usize)
where
    F: Fn(&str) + Sync,
{
    let embeddings = captions
        .par_iter()
        .map(|caption| {
            let result = embedder.embed_text(caption);
            progress(caption);
            result
        })
        .collect::<Vec<_>>();

    let mut collection = Collection::new(embedder.dimension());
    let mut skipped = 0;
    for (caption, result) in captions.iter().zip(embeddings) {
        match result.and_then(|embedding| collection.push(caption.as_str(), embedding)) {
            Ok(_) => {}
            Err(e) => {
                warn!("跳过描述 {:?}: {}", caption, e);
                skipped += 1;
            }
        }
    }
    (collection, skipped)
}
