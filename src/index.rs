use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytemuck::cast_slice;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::embedding::{Embedding, inner_product};
use crate::error::{Error, Result};
use crate::utils::StagedFile;

/// 索引文件头部的魔数
const MAGIC: &[u8; 8] = b"RSFLAT01";
/// 超过这个数量的向量时，使用 rayon 并行计算内积
const PARALLEL_THRESHOLD: usize = 4096;

/// 一条检索结果
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// 向量在索引中的插入位置
    pub position: u64,
    /// 内积相似度
    pub score: f32,
}

// 分数越高越靠前，分数相同时位置越小越靠前
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

/// 只保留最好的 k 个结果
struct TopK {
    heap: BinaryHeap<Reverse<Neighbor>>,
    k: usize,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(k + 1), k }
    }

    #[inline(always)]
    fn push(&mut self, neighbor: Neighbor) {
        if self.heap.len() == self.k {
            // 堆顶是当前最差的结果
            match self.heap.peek() {
                Some(Reverse(worst)) if neighbor > *worst => {
                    self.heap.pop();
                }
                _ => return,
            }
        }
        self.heap.push(Reverse(neighbor));
    }

    /// 按分数从高到低输出
    fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec().into_iter().map(|Reverse(n)| n).collect()
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    dim: u32,
    len: u64,
}

/// 精确的内积索引，对所有向量做暴力扫描
///
/// 向量只能追加，第 i 个加入的向量的位置就是 i。
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: vec![] }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 返回指定位置的向量
    pub fn vector(&self, position: u64) -> Option<&[f32]> {
        let start = (position as usize).checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// 按顺序追加向量，任意一个维度不匹配时不做任何修改
    pub fn add(&mut self, vectors: &[Embedding]) -> Result<()> {
        if let Some(v) = vectors.iter().find(|v| v.dim() != self.dim) {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: v.dim() });
        }
        self.data.reserve(vectors.len() * self.dim);
        for v in vectors {
            self.data.extend_from_slice(v.as_slice());
        }
        Ok(())
    }

    /// 搜索内积最大的 k 个向量，结果按分数从高到低排列
    ///
    /// 索引为空时返回空结果；k 大于向量数量时返回全部向量。
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(Error::invalid_input("k 必须大于 0"));
        }
        if query.dim() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.dim() });
        }
        if self.is_empty() {
            return Ok(vec![]);
        }

        let k = k.min(self.len());
        let q = query.as_slice();

        let topk = if self.len() >= PARALLEL_THRESHOLD {
            self.data
                .par_chunks_exact(self.dim)
                .enumerate()
                .fold(
                    || TopK::new(k),
                    |mut topk, (i, v)| {
                        topk.push(Neighbor { position: i as u64, score: inner_product(q, v) });
                        topk
                    },
                )
                .reduce(
                    || TopK::new(k),
                    |mut a, b| {
                        b.heap.into_iter().for_each(|Reverse(n)| a.push(n));
                        a
                    },
                )
        } else {
            let mut topk = TopK::new(k);
            for (i, v) in self.data.chunks_exact(self.dim).enumerate() {
                topk.push(Neighbor { position: i as u64, score: inner_product(q, v) });
            }
            topk
        };

        Ok(topk.into_sorted_vec())
    }

    /// 保存索引，先写入临时文件再替换，不会留下写了一半的索引
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.stage(path.as_ref())?.commit()
    }

    /// 写入临时文件，由调用方决定何时替换
    pub(crate) fn stage(&self, path: &Path) -> Result<StagedFile> {
        debug!("保存索引 {}: {} 条向量", path.display(), self.len());
        StagedFile::write(path, |file| {
            let mut writer = BufWriter::new(file);
            writer.write_all(MAGIC)?;
            let header = Header { dim: self.dim as u32, len: self.len() as u64 };
            bincode::serialize_into(&mut writer, &header).map_err(std::io::Error::other)?;
            writer.write_all(cast_slice(&self.data))?;
            writer.flush()
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ResourceMissing { what: "向量索引", path: path.to_path_buf() });
        }
        let corrupt = |reason: String| Error::Corrupt { path: path.to_path_buf(), reason };

        let mut reader = BufReader::new(File::open(path)?);
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(|e| corrupt(e.to_string()))?;
        if &magic != MAGIC {
            return Err(corrupt("不是向量索引文件".to_string()));
        }
        let header: Header =
            bincode::deserialize_from(&mut reader).map_err(|e| corrupt(e.to_string()))?;

        let mut bytes = vec![];
        reader.read_to_end(&mut bytes)?;
        let expected = header.len as usize * header.dim as usize * size_of::<f32>();
        if bytes.len() != expected {
            return Err(corrupt(format!("数据长度 {}，期望 {}", bytes.len(), expected)));
        }
        // Vec<u8> 不保证 f32 对齐，这里复制一次
        let data = bytemuck::pod_collect_to_vec::<u8, f32>(&bytes);

        debug!("加载索引 {}: {} 条向量", path.display(), header.len);
        Ok(Self { dim: header.dim as usize, data })
    }
}
