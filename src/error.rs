//! 检索服务的错误类型
//!
//! 库内部统一使用 [`Error`]，命令行层再转换为 `anyhow::Error`，
//! HTTP 层在 `server::error` 中映射为状态码。

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// 查询文本为空、文件类型不支持、文件过大、图片损坏等
    #[error("无效的输入: {0}")]
    InvalidInput(String),

    /// 索引、元数据或模型文件不存在，检索功能不可用
    #[error("{what} 不可用: {}", path.display())]
    ResourceMissing { what: &'static str, path: PathBuf },

    /// 要删除或读取的文件不存在
    #[error("文件不存在: {0}")]
    NotFound(String),

    /// 元数据中不存在该位置的记录
    #[error("位置 {position} 超出范围，共 {len} 条记录")]
    OutOfRange { position: u64, len: usize },

    #[error("向量维度不匹配: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 模型预处理或推理失败
    #[error("模型错误: {0}")]
    Model(String),

    /// 索引或元数据文件内容无法解析
    #[error("文件已损坏 {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("写入 {} 失败: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn model(msg: impl ToString) -> Self {
        Self::Model(msg.to_string())
    }
}
