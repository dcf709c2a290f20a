use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::Result;
use crate::utils::write_json_atomic;

/// 历史记录的最大保留数量
pub const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    #[serde(alias = "文本 → 图像")]
    TextToImage,
    #[serde(alias = "图片 → 图像", alias = "图像 → 图像")]
    ImageToImage,
    #[serde(alias = "图像 → 文本")]
    ImageToCaption,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToImage => "text_to_image",
            Self::ImageToImage => "image_to_image",
            Self::ImageToCaption => "image_to_caption",
        }
    }
}

/// 一次检索的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QueryRecord {
    /// RFC 3339 格式的本地时间，同时作为记录的标识
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: QueryType,
    /// 查询文本，以图搜索时为上传的文件名
    pub query: String,
    pub topk: usize,
    /// 按相似度排序的结果标签
    pub results: Vec<String>,
}

impl QueryRecord {
    pub fn new(
        kind: QueryType,
        query: impl Into<String>,
        topk: usize,
        results: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            kind,
            query: query.into(),
            topk,
            results: results.into_iter().collect(),
        }
    }
}

/// 保存在 JSON 文件中的检索历史
///
/// 文件中按时间从旧到新保存，最多 [`MAX_HISTORY`] 条。
pub struct HistoryLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部记录，文件不存在或无法解析时返回空列表
    ///
    /// 单条无法解析的记录会被跳过，不影响其他记录。
    pub fn load(&self) -> Vec<QueryRecord> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(_) => return vec![],
        };
        let values: Vec<serde_json::Value> = match serde_json::from_slice(&data) {
            Ok(values) => values,
            Err(e) => {
                warn!("无法解析历史记录 {}: {}", self.path.display(), e);
                return vec![];
            }
        };
        values
            .into_iter()
            .filter_map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| warn!("跳过无法解析的历史记录: {}", e))
                    .ok()
            })
            .collect()
    }

    /// 追加一条记录，超出上限时丢弃最旧的记录
    pub fn add(&self, record: QueryRecord) -> Result<Vec<QueryRecord>> {
        let _guard = self.lock.lock();
        let mut history = self.load();
        history.push(record);
        if history.len() > MAX_HISTORY {
            history.drain(..history.len() - MAX_HISTORY);
        }
        self.save(&history)?;
        Ok(history)
    }

    /// 按时间从新到旧列出
    pub fn list(&self) -> Vec<QueryRecord> {
        let mut history = self.load();
        history.sort_by_cached_key(|r| {
            Reverse((parse_timestamp(&r.timestamp), r.timestamp.clone()))
        });
        history
    }

    /// 删除指定时间的记录，返回是否存在
    pub fn remove(&self, timestamp: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut history = self.load();
        let before = history.len();
        history.retain(|r| r.timestamp != timestamp);
        if history.len() == before {
            return Ok(false);
        }
        self.save(&history)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.save(&[])
    }

    fn save(&self, history: &[QueryRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json_atomic(&self.path, &history)
    }
}

/// 解析记录的时间，无法解析的排在最旧
fn parse_timestamp(timestamp: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(t.with_timezone(&Utc));
    }
    // 不带时区的时间按本地时间处理
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|t| Local.from_local_datetime(&t).earliest())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn log() -> (TempDir, HistoryLog) {
        let dir = TempDir::new().unwrap();
        let log = HistoryLog::open(dir.path().join("history.json"));
        (dir, log)
    }

    fn record(i: usize) -> QueryRecord {
        QueryRecord {
            timestamp: format!("2025-01-01T00:00:{:02}.000000+08:00", i % 60),
            kind: QueryType::TextToImage,
            query: format!("query {i}"),
            topk: 5,
            results: vec![format!("{i}.jpg")],
        }
    }

    #[rstest]
    fn test_missing_or_corrupt_file_is_empty(log: (TempDir, HistoryLog)) {
        let (_dir, log) = log;
        assert!(log.load().is_empty());

        fs::write(log.path(), "not json").unwrap();
        assert!(log.load().is_empty());
        // 损坏的文件在下一次写入时被覆盖
        assert_eq!(log.add(record(0)).unwrap().len(), 1);
    }

    #[rstest]
    fn test_add_keeps_newest(log: (TempDir, HistoryLog)) {
        let (_dir, log) = log;
        for i in 0..(MAX_HISTORY + 5) {
            let history = log.add(record(i)).unwrap();
            assert!(history.len() <= MAX_HISTORY);
        }
        let history = log.load();
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].query, "query 5");
        assert_eq!(history[MAX_HISTORY - 1].query, format!("query {}", MAX_HISTORY + 4));
    }

    #[rstest]
    fn test_list_remove_clear(log: (TempDir, HistoryLog)) {
        let (_dir, log) = log;
        for i in 0..3 {
            log.add(record(i)).unwrap();
        }
        let list = log.list();
        assert_eq!(list.iter().map(|r| r.query.as_str()).collect::<Vec<_>>(), [
            "query 2", "query 1", "query 0"
        ]);

        assert!(log.remove(&list[1].timestamp).unwrap());
        assert!(!log.remove(&list[1].timestamp).unwrap());
        assert_eq!(log.load().len(), 2);

        log.clear().unwrap();
        assert!(log.load().is_empty());
    }

    #[rstest]
    fn test_load_records_without_offset(log: (TempDir, HistoryLog)) {
        let (_dir, log) = log;
        let data = r#"[
            {"timestamp": "2025-03-01T09:30:00.123456", "type": "文本 → 图像", "query": "beach",
             "topk": 5, "results": ["beach_1.jpg", "beach_2.jpg"]},
            {"timestamp": "2025-03-01T09:31:00.000001", "type": "图片 → 图像", "query": "port.jpg",
             "topk": 5, "results": ["port_3.jpg"]},
            {"timestamp": "2025-03-01T09:32:00.000001", "type": "图像 → 文本", "query": "farm.tif",
             "topk": 3, "results": ["many green fields"]},
            {"timestamp": "2025-03-01T09:33:00", "type": "unknown", "query": "x", "topk": 1, "results": []}
        ]"#;
        fs::write(log.path(), data).unwrap();

        let history = log.load();
        assert_eq!(history.iter().map(|r| r.kind).collect::<Vec<_>>(), [
            QueryType::TextToImage,
            QueryType::ImageToImage,
            QueryType::ImageToCaption,
        ]);

        let history = log.add(record(0)).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].query, "beach");
        assert_eq!(log.list()[0].query, "farm.tif");
    }

    #[rstest]
    fn test_list_orders_by_instant(log: (TempDir, HistoryLog)) {
        let (_dir, log) = log;
        let mut earlier = record(0);
        earlier.timestamp = "2025-01-01T10:00:00+08:00".to_string();
        earlier.query = "earlier".to_string();
        let mut later = record(1);
        later.timestamp = "2025-01-01T03:00:00+00:00".to_string();
        later.query = "later".to_string();
        log.add(later).unwrap();
        log.add(earlier).unwrap();

        let list = log.list();
        assert_eq!(list[0].query, "later");
        assert_eq!(list[1].query, "earlier");
    }

    #[test]
    fn test_record_format() {
        let record = QueryRecord::new(
            QueryType::ImageToCaption,
            "airport.jpg",
            10,
            ["many planes are parked".to_string()],
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "image_to_caption");
        assert_eq!(value["topk"], 10);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
    }
}
