use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::collection::SharedCollection;
use crate::history::HistoryLog;

static DATA_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    ProjectDirs::from("", "rsretrieval", "rsretrieval")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
});

fn default_data_dir() -> &'static str {
    DATA_DIR.to_str().unwrap_or("data")
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的结果数量
    #[arg(short = 'k', long, value_name = "K", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub topk: u32,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "rsretrieval", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，保存图片、索引、元数据和历史记录
    #[arg(short, long, default_value = default_data_dir())]
    pub data_dir: DataDir,
    /// 图片目录，默认为数据目录下的 images
    #[arg(long, value_name = "DIR")]
    pub images_dir: Option<PathBuf>,
    /// CLIP 模型目录，默认为数据目录下的 model
    #[arg(long, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 添加图片到数据集并更新索引
    Add(AddCommand),
    /// 从数据集中删除图片
    Remove(RemoveCommand),
    /// 重新扫描图片目录并重建图片索引
    Rebuild(RebuildCommand),
    /// 使用描述文本构建描述索引
    Captions(CaptionsCommand),
    /// 以文搜图、以图搜图或以图搜描述
    Search(SearchCommand),
    /// 显示数据集统计信息
    Stats(StatsCommand),
    /// 分页列出数据集中的图片
    List(ListCommand),
    /// 查看或清理检索历史
    History(HistoryCommand),
    /// 启动 HTTP 检索服务
    Server(ServerCommand),
}

impl Opts {
    pub fn images_dir(&self) -> PathBuf {
        self.images_dir.clone().unwrap_or_else(|| self.data_dir.images())
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(|| self.data_dir.model())
    }

    pub fn image_collection(&self) -> Arc<SharedCollection> {
        Arc::new(SharedCollection::open(
            "图片索引",
            self.data_dir.image_index(),
            self.data_dir.image_meta(),
        ))
    }

    pub fn caption_collection(&self) -> Arc<SharedCollection> {
        Arc::new(SharedCollection::open(
            "描述索引",
            self.data_dir.caption_index(),
            self.data_dir.caption_meta(),
        ))
    }

    pub fn history(&self) -> HistoryLog {
        HistoryLog::open(self.data_dir.history())
    }
}

#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回默认图片目录
    pub fn images(&self) -> PathBuf {
        self.path.join("images")
    }

    /// 返回图片向量索引的路径
    pub fn image_index(&self) -> PathBuf {
        self.path.join("image.index")
    }

    /// 返回图片元数据的路径
    pub fn image_meta(&self) -> PathBuf {
        self.path.join("image_meta.json")
    }

    /// 返回描述向量索引的路径
    pub fn caption_index(&self) -> PathBuf {
        self.path.join("caption.index")
    }

    /// 返回描述元数据的路径
    pub fn caption_meta(&self) -> PathBuf {
        self.path.join("caption_meta.json")
    }

    /// 返回检索历史的路径
    pub fn history(&self) -> PathBuf {
        self.path.join("history.json")
    }

    /// 返回默认模型目录
    pub fn model(&self) -> PathBuf {
        self.path.join("model")
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
