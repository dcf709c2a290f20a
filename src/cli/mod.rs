mod add;
mod captions;
mod history;
mod list;
mod rebuild;
mod remove;
mod search;
pub mod server;
mod stats;

use std::sync::Arc;

pub use add::*;
pub use captions::*;
pub use history::*;
pub use list::*;
pub use rebuild::*;
pub use remove::*;
pub use search::*;
pub use server::*;
pub use stats::*;

use crate::config::Opts;
use crate::dataset::DatasetManager;
use crate::embedding::{Embedder, load_embedder};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 打开图片数据集，不需要模型的命令传入 `None`
fn open_dataset(opts: &Opts, embedder: Option<Arc<dyn Embedder>>) -> DatasetManager {
    DatasetManager::new(opts.images_dir(), embedder, opts.image_collection())
}

fn open_embedder(opts: &Opts) -> anyhow::Result<Arc<dyn Embedder>> {
    Ok(load_embedder(opts.model_dir())?)
}
