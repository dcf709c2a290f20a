use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, open_dataset};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct RemoveCommand {
    /// 要删除的图片文件名
    #[arg(required = true)]
    pub filenames: Vec<String>,
}

impl SubCommandExtend for RemoveCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let dataset = open_dataset(opts, None);
        for filename in &self.filenames {
            dataset.remove_image(filename)?;
            println!("[OK] 已删除 {}", filename);
        }
        if dataset.collection().needs_rebuild() {
            println!("索引中仍包含已删除的图片，请执行 rebuild 重建索引");
        }
        Ok(())
    }
}
