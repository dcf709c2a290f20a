use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::task::block_in_place;

use crate::captions::{build_caption_collection_with, extract_captions, read_caption_lines};
use crate::cli::{SubCommandExtend, open_embedder};
use crate::config::Opts;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct CaptionsCommand {
    /// RSICD 格式的数据集 JSON，或每行一条描述的文本文件
    pub source: PathBuf,
}

impl SubCommandExtend for CaptionsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let is_json = self.source.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let captions = if is_json {
            extract_captions(&self.source)?
        } else {
            read_caption_lines(&self.source)?
        };
        if captions.is_empty() {
            bail!("{} 中没有描述文本", self.source.display());
        }

        let embedder = open_embedder(opts)?;
        let pb = ProgressBar::new(captions.len() as u64).with_style(pb_style());
        let (collection, skipped) = block_in_place(|| {
            build_caption_collection_with(embedder.as_ref(), &captions, |_| pb.inc(1))
        });
        pb.finish_and_clear();

        let count = collection.len();
        opts.caption_collection().replace(collection)?;
        info!("描述索引已保存到 {}", opts.data_dir.caption_index().display());

        println!("描述索引中共有 {} 条描述，跳过 {} 条", count, skipped);
        Ok(())
    }
}
