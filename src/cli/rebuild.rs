use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_dataset, open_embedder};
use crate::config::Opts;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct RebuildCommand {}

impl SubCommandExtend for RebuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let dataset = open_dataset(opts, Some(open_embedder(opts)?));

        let total = dataset.stats()?.total_images;
        let pb = ProgressBar::new(total as u64).with_style(pb_style());
        let count = block_in_place(|| {
            dataset.rebuild_index_with(|name| {
                pb.set_message(name.to_string());
                pb.inc(1);
            })
        })?;
        pb.finish_with_message("索引重建完成");

        println!("索引中共有 {} 张图片", count);
        Ok(())
    }
}
