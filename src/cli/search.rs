use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_embedder};
use crate::config::{Opts, SearchOptions};
use crate::embedding::open_image;
use crate::history::{QueryRecord, QueryType};
use crate::retrieval::{RetrievalService, SearchHit};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    /// 检索方式
    #[arg(value_enum)]
    pub mode: SearchMode,
    /// 查询文本，以图检索时为图片路径
    pub query: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
    /// 不记录到检索历史
    #[arg(long)]
    pub no_history: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SearchMode {
    /// 以文搜图
    Text,
    /// 以图搜图
    Image,
    /// 以图搜描述
    Caption,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let k = self.search.topk as usize;
        let service = RetrievalService::new(open_embedder(opts)?);

        let start = Instant::now();
        let (kind, result) = block_in_place(|| -> Result<_> {
            Ok(match self.mode {
                SearchMode::Text => {
                    let images = opts.image_collection();
                    (QueryType::TextToImage, service.search_by_text(&self.query, k, &images)?)
                }
                SearchMode::Image => {
                    let image = open_image(&self.query)?;
                    let images = opts.image_collection();
                    (QueryType::ImageToImage, service.search_by_image(&image, k, &images)?)
                }
                SearchMode::Caption => {
                    let image = open_image(&self.query)?;
                    let captions = opts.caption_collection();
                    (QueryType::ImageToCaption, service.search_by_image(&image, k, &captions)?)
                }
            })
        })?;
        debug!("检索耗时: {:.2}ms", start.elapsed().as_secs_f32() * 1000.);

        if !self.no_history {
            let query = match self.mode {
                SearchMode::Text => self.query.clone(),
                _ => Path::new(&self.query)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| self.query.clone()),
            };
            let labels = result.iter().map(|hit| hit.label.clone());
            opts.history().add(QueryRecord::new(kind, query, k, labels))?;
        }

        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[SearchHit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{:.4}\t{}", hit.score, hit.label);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
