use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::task::block_in_place;
use walkdir::WalkDir;

use crate::cli::{SubCommandExtend, open_dataset, open_embedder};
use crate::config::Opts;
use crate::dataset::{AddReport, UploadedFile};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// 图片文件或图片所在目录
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// 每批读入内存的图片数量
    #[arg(long, value_name = "SIZE", default_value_t = 64)]
    pub batch_size: usize,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let dataset = open_dataset(opts, Some(open_embedder(opts)?));

        let files = self.paths.iter().flat_map(|path| scan(path)).collect::<Vec<_>>();
        info!("共找到 {} 个文件", files.len());

        let pb = ProgressBar::new(files.len() as u64).with_style(pb_style());
        let mut total = AddReport::default();
        for batch in files.chunks(self.batch_size.max(1)) {
            let uploads = batch.iter().map(|path| read_upload(path)).collect::<Result<Vec<_>>>()?;
            let report = block_in_place(|| dataset.add_images(&uploads))?;
            pb.inc(batch.len() as u64);
            total.added += report.added;
            total.failed.extend(report.failed);
        }
        pb.finish_and_clear();

        for failure in &total.failed {
            eprintln!("[ERR] {}: {}", failure.filename, failure.reason);
        }
        println!("成功添加 {} 张图片，失败 {} 张", total.added, total.failed.len());
        Ok(())
    }
}

/// 展开目录，只扫描第一层
fn scan(path: &Path) -> Vec<PathBuf> {
    WalkDir::new(path)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn read_upload(path: &Path) -> Result<UploadedFile> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("无效的路径: {}", path.display()))?;
    Ok(UploadedFile::new(name, fs::read(path)?))
}
