use anyhow::Result;
use clap::Parser;

use crate::cli::{OutputFormat, SubCommandExtend, open_dataset};
use crate::config::Opts;
use crate::utils::human_size;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 页码，从 1 开始
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// 每页数量
    #[arg(long, default_value_t = 20)]
    pub per_page: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let page = open_dataset(opts, None).list_page(self.page, self.per_page)?;

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&page)?),
            OutputFormat::Table => {
                for image in &page.items {
                    println!(
                        "{}\t{}\t{}",
                        image.modified.format("%Y-%m-%d %H:%M:%S"),
                        human_size(image.size),
                        image.filename
                    );
                }
                println!("第 {}/{} 页，共 {} 张图片", page.page, page.total_pages, page.total);
            }
        }
        Ok(())
    }
}
