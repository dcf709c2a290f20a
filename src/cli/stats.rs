use anyhow::Result;
use clap::Parser;

use crate::cli::{OutputFormat, SubCommandExtend, open_dataset};
use crate::config::Opts;
use crate::utils::human_size;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let dataset = open_dataset(opts, None);
        dataset.check_consistency();
        let stats = dataset.stats()?;

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            OutputFormat::Table => {
                println!("图片数量\t{}", stats.total_images);
                println!("总大小\t{}", human_size(stats.total_size));
                for (ext, count) in &stats.format_counts {
                    println!("  .{}\t{}", ext, count);
                }
                match stats.indexed {
                    Some(n) => println!("已索引\t{}", n),
                    None => println!("已索引\t索引未就绪"),
                }
                if stats.needs_rebuild {
                    println!("索引中有已删除的图片，需要重建");
                }
            }
        }
        Ok(())
    }
}
