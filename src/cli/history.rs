use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct HistoryCommand {
    #[command(subcommand)]
    pub action: Option<HistoryAction>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

#[derive(Subcommand, Debug, Clone)]
pub enum HistoryAction {
    /// 按时间从新到旧列出（默认）
    List,
    /// 删除指定时间的记录
    Remove { timestamp: String },
    /// 清空所有记录
    Clear,
}

impl SubCommandExtend for HistoryCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let history = opts.history();
        match self.action.as_ref().unwrap_or(&HistoryAction::List) {
            HistoryAction::List => {
                let records = history.list();
                match self.output_format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
                    OutputFormat::Table => {
                        for record in &records {
                            println!(
                                "{}\t{}\tTOP-{}\t{}",
                                record.timestamp,
                                record.kind.as_str(),
                                record.topk,
                                record.query
                            );
                            for label in &record.results {
                                println!("\t{}", label);
                            }
                        }
                    }
                }
            }
            HistoryAction::Remove { timestamp } => {
                if !history.remove(timestamp)? {
                    bail!("没有时间为 {} 的记录", timestamp);
                }
            }
            HistoryAction::Clear => history.clear()?,
        }
        Ok(())
    }
}
