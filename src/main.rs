use clap::Parser;
use rsretrieval::Opts;
use rsretrieval::cli::SubCommandExtend;
use rsretrieval::config::SubCommand;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Add(config) => config.run(&opts).await,
        SubCommand::Remove(config) => config.run(&opts).await,
        SubCommand::Rebuild(config) => config.run(&opts).await,
        SubCommand::Captions(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Stats(config) => config.run(&opts).await,
        SubCommand::List(config) => config.run(&opts).await,
        SubCommand::History(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
    }
}
