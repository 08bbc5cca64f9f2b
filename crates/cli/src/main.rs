mod cli;
mod input;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    oagr_observability::init_with(args.log_format);
    cli::dispatch(args).await
}
