mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::CliArgs;

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日志（stdout 留给 JSON 输出）
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(cli::run_cli(args))
}
