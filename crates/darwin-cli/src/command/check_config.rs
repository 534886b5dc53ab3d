use std::path::PathBuf;

use darwin_cli::{config::DEFAULT_CONFIG_PATH, util};

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct CheckConfigArg {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

pub(crate) fn run(arg: &CheckConfigArg) -> anyhow::Result<()> {
    let CheckConfigArg { config } = arg;
    let loaded = util::load_config(config)?;
    println!("{}: ok", config.display());
    println!("{}", loaded.summary());
    println!("workers: {}", loaded.workers());
    if let Some(output) = &loaded.metrics.output {
        println!("metrics output: {}", output.display());
    }
    Ok(())
}
