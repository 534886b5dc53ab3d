use clap::{Parser, Subcommand};

use self::{check_config::CheckConfigArg, run::RunArg};

mod check_config;
mod run;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// What mode to run the program in
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Run an evolution
    Run(#[clap(flatten)] RunArg),
    /// Load and validate a configuration file
    CheckConfig(#[clap(flatten)] CheckConfigArg),
}

pub fn run() -> anyhow::Result<()> {
    let args = CommandArgs::parse();
    match args.mode {
        Mode::Run(arg) => run::run(&arg)?,
        Mode::CheckConfig(arg) => check_config::run(&arg)?,
    }
    Ok(())
}
