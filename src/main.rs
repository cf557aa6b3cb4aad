use anyhow::{Context, Result};
use clap::Parser;
use lexcall_lib::cli::{self, Cli};
use lexcall_lib::config::AppConfig;
use lexcall_lib::{init_logging, AppState};

fn main() -> Result<()> {
    let args = Cli::parse();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    init_logging(&config.log_directive);

    let state = AppState::init(config);
    let output = cli::execute(args.command, &state)?;
    println!("{}", output);

    Ok(())
}
