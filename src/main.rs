mod case_id;
mod cli;
mod commands;
mod config;
mod gallery;
mod markers;
mod matrix;
mod model;
mod render;
mod tools;
mod util;
mod volume;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert(args) => commands::convert::run(args),
        Commands::Inventory(args) => commands::inventory::run(args),
        Commands::Register(args) => commands::register::run(args),
        Commands::CoregisterMni(args) => commands::mni::run(args),
        Commands::Gallery(args) => commands::gallery::run(args),
        Commands::Demographics(args) => commands::demographics::run(args),
        Commands::Summarise(args) => commands::summarise::run(args),
        Commands::Status(args) => commands::status::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
