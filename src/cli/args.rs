/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use crate::cli::{apply, info};

#[derive(Debug, Subcommand)]
pub enum Command {
    Apply(apply::ApplyCli),
    Info(info::InfoCli),
}

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log verbose debug messages.
    #[arg(short, long, global = true)]
    pub debug: bool,
}

fn init_logging(debug: bool) {
    let default_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug);

    match cli.command {
        Command::Apply(c) => apply::apply_main(&c),
        Command::Info(c) => info::info_main(&c),
    }
}
