/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use crate::format::payload;

/// Show the manifest and operation lists of a delta payload.
#[derive(Debug, Args)]
pub struct InfoCli {
    /// Delta payload file.
    #[arg(value_name = "FILE")]
    payload: PathBuf,
}

pub fn info_main(cli: &InfoCli) -> Result<()> {
    let data = fs::read(&cli.payload)
        .with_context(|| format!("Failed to read payload: {:?}", cli.payload))?;

    let header = payload::parse_payload_header(&data)
        .context("Failed to parse payload header")?
        .context("Payload is truncated")?;

    println!("metadata_size: {}", header.metadata_size);
    println!(
        "blob_size: {}",
        data.len() as u64 - header.metadata_size,
    );
    print!("{}", payload::describe_manifest(&header.manifest));

    Ok(())
}
