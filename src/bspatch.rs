/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Binary patch application via the external `bspatch` executable.
//!
//! The patcher reads and writes the partition in place, addressed by
//! position strings: a comma-separated `start:length` pair per extent, where
//! `start` is a byte offset (`-1` for a sparse hole) and the lengths are
//! capped so their sum equals the operation's declared logical length.

use std::{
    io::{self, Write},
    path::Path,
    process::{Command, ExitStatus},
};

use thiserror::Error;
use tracing::debug;

use crate::{format::payload::SPARSE_HOLE, protobuf::delta_update::Extent};

pub const DEFAULT_BSPATCH_PATH: &str = "bspatch";

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0:?} field is missing")]
    MissingField(&'static str),
    #[error("Extents cover {covered} bytes, but the operation declares {declared}")]
    LengthMismatch { declared: u64, covered: u64 },
    #[error("bspatch failed with {0}")]
    PatchFailed(ExitStatus),
    #[error("Failed to spool patch data")]
    SpoolPatch(#[source] io::Error),
    #[error("Failed to run bspatch")]
    Spawn(#[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Serialize `extents` into the patcher's position-string syntax. The last
/// extent may be capped short of its natural block coverage so that the
/// running sum equals `full_length`.
pub fn extents_to_positions_string(
    extents: &[Extent],
    block_size: u64,
    full_length: u64,
) -> Result<String> {
    let mut out = String::new();
    let mut covered = 0u64;

    for extent in extents {
        let start_block = extent.start_block.ok_or(Error::MissingField("start_block"))?;
        let num_blocks = extent.num_blocks.ok_or(Error::MissingField("num_blocks"))?;

        let this_length = (full_length - covered).min(num_blocks * block_size);
        let start = if start_block == SPARSE_HOLE {
            -1i64
        } else {
            (start_block * block_size) as i64
        };

        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(&format!("{start}:{this_length}"));

        covered += this_length;
    }

    if covered != full_length {
        return Err(Error::LengthMismatch {
            declared: full_length,
            covered,
        });
    }

    Ok(out)
}

/// Apply `patch` to `target` in place. The patch data is spooled to a scoped
/// temporary file that is removed on every exit path, including failure.
pub fn apply(
    bspatch_path: &Path,
    target: &Path,
    patch: &[u8],
    input_positions: &str,
    output_positions: &str,
) -> Result<()> {
    let mut patch_file = tempfile::Builder::new()
        .prefix("delta_patch.")
        .tempfile()
        .map_err(Error::SpoolPatch)?;
    patch_file.write_all(patch).map_err(Error::SpoolPatch)?;
    patch_file.flush().map_err(Error::SpoolPatch)?;

    debug!(
        "Patching {target:?}: input positions {input_positions:?}, output positions {output_positions:?}",
    );

    let status = Command::new(bspatch_path)
        .arg(target)
        .arg(target)
        .arg(patch_file.path())
        .arg(input_positions)
        .arg(output_positions)
        .status()
        .map_err(Error::Spawn)?;

    if !status.success() {
        return Err(Error::PatchFailed(status));
    }

    Ok(())
}
