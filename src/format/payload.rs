/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Delta payload framing.
//!
//! ```text
//! magic:           ASCII "CrAU"
//! format_version:  big-endian u64
//! manifest_length: big-endian u64
//! manifest:        manifest_length bytes (serialized DeltaArchiveManifest)
//! blob region:     per-operation data blobs at their declared data_offset
//! ```

use std::fmt::Write as _;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::{
    protobuf::delta_update::{DeltaArchiveManifest, Extent, InstallOperation},
    util,
};

pub const DELTA_MAGIC: &[u8; 4] = b"CrAU";
pub const DELTA_VERSION: u64 = 1;

const VERSION_SIZE: usize = 8;
const MANIFEST_LENGTH_SIZE: usize = 8;
const HEADER_FIXED_SIZE: usize = DELTA_MAGIC.len() + VERSION_SIZE + MANIFEST_LENGTH_SIZE;

/// `start_block` sentinel for an extent with no backing storage: reads yield
/// zeros, writes are discarded.
pub const SPARSE_HOLE: u64 = u64::MAX;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown magic: {0:?}")]
    UnknownMagic([u8; 4]),
    #[error("Unsupported payload version: {0}")]
    UnsupportedVersion(u64),
    #[error("Manifest length {0} exceeds usize")]
    ManifestTooLarge(u64),
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),
    #[error("{0:?} field is missing")]
    MissingField(&'static str),
    #[error("Failed to parse manifest")]
    Protobuf(#[from] quick_protobuf::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug)]
pub struct PayloadHeader {
    pub manifest: DeltaArchiveManifest,
    /// Bytes of magic + version + manifest length + manifest, i.e. where the
    /// blob region starts.
    pub metadata_size: u64,
}

/// Incrementally parse the payload header from the front of `buffer`.
/// Returns `Ok(None)` while `buffer` does not yet hold the complete header
/// and manifest. Magic and version are validated as soon as the fixed part is
/// available.
pub fn parse_payload_header(buffer: &[u8]) -> Result<Option<PayloadHeader>> {
    if buffer.len() < HEADER_FIXED_SIZE {
        return Ok(None);
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&buffer[..DELTA_MAGIC.len()]);
    if magic != *DELTA_MAGIC {
        return Err(Error::UnknownMagic(magic));
    }

    let version = BigEndian::read_u64(&buffer[DELTA_MAGIC.len()..]);
    if version != DELTA_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let manifest_length = BigEndian::read_u64(&buffer[DELTA_MAGIC.len() + VERSION_SIZE..]);
    let manifest_length_usize = usize::try_from(manifest_length)
        .map_err(|_| Error::ManifestTooLarge(manifest_length))?;
    let metadata_size = HEADER_FIXED_SIZE
        .checked_add(manifest_length_usize)
        .ok_or(Error::ManifestTooLarge(manifest_length))?;

    if buffer.len() < metadata_size {
        return Ok(None);
    }

    let manifest: DeltaArchiveManifest =
        util::read_protobuf(&buffer[HEADER_FIXED_SIZE..metadata_size])?;

    if manifest.block_size == 0 {
        return Err(Error::InvalidBlockSize(0));
    }

    Ok(Some(PayloadHeader {
        manifest,
        metadata_size: metadata_size as u64,
    }))
}

/// Total number of blocks covered by `extents`.
pub fn total_blocks(extents: &[Extent]) -> Result<u64> {
    let mut total = 0u64;

    for extent in extents {
        total += extent.num_blocks.ok_or(Error::MissingField("num_blocks"))?;
    }

    Ok(total)
}

fn describe_extents(extents: &[Extent]) -> String {
    let mut out = String::new();

    for (i, extent) in extents.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match extent.start_block {
            Some(SPARSE_HOLE) => {
                let _ = write!(out, "{{sparse, {}}}", extent.num_blocks.unwrap_or(0));
            }
            start => {
                let _ = write!(
                    out,
                    "{{{}, {}}}",
                    start.unwrap_or(0),
                    extent.num_blocks.unwrap_or(0),
                );
            }
        }
    }

    out
}

fn describe_operation(out: &mut String, index: usize, op: &InstallOperation) {
    let _ = writeln!(out, "  operation({index})");
    let _ = writeln!(out, "    type: {:?}", op.type_pb);
    if let Some(data_offset) = op.data_offset {
        let _ = writeln!(out, "    data_offset: {data_offset}");
    }
    if let Some(data_length) = op.data_length {
        let _ = writeln!(out, "    data_length: {data_length}");
    }
    let _ = writeln!(out, "    src_extents: {}", describe_extents(&op.src_extents));
    if let Some(src_length) = op.src_length {
        let _ = writeln!(out, "    src_length: {src_length}");
    }
    let _ = writeln!(out, "    dst_extents: {}", describe_extents(&op.dst_extents));
    if let Some(dst_length) = op.dst_length {
        let _ = writeln!(out, "    dst_length: {dst_length}");
    }
}

/// Human-readable rendering of a manifest and its operation lists.
pub fn describe_manifest(manifest: &DeltaArchiveManifest) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "block_size: {}", manifest.block_size);
    if let Some(signatures_offset) = manifest.signatures_offset {
        let _ = writeln!(out, "signatures_offset: {signatures_offset}");
    }
    if let Some(signatures_size) = manifest.signatures_size {
        let _ = writeln!(out, "signatures_size: {signatures_size}");
    }

    let _ = writeln!(out, "rootfs operations: {}", manifest.install_operations.len());
    for (i, op) in manifest.install_operations.iter().enumerate() {
        describe_operation(&mut out, i, op);
    }

    let _ = writeln!(
        out,
        "kernel operations: {}",
        manifest.kernel_install_operations.len(),
    );
    for (i, op) in manifest.kernel_install_operations.iter().enumerate() {
        describe_operation(&mut out, manifest.install_operations.len() + i, op);
    }

    out
}
