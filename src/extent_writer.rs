/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Writers that place a byte stream into a list of disk extents.
//!
//! The base [`DirectExtentWriter`] routes bytes to each extent in order using
//! positional I/O. [`ZeroPadExtentWriter`] pads the final partial block with
//! zeros, and [`BzipExtentWriter`] decompresses its input before handing it
//! down. The variants compose by value, so a fully built chain is statically
//! dispatched.

use std::{fs::File, io, os::unix::fs::FileExt};

use bzip2::{Decompress, Status};
use thiserror::Error;

use crate::{format::payload::SPARSE_HOLE, protobuf::delta_update::Extent, util};

const DECOMPRESS_BUF_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0:?} field is missing")]
    MissingField(&'static str),
    #[error("Extent list provides {capacity} bytes, but more were written")]
    WritePastExtents { capacity: u64 },
    #[error("bzip2 input continues after end of stream")]
    DataAfterStreamEnd,
    #[error("bzip2 stream ended prematurely")]
    TruncatedBzipStream,
    #[error("bzip2 stream error")]
    Bzip(#[from] bzip2::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// A sink for one install operation's byte stream. `init` declares where the
/// bytes go, `write` may be called any number of times, and `end` settles the
/// byte contract (padding, stream termination).
pub trait ExtentWriter {
    fn init(&mut self, extents: &[Extent], block_size: u64) -> Result<()>;
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn end(&mut self) -> Result<()>;
}

/// Writes bytes into the extents in order with `pwrite`-style positional I/O.
/// Bytes routed to a sparse-hole extent are discarded.
pub struct DirectExtentWriter<'a> {
    file: &'a File,
    block_size: u64,
    /// (start_block, byte length) per extent.
    extents: Vec<(u64, u64)>,
    extent_index: usize,
    /// Bytes already written into the current extent.
    extent_written: u64,
}

impl<'a> DirectExtentWriter<'a> {
    pub fn new(file: &'a File) -> Self {
        Self {
            file,
            block_size: 0,
            extents: Vec::new(),
            extent_index: 0,
            extent_written: 0,
        }
    }
}

impl ExtentWriter for DirectExtentWriter<'_> {
    fn init(&mut self, extents: &[Extent], block_size: u64) -> Result<()> {
        self.block_size = block_size;
        self.extents.clear();

        for extent in extents {
            let start_block = extent.start_block.ok_or(Error::MissingField("start_block"))?;
            let num_blocks = extent.num_blocks.ok_or(Error::MissingField("num_blocks"))?;

            self.extents.push((start_block, num_blocks * block_size));
        }

        self.extent_index = 0;
        self.extent_written = 0;

        Ok(())
    }

    fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let Some(&(start_block, extent_len)) = self.extents.get(self.extent_index) else {
                let capacity = self.extents.iter().map(|&(_, len)| len).sum();
                return Err(Error::WritePastExtents { capacity });
            };

            let remaining = extent_len - self.extent_written;
            let to_write = (data.len() as u64).min(remaining) as usize;

            if start_block != SPARSE_HOLE {
                let offset = start_block * self.block_size + self.extent_written;
                self.file.write_all_at(&data[..to_write], offset)?;
            }

            self.extent_written += to_write as u64;
            data = &data[to_write..];

            if self.extent_written == extent_len {
                self.extent_index += 1;
                self.extent_written = 0;
            }
        }

        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Wraps another writer and pads the last partial block with zeros on `end`.
pub struct ZeroPadExtentWriter<W> {
    inner: W,
    block_size: u64,
    received: u64,
}

impl<W: ExtentWriter> ZeroPadExtentWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            block_size: 0,
            received: 0,
        }
    }
}

impl<W: ExtentWriter> ExtentWriter for ZeroPadExtentWriter<W> {
    fn init(&mut self, extents: &[Extent], block_size: u64) -> Result<()> {
        self.block_size = block_size;
        self.received = 0;
        self.inner.init(extents, block_size)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.received += data.len() as u64;
        self.inner.write(data)
    }

    fn end(&mut self) -> Result<()> {
        let mut padding = self.received % self.block_size;
        if padding != 0 {
            padding = self.block_size - padding;
        }

        while padding > 0 {
            let chunk = padding.min(util::ZEROS.len() as u64) as usize;
            self.inner.write(&util::ZEROS[..chunk])?;
            padding -= chunk as u64;
        }

        self.inner.end()
    }
}

/// Wraps another writer, decompressing a bzip2 stream on the way down.
/// Partial input across calls is handled; the stream must be complete by the
/// time `end` is called.
pub struct BzipExtentWriter<W> {
    inner: W,
    decompress: Decompress,
    out_buf: Vec<u8>,
    stream_ended: bool,
}

impl<W: ExtentWriter> BzipExtentWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            decompress: Decompress::new(false),
            out_buf: vec![0u8; DECOMPRESS_BUF_SIZE],
            stream_ended: false,
        }
    }
}

impl<W: ExtentWriter> ExtentWriter for BzipExtentWriter<W> {
    fn init(&mut self, extents: &[Extent], block_size: u64) -> Result<()> {
        self.inner.init(extents, block_size)
    }

    fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if self.stream_ended {
                return Err(Error::DataAfterStreamEnd);
            }

            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();

            let status = self.decompress.decompress(data, &mut self.out_buf)?;

            let consumed = (self.decompress.total_in() - in_before) as usize;
            let produced = (self.decompress.total_out() - out_before) as usize;

            if produced > 0 {
                self.inner.write(&self.out_buf[..produced])?;
            }

            data = &data[consumed..];

            if matches!(status, Status::StreamEnd) {
                self.stream_ended = true;
            } else if consumed == 0 && produced == 0 {
                // Decoder is stalled until the next call delivers more input.
                break;
            }
        }

        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.stream_ended {
            return Err(Error::TruncatedBzipStream);
        }

        self.inner.end()
    }
}
