/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The streaming delta performer. A caller pushes payload bytes through
//! [`DeltaPerformer::write`]; the performer parses the framing, executes
//! install operations against the opened partitions as their data becomes
//! available, and checkpoints durable resume state after each operation.
//!
//! Every byte that leaves the internal buffer passes through
//! [`DeltaPerformer::discard_buffer_head`] exactly once, in payload order, so
//! the hash accumulator's state always equals the hash of the payload prefix
//! consumed so far. That equivalence is what makes the stored hash context a
//! valid resume point.

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    bspatch, crypto,
    extent_writer::{self, BzipExtentWriter, DirectExtentWriter, ExtentWriter, ZeroPadExtentWriter},
    format::payload::{self, SPARSE_HOLE},
    hasher::{self, HashCalculator},
    prefs::{
        self, Prefs, MANIFEST_METADATA_SIZE, UPDATE_CHECK_RESPONSE_HASH,
        UPDATE_STATE_NEXT_DATA_OFFSET, UPDATE_STATE_NEXT_OPERATION, UPDATE_STATE_OPERATION_INVALID,
        UPDATE_STATE_SHA256_CONTEXT, UPDATE_STATE_SIGNED_SHA256_CONTEXT,
    },
    protobuf::delta_update::{mod_InstallOperation::Type, DeltaArchiveManifest, InstallOperation},
    terminator::Terminator,
};

pub const DEFAULT_PUBLIC_KEY_PATH: &str = "/usr/share/update_engine/update-payload-key.pub.pem";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Partition already open: {0:?}")]
    AlreadyOpen(PathBuf),
    #[error("Target partition is not open")]
    NotOpen,
    #[error("Failed to open partition {0:?}")]
    OpenPartition(PathBuf, #[source] io::Error),
    #[error("Performer already closed")]
    Closed,
    #[error("close() called while {0} bytes are still buffered")]
    PendingBuffer(usize),
    #[error("Payload format error")]
    Format(#[from] payload::Error),
    #[error(
        "Operation {index} requires data at offset {data_offset}, \
         but the stream was already consumed up to {buffer_offset}"
    )]
    DataAlreadyConsumed {
        index: usize,
        data_offset: u64,
        buffer_offset: u64,
    },
    #[error("Operation {index} data at offset {data_offset} is not at the buffer head ({buffer_offset})")]
    MisalignedData {
        index: usize,
        data_offset: u64,
        buffer_offset: u64,
    },
    #[error("Operation {index} declares {data_length} data bytes, but only {buffered} are buffered")]
    ShortBuffer {
        index: usize,
        data_length: u64,
        buffered: u64,
    },
    #[error("{0:?} field is missing")]
    MissingField(&'static str),
    #[error("MOVE reads {src_blocks} blocks but writes {dst_blocks}")]
    MoveSizeMismatch { src_blocks: u64, dst_blocks: u64 },
    #[error("Signature blob already extracted")]
    DuplicateSignature,
    #[error("Signature size {size} does not match operation data length {data_length}")]
    SignatureSizeMismatch { size: u64, data_length: u64 },
    #[error("Download hash mismatch: expected {expected}, actual {actual}")]
    DownloadHashMismatch { expected: String, actual: String },
    #[error("Download size mismatch: expected {expected}, actual {actual}")]
    DownloadSizeMismatch { expected: u64, actual: u64 },
    #[error("Payload hash was never finalized")]
    NotFinalized,
    #[error("No signature data was extracted from the payload")]
    MissingSignature,
    #[error("Signed hash context was never captured")]
    MissingSignedContext,
    #[error("Inconsistent resume state: {0}")]
    InvalidResumeState(&'static str),
    #[error("Extent writer error")]
    ExtentWriter(#[from] extent_writer::Error),
    #[error("Patch error")]
    Patch(#[from] bspatch::Error),
    #[error("Hash error")]
    Hash(#[from] hasher::Error),
    #[error("Progress store error")]
    Prefs(#[from] prefs::Error),
    #[error("Crypto error")]
    Crypto(#[from] crypto::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// An operation is idempotent if interrupting and repeating it cannot corrupt
/// state. Operations that read no source extents only ever overwrite their
/// destination with the same bytes.
fn is_idempotent_operation(op: &InstallOperation) -> bool {
    op.src_extents.is_empty()
}

struct Partition {
    file: File,
    path: PathBuf,
}

pub struct DeltaPerformer<'a, P: Prefs> {
    prefs: &'a P,
    terminator: &'a Terminator,
    bspatch_path: PathBuf,
    rootfs: Option<Partition>,
    kernel: Option<Partition>,
    /// Not-yet-consumed payload bytes.
    buffer: Vec<u8>,
    /// Total bytes consumed from the start of the blob region.
    buffer_offset: u64,
    /// `buffer_offset` at the last checkpoint; `None` before the first one.
    last_updated_buffer_offset: Option<u64>,
    manifest: DeltaArchiveManifest,
    manifest_valid: bool,
    manifest_metadata_size: u64,
    block_size: u64,
    next_operation_num: usize,
    hash_calculator: HashCalculator,
    signed_hash_context: Option<String>,
    signatures_message_data: Vec<u8>,
    /// Resume only: blob-region bytes that were consumed (and hashed) before
    /// the interruption and must be dropped from the re-delivered stream.
    skip_unhashed: u64,
    resuming: bool,
    closed: bool,
}

impl<'a, P: Prefs> DeltaPerformer<'a, P> {
    pub fn new(prefs: &'a P, terminator: &'a Terminator) -> Self {
        Self {
            prefs,
            terminator,
            bspatch_path: PathBuf::from(bspatch::DEFAULT_BSPATCH_PATH),
            rootfs: None,
            kernel: None,
            buffer: Vec::new(),
            buffer_offset: 0,
            last_updated_buffer_offset: None,
            manifest: DeltaArchiveManifest::default(),
            manifest_valid: false,
            manifest_metadata_size: 0,
            block_size: 0,
            next_operation_num: 0,
            hash_calculator: HashCalculator::new(),
            signed_hash_context: None,
            signatures_message_data: Vec::new(),
            skip_unhashed: 0,
            resuming: false,
            closed: false,
        }
    }

    /// Override the patch executable, which defaults to `bspatch` on `PATH`.
    pub fn set_bspatch_path(&mut self, path: &Path) {
        self.bspatch_path = path.to_owned();
    }

    pub fn open_rootfs(&mut self, path: &Path) -> Result<()> {
        if let Some(partition) = &self.rootfs {
            return Err(Error::AlreadyOpen(partition.path.clone()));
        }
        self.rootfs = Some(Self::open_partition(path)?);
        Ok(())
    }

    pub fn open_kernel(&mut self, path: &Path) -> Result<()> {
        if let Some(partition) = &self.kernel {
            return Err(Error::AlreadyOpen(partition.path.clone()));
        }
        self.kernel = Some(Self::open_partition(path)?);
        Ok(())
    }

    fn open_partition(path: &Path) -> Result<Partition> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::OpenPartition(path.to_owned(), e))?;

        Ok(Partition {
            file,
            path: path.to_owned(),
        })
    }

    fn partition(&self, is_kernel: bool) -> Result<&Partition> {
        let partition = if is_kernel { &self.kernel } else { &self.rootfs };
        partition.as_ref().ok_or(Error::NotOpen)
    }

    /// The finalized payload digest, available after [`Self::close`].
    pub fn digest(&self) -> Option<&[u8; 32]> {
        self.hash_calculator.digest()
    }

    pub fn next_operation_num(&self) -> usize {
        self.next_operation_num
    }

    /// The single chokepoint for byte consumption: feeds the head of the
    /// buffer to the hash accumulator, then removes it.
    fn discard_buffer_head(&mut self, count: usize) {
        self.hash_calculator.update(&self.buffer[..count]);
        self.buffer.drain(..count);
    }

    fn operation(&self, index: usize) -> InstallOperation {
        let rootfs_ops = self.manifest.install_operations.len();
        if index < rootfs_ops {
            self.manifest.install_operations[index].clone()
        } else {
            self.manifest.kernel_install_operations[index - rootfs_ops].clone()
        }
    }

    /// Push payload bytes. Performs as many operations as the data received
    /// so far allows, checkpointing after each one. Returns the number of
    /// bytes accepted, which is always `bytes.len()` on success.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }

        let count = bytes.len();
        let mut bytes = bytes;

        if self.manifest_valid && self.skip_unhashed > 0 {
            let skip = self.skip_unhashed.min(bytes.len() as u64) as usize;
            bytes = &bytes[skip..];
            self.skip_unhashed -= skip as u64;
        }

        self.buffer.extend_from_slice(bytes);

        if !self.manifest_valid {
            let Some(header) = payload::parse_payload_header(&self.buffer)? else {
                // Not enough bytes for the header and manifest yet.
                return Ok(count);
            };

            if self.resuming && header.metadata_size != self.manifest_metadata_size {
                return Err(Error::InvalidResumeState("manifest-metadata-size"));
            }

            self.manifest = header.manifest;
            self.manifest_metadata_size = header.metadata_size;
            self.block_size = u64::from(self.manifest.block_size);
            self.manifest_valid = true;

            if self.resuming {
                // The restored hash context already covers the metadata and
                // the consumed blob prefix; drop both without re-hashing.
                self.buffer.drain(..self.manifest_metadata_size as usize);
                let skip = self.skip_unhashed.min(self.buffer.len() as u64) as usize;
                self.buffer.drain(..skip);
                self.skip_unhashed -= skip as u64;
            } else {
                self.discard_buffer_head(self.manifest_metadata_size as usize);
                if let Err(e) = self
                    .prefs
                    .set_i64(MANIFEST_METADATA_SIZE, self.manifest_metadata_size as i64)
                {
                    warn!("Unable to save the manifest metadata size: {e}");
                }
            }
        }

        let total_operations =
            self.manifest.install_operations.len() + self.manifest.kernel_install_operations.len();

        while self.next_operation_num < total_operations {
            let op = self.operation(self.next_operation_num);
            if !self.can_perform_install_operation(&op)? {
                break;
            }

            let _exit_unblocker = self.terminator.scoped_unblocker();

            if self.next_operation_num % 1000 == 0 || self.next_operation_num + 1 == total_operations
            {
                info!(
                    "Performing operation {}/{}",
                    self.next_operation_num + 1,
                    total_operations,
                );
            }

            let is_kernel = self.next_operation_num >= self.manifest.install_operations.len();

            // If about to start a non-idempotent operation, mark the update
            // non-resumable before the first block is written, so an
            // interruption mid-operation forces a clean restart.
            if !is_idempotent_operation(&op) {
                self.terminator.set_exit_blocked(true);
                Self::reset_update_progress(self.prefs)?;
            }

            match op.type_pb {
                Type::REPLACE | Type::REPLACE_BZ => {
                    self.perform_replace_operation(&op, is_kernel)?
                }
                Type::MOVE => self.perform_move_operation(&op, is_kernel)?,
                Type::BSDIFF => self.perform_bsdiff_operation(&op, is_kernel)?,
            }

            self.next_operation_num += 1;
            self.checkpoint_update_progress()?;
        }

        Ok(count)
    }

    /// Whether the next operation's data is fully buffered. MOVE needs no
    /// data blob and is always ready. An operation whose data starts below
    /// `buffer_offset` needs bytes that were already discarded, which can
    /// only mean the payload is inconsistent.
    fn can_perform_install_operation(&self, op: &InstallOperation) -> Result<bool> {
        if op.type_pb == Type::MOVE {
            return Ok(true);
        }

        let data_offset = op.data_offset.ok_or(Error::MissingField("data_offset"))?;
        let data_length = op.data_length.ok_or(Error::MissingField("data_length"))?;

        if data_offset < self.buffer_offset {
            return Err(Error::DataAlreadyConsumed {
                index: self.next_operation_num,
                data_offset,
                buffer_offset: self.buffer_offset,
            });
        }

        Ok(data_offset + data_length <= self.buffer_offset + self.buffer.len() as u64)
    }

    fn require_buffer_head(&self, op: &InstallOperation) -> Result<(u64, usize)> {
        let data_offset = op.data_offset.ok_or(Error::MissingField("data_offset"))?;
        let data_length = op.data_length.ok_or(Error::MissingField("data_length"))?;

        // Operations are densely packed in payload order, so after consuming
        // everything before this operation, its blob is exactly at the head.
        if self.buffer_offset != data_offset {
            return Err(Error::MisalignedData {
                index: self.next_operation_num,
                data_offset,
                buffer_offset: self.buffer_offset,
            });
        }
        if (self.buffer.len() as u64) < data_length {
            return Err(Error::ShortBuffer {
                index: self.next_operation_num,
                data_length,
                buffered: self.buffer.len() as u64,
            });
        }

        Ok((data_offset, data_length as usize))
    }

    fn is_signature_operation(&self, op: &InstallOperation) -> bool {
        op.type_pb == Type::REPLACE
            && self.manifest.signatures_offset.is_some()
            && self.manifest.signatures_offset == op.data_offset
    }

    fn perform_replace_operation(&mut self, op: &InstallOperation, is_kernel: bool) -> Result<()> {
        let (_, data_length) = self.require_buffer_head(op)?;

        if self.is_signature_operation(op) {
            self.extract_signature_message(op)?;
        }

        {
            let partition = self.partition(is_kernel)?;
            let data = &self.buffer[..data_length];

            if op.type_pb == Type::REPLACE_BZ {
                let mut writer = BzipExtentWriter::new(ZeroPadExtentWriter::new(
                    DirectExtentWriter::new(&partition.file),
                ));
                writer.init(&op.dst_extents, self.block_size)?;
                writer.write(data)?;
                writer.end()?;
            } else {
                let mut writer = ZeroPadExtentWriter::new(DirectExtentWriter::new(&partition.file));
                writer.init(&op.dst_extents, self.block_size)?;
                writer.write(data)?;
                writer.end()?;
            }
        }

        self.buffer_offset += data_length as u64;
        self.discard_buffer_head(data_length);

        Ok(())
    }

    fn perform_move_operation(&mut self, op: &InstallOperation, is_kernel: bool) -> Result<()> {
        // No sliding window: the payload generator must not emit overlapping
        // source and destination extents.
        let src_blocks = payload::total_blocks(&op.src_extents)?;
        let dst_blocks = payload::total_blocks(&op.dst_extents)?;
        if src_blocks != dst_blocks {
            return Err(Error::MoveSizeMismatch {
                src_blocks,
                dst_blocks,
            });
        }

        let mut buf = vec![0u8; (dst_blocks * self.block_size) as usize];
        let partition = self.partition(is_kernel)?;

        let mut offset = 0usize;
        for extent in &op.src_extents {
            let start_block = extent.start_block.ok_or(Error::MissingField("start_block"))?;
            let num_blocks = extent.num_blocks.ok_or(Error::MissingField("num_blocks"))?;
            let len = (num_blocks * self.block_size) as usize;

            // A sparse source reads as zeros, which the scratch buffer
            // already holds.
            if start_block != SPARSE_HOLE {
                partition
                    .file
                    .read_exact_at(&mut buf[offset..offset + len], start_block * self.block_size)?;
            }
            offset += len;
        }

        let mut offset = 0usize;
        for extent in &op.dst_extents {
            let start_block = extent.start_block.ok_or(Error::MissingField("start_block"))?;
            let num_blocks = extent.num_blocks.ok_or(Error::MissingField("num_blocks"))?;
            let len = (num_blocks * self.block_size) as usize;

            if start_block != SPARSE_HOLE {
                partition
                    .file
                    .write_all_at(&buf[offset..offset + len], start_block * self.block_size)?;
            }
            offset += len;
        }

        Ok(())
    }

    fn perform_bsdiff_operation(&mut self, op: &InstallOperation, is_kernel: bool) -> Result<()> {
        let (_, data_length) = self.require_buffer_head(op)?;

        let src_length = op.src_length.ok_or(Error::MissingField("src_length"))?;
        let dst_length = op.dst_length.ok_or(Error::MissingField("dst_length"))?;

        let input_positions =
            bspatch::extents_to_positions_string(&op.src_extents, self.block_size, src_length)?;
        let output_positions =
            bspatch::extents_to_positions_string(&op.dst_extents, self.block_size, dst_length)?;

        let partition = self.partition(is_kernel)?;
        bspatch::apply(
            &self.bspatch_path,
            &partition.path,
            &self.buffer[..data_length],
            &input_positions,
            &output_positions,
        )?;

        if dst_length % self.block_size != 0 {
            // The patcher only writes dst_length bytes; zero the unused tail
            // of the final destination block.
            let last_extent = op
                .dst_extents
                .last()
                .ok_or(Error::MissingField("dst_extents"))?;
            let start_block = last_extent
                .start_block
                .ok_or(Error::MissingField("start_block"))?;
            let num_blocks = last_extent
                .num_blocks
                .ok_or(Error::MissingField("num_blocks"))?;

            if start_block != SPARSE_HOLE {
                let end_byte = (start_block + num_blocks) * self.block_size;
                let begin_byte = end_byte - (self.block_size - dst_length % self.block_size);
                let zeros = vec![0u8; (end_byte - begin_byte) as usize];
                partition.file.write_all_at(&zeros, begin_byte)?;
            }
        }

        self.buffer_offset += data_length as u64;
        self.discard_buffer_head(data_length);

        Ok(())
    }

    fn extract_signature_message(&mut self, op: &InstallOperation) -> Result<()> {
        let signatures_size = self
            .manifest
            .signatures_size
            .ok_or(Error::MissingField("signatures_size"))?;
        let data_length = op.data_length.ok_or(Error::MissingField("data_length"))?;

        if signatures_size != data_length {
            return Err(Error::SignatureSizeMismatch {
                size: signatures_size,
                data_length,
            });
        }
        if !self.signatures_message_data.is_empty() {
            return Err(Error::DuplicateSignature);
        }

        self.signatures_message_data = self.buffer[..signatures_size as usize].to_vec();

        // The signed hash covers exactly the payload prefix before the
        // signature bytes, so snapshot the context before they are consumed.
        let context = self.hash_calculator.get_context()?;
        if let Err(e) = self
            .prefs
            .set_string(UPDATE_STATE_SIGNED_SHA256_CONTEXT, &context)
        {
            warn!("Unable to store the signed hash context: {e}");
        }
        self.signed_hash_context = Some(context);

        info!(
            "Extracted signature data of size {signatures_size} at {}",
            self.buffer_offset,
        );

        Ok(())
    }

    /// Stamp durable progress after a completed operation. The "next
    /// operation" pointer only becomes valid after the hash context and data
    /// offset matching it are durable; a crash in between leaves the update
    /// unresumable but never inconsistent.
    fn checkpoint_update_progress(&mut self) -> Result<()> {
        self.terminator.set_exit_blocked(true);

        if self.last_updated_buffer_offset != Some(self.buffer_offset) {
            Self::reset_update_progress(self.prefs)?;
            let context = self.hash_calculator.get_context()?;
            self.prefs.set_string(UPDATE_STATE_SHA256_CONTEXT, &context)?;
            self.prefs
                .set_i64(UPDATE_STATE_NEXT_DATA_OFFSET, self.buffer_offset as i64)?;
            self.last_updated_buffer_offset = Some(self.buffer_offset);
        }

        self.prefs
            .set_i64(UPDATE_STATE_NEXT_OPERATION, self.next_operation_num as i64)?;

        Ok(())
    }

    /// Mark the stored update state as not resumable.
    pub fn reset_update_progress(prefs: &P) -> Result<()> {
        prefs.set_i64(UPDATE_STATE_NEXT_OPERATION, UPDATE_STATE_OPERATION_INVALID)?;
        Ok(())
    }

    /// Whether the stored state allows resuming an update whose payload hash
    /// is `update_check_response_hash`. Read-only preflight; errors count as
    /// "no".
    pub fn can_resume_update(prefs: &P, update_check_response_hash: &[u8]) -> bool {
        match Self::check_resume_state(prefs, update_check_response_hash) {
            Ok(resumable) => resumable,
            Err(e) => {
                warn!("Failed to read resume state: {e}");
                false
            }
        }
    }

    fn check_resume_state(prefs: &P, update_check_response_hash: &[u8]) -> Result<bool> {
        let Some(next_operation) = prefs.get_i64(UPDATE_STATE_NEXT_OPERATION)? else {
            return Ok(false);
        };
        if next_operation == UPDATE_STATE_OPERATION_INVALID || next_operation <= 0 {
            return Ok(false);
        }

        let Some(interrupted_hash) = prefs.get_string(UPDATE_CHECK_RESPONSE_HASH)? else {
            return Ok(false);
        };
        if interrupted_hash.is_empty()
            || interrupted_hash != STANDARD.encode(update_check_response_hash)
        {
            return Ok(false);
        }

        let Some(next_data_offset) = prefs.get_i64(UPDATE_STATE_NEXT_DATA_OFFSET)? else {
            return Ok(false);
        };
        if next_data_offset < 0 {
            return Ok(false);
        }

        let Some(context) = prefs.get_string(UPDATE_STATE_SHA256_CONTEXT)? else {
            return Ok(false);
        };
        if context.is_empty() {
            return Ok(false);
        }

        let Some(metadata_size) = prefs.get_i64(MANIFEST_METADATA_SIZE)? else {
            return Ok(false);
        };

        Ok(metadata_size > 0)
    }

    /// Restore counters and hash contexts from the progress store. The caller
    /// then re-delivers the payload from byte 0; the manifest is re-parsed
    /// and the already-consumed blob prefix is dropped without re-hashing.
    /// Only valid on a fresh performer, after a successful
    /// [`Self::can_resume_update`] preflight.
    pub fn prime_update_state(&mut self) -> Result<()> {
        if self.manifest_valid || self.buffer_offset > 0 {
            return Err(Error::InvalidResumeState("performer is not fresh"));
        }

        let next_operation = self
            .prefs
            .get_i64(UPDATE_STATE_NEXT_OPERATION)?
            .ok_or(Error::InvalidResumeState("update-state-next-operation"))?;
        if next_operation <= 0 {
            return Err(Error::InvalidResumeState("update-state-next-operation"));
        }

        let metadata_size = self
            .prefs
            .get_i64(MANIFEST_METADATA_SIZE)?
            .ok_or(Error::InvalidResumeState("manifest-metadata-size"))?;
        if metadata_size <= 0 {
            return Err(Error::InvalidResumeState("manifest-metadata-size"));
        }

        let next_data_offset = self
            .prefs
            .get_i64(UPDATE_STATE_NEXT_DATA_OFFSET)?
            .ok_or(Error::InvalidResumeState("update-state-next-data-offset"))?;
        if next_data_offset < 0 {
            return Err(Error::InvalidResumeState("update-state-next-data-offset"));
        }

        let context = self
            .prefs
            .get_string(UPDATE_STATE_SHA256_CONTEXT)?
            .ok_or(Error::InvalidResumeState("update-state-sha256-context"))?;
        self.hash_calculator.set_context(&context)?;

        if let Some(signed_context) = self.prefs.get_string(UPDATE_STATE_SIGNED_SHA256_CONTEXT)? {
            if !signed_context.is_empty() {
                self.signed_hash_context = Some(signed_context);
            }
        }

        self.next_operation_num = next_operation as usize;
        self.manifest_metadata_size = metadata_size as u64;
        self.buffer_offset = next_data_offset as u64;
        self.last_updated_buffer_offset = Some(self.buffer_offset);
        self.skip_unhashed = self.buffer_offset;
        self.resuming = true;

        info!(
            "Resuming at operation {next_operation}, blob offset {}",
            self.buffer_offset,
        );

        Ok(())
    }

    /// Finalize the payload hash and close the partitions. Fails if buffered
    /// bytes remain, which indicates a truncated payload.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if !self.buffer.is_empty() {
            return Err(Error::PendingBuffer(self.buffer.len()));
        }

        self.hash_calculator.finalize()?;
        self.rootfs = None;
        self.kernel = None;
        self.closed = true;

        Ok(())
    }

    /// Verify the applied payload: download hash, download size, and the
    /// embedded signature. Skips the signature check with a warning if the
    /// public key file does not exist.
    pub fn verify_payload(
        &self,
        public_key_path: Option<&Path>,
        expected_hash: &[u8],
        expected_size: u64,
    ) -> Result<()> {
        let key_path = public_key_path.unwrap_or(Path::new(DEFAULT_PUBLIC_KEY_PATH));
        info!("Verifying delta payload. Public key path: {key_path:?}");

        let digest = self.hash_calculator.digest().ok_or(Error::NotFinalized)?;
        if digest.as_slice() != expected_hash {
            return Err(Error::DownloadHashMismatch {
                expected: hex::encode(expected_hash),
                actual: hex::encode(digest),
            });
        }

        let actual_size = self.manifest_metadata_size + self.buffer_offset;
        if expected_size != actual_size {
            return Err(Error::DownloadSizeMismatch {
                expected: expected_size,
                actual: actual_size,
            });
        }

        if !key_path.exists() {
            warn!("Not verifying signed delta payload: missing public key {key_path:?}");
            return Ok(());
        }

        if self.signatures_message_data.is_empty() {
            return Err(Error::MissingSignature);
        }

        let key = crypto::read_pem_public_key(key_path)?;

        let signed_context = self
            .signed_hash_context
            .as_deref()
            .ok_or(Error::MissingSignedContext)?;
        let mut signed_hasher = HashCalculator::new();
        signed_hasher.set_context(signed_context)?;
        signed_hasher.finalize()?;
        let signed_digest = *signed_hasher.digest().ok_or(Error::NotFinalized)?;

        crypto::verify_signature(&self.signatures_message_data, &signed_digest, &key)?;

        Ok(())
    }
}
