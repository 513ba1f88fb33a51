/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs::File,
    io::Read,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Args;
use tracing::{info, warn};

use crate::{
    bspatch,
    performer::DeltaPerformer,
    prefs::{FilePrefs, Prefs, UPDATE_CHECK_RESPONSE_HASH},
    terminator::Terminator,
};

const WRITE_CHUNK_SIZE: usize = 128 * 1024;

/// Apply a delta payload to the rootfs and kernel partitions.
#[derive(Debug, Args)]
pub struct ApplyCli {
    /// Delta payload file.
    #[arg(long, value_name = "FILE")]
    payload: PathBuf,

    /// Root filesystem partition (block device or image file).
    #[arg(long, value_name = "FILE")]
    rootfs: PathBuf,

    /// Kernel partition (block device or image file).
    #[arg(long, value_name = "FILE")]
    kernel: PathBuf,

    /// Directory for durable update progress state.
    #[arg(long, value_name = "DIR")]
    prefs_dir: PathBuf,

    /// PEM-encoded RSA public key for signature verification.
    #[arg(long, value_name = "FILE")]
    public_key: Option<PathBuf>,

    /// Patch executable used for BSDIFF operations.
    #[arg(long, value_name = "FILE", default_value = bspatch::DEFAULT_BSPATCH_PATH)]
    bspatch: PathBuf,

    /// Expected SHA-256 digest of the payload (hex).
    #[arg(long, value_name = "HEX")]
    expected_hash: String,

    /// Expected payload size in bytes.
    #[arg(long, value_name = "BYTES")]
    expected_size: u64,
}

/// Install a Ctrl-C handler that only flags the request. The apply loop
/// polls the flag between payload chunks, outside the performer's
/// exit-blocked window. A second interrupt exits immediately.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let exit_requested = Arc::new(AtomicBool::new(false));
    let flag = exit_requested.clone();

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("Interrupt received; stopping at the next safe point");
    })
    .context("Failed to install signal handler")?;

    Ok(exit_requested)
}

pub fn apply_main(cli: &ApplyCli) -> Result<()> {
    let expected_hash = hex::decode(&cli.expected_hash).context("Invalid --expected-hash")?;
    let exit_requested = interrupt_flag()?;

    let prefs = FilePrefs::new(&cli.prefs_dir)
        .with_context(|| format!("Failed to open prefs directory: {:?}", cli.prefs_dir))?;

    // The update checker normally records the expected payload hash before
    // the download starts; do the same so interrupted runs pass the resume
    // preflight on the next attempt.
    prefs.set_string(UPDATE_CHECK_RESPONSE_HASH, &STANDARD.encode(&expected_hash))?;

    let resume = DeltaPerformer::can_resume_update(&prefs, &expected_hash);
    if !resume {
        DeltaPerformer::reset_update_progress(&prefs)?;
    }

    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.set_bspatch_path(&cli.bspatch);

    performer
        .open_rootfs(&cli.rootfs)
        .with_context(|| format!("Failed to open rootfs partition: {:?}", cli.rootfs))?;
    performer
        .open_kernel(&cli.kernel)
        .with_context(|| format!("Failed to open kernel partition: {:?}", cli.kernel))?;

    if resume {
        performer
            .prime_update_state()
            .context("Failed to restore resume state")?;
        info!("Resuming interrupted update");
    }

    let mut payload = File::open(&cli.payload)
        .with_context(|| format!("Failed to open payload: {:?}", cli.payload))?;

    let mut buf = vec![0u8; WRITE_CHUNK_SIZE];
    loop {
        if exit_requested.load(Ordering::SeqCst) && !terminator.exit_blocked() {
            bail!("Interrupted; update state saved for resume");
        }

        let n = payload.read(&mut buf)?;
        if n == 0 {
            break;
        }

        performer
            .write(&buf[..n])
            .context("Failed to apply payload")?;
    }

    performer.close().context("Failed to finalize payload")?;
    performer
        .verify_payload(
            cli.public_key.as_deref(),
            &expected_hash,
            cli.expected_size,
        )
        .context("Payload verification failed")?;

    info!("Update applied and verified");

    Ok(())
}
