/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative shutdown gate. The performer blocks exit around the window
/// from just before a non-idempotent operation until its checkpoint is
/// durable; a signal handler (or the caller's shutdown path) consults
/// [`Self::exit_blocked`] before terminating the process.
#[derive(Debug, Default)]
pub struct Terminator {
    exit_blocked: AtomicBool,
}

impl Terminator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exit_blocked(&self, blocked: bool) {
        self.exit_blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn exit_blocked(&self) -> bool {
        self.exit_blocked.load(Ordering::SeqCst)
    }

    /// Guard that unblocks exit when dropped, covering every exit path out of
    /// a dispatch iteration.
    pub fn scoped_unblocker(&self) -> ScopedExitUnblocker<'_> {
        ScopedExitUnblocker { terminator: self }
    }
}

pub struct ScopedExitUnblocker<'a> {
    terminator: &'a Terminator,
}

impl Drop for ScopedExitUnblocker<'_> {
    fn drop(&mut self) {
        self.terminator.set_exit_blocked(false);
    }
}
