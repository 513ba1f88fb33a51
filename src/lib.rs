/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! deltapply is primarily an application; the semver versioning covers the
//! CLI only and the Rust APIs can change at any time. The library modules
//! aim to be generic, while the CLI sources use concrete types for
//! simplicity.

pub mod bspatch;
pub mod cli;
pub mod crypto;
pub mod extent_writer;
pub mod format;
pub mod hasher;
pub mod performer;
pub mod prefs;
pub mod protobuf;
pub mod terminator;
pub mod util;
