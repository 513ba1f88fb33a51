// SPDX-FileCopyrightText: 2024-2025 deltapply contributors
// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Result;

fn main() -> Result<()> {
    deltapply::cli::args::main()
}
