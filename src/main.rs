// Copyright (C) 2025 Dayton Fishell
// Glulx virtual machine core
// This file is part of glulx-vm.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

// Command-line runner: loads a story file and plays it on stdout.
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use glulx_core::{IoBridge, Memory, Vm, VmConfig, VmResult, image};
use log::{info, warn};

/// Glk selectors the runner answers itself.
const GLK_PUT_CHAR: u32 = 0x80;
const GLK_PUT_CHAR_UNI: u32 = 0x128;

#[derive(Parser, Debug)]
#[command(name = "glulx")]
#[command(about = "Run a Glulx story file")]
#[command(version)]
struct Cli {
    /// The story file (.ulx)
    story: PathBuf,

    /// VM settings as JSON or YAML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fixed seed for the random number generator
    #[arg(long)]
    seed: Option<u64>,

    /// Check the image checksum and exit
    #[arg(long)]
    verify_only: bool,
}

#[cfg(feature = "serde-config")]
fn load_config(path: &Path) -> Result<VmConfig> {
    VmConfig::from_path(path)
}

#[cfg(not(feature = "serde-config"))]
fn load_config(path: &Path) -> Result<VmConfig> {
    bail!(
        "cannot read {}: built without the serde-config feature",
        path.display()
    )
}

/// Prints to stdout and keeps saves as files next to the working directory.
struct StdioIo<W> {
    out: W,
    write_failed: bool,
}

impl<W: Write> StdioIo<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            write_failed: false,
        }
    }

    fn save_path(stream: u32) -> PathBuf {
        PathBuf::from(format!("glulx-{}.sav", stream))
    }

    fn write(&mut self, text: &str) {
        if let Err(err) = self.out.write_all(text.as_bytes()) {
            if !self.write_failed {
                warn!(target: "glulx::io", "stdout write failed: {}", err);
                self.write_failed = true;
            }
        }
    }
}

impl<W: Write> IoBridge for StdioIo<W> {
    fn glk(&mut self, selector: u32, args: &[u32], _memory: &mut Memory) -> VmResult<u32> {
        match (selector, args) {
            (GLK_PUT_CHAR, [ch, ..]) => self.put_char(*ch as u8),
            (GLK_PUT_CHAR_UNI, [ch, ..]) => self.put_char_uni(*ch),
            _ => warn!(target: "glulx::io", "glk call {:#x} not supported", selector),
        }
        Ok(0)
    }

    fn put_char(&mut self, ch: u8) {
        let mut buf = [0u8; 4];
        let text = (ch as char).encode_utf8(&mut buf);
        self.write(text);
    }

    fn put_char_uni(&mut self, ch: u32) {
        let mut buf = [0u8; 4];
        let text = char::from_u32(ch)
            .unwrap_or(char::REPLACEMENT_CHARACTER)
            .encode_utf8(&mut buf);
        self.write(text);
    }

    fn write_save(&mut self, stream: u32, data: &[u8]) -> bool {
        std::fs::write(Self::save_path(stream), data).is_ok()
    }

    fn read_save(&mut self, stream: u32) -> Option<Vec<u8>> {
        std::fs::read(Self::save_path(stream)).ok()
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Cli::parse();
    let story = std::fs::read(&args.story)
        .with_context(|| format!("reading {}", args.story.display()))?;

    if args.verify_only {
        if image::verify(&story) {
            println!("{}: checksum OK", args.story.display());
            return Ok(());
        }
        bail!("{}: checksum mismatch", args.story.display());
    }

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => VmConfig::default(),
    };
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }

    let io = StdioIo::new(std::io::stdout());
    let mut vm = Vm::new(&story, config, Box::new(io))
        .with_context(|| format!("loading {}", args.story.display()))?;
    let result = vm.run();
    std::io::stdout().flush().context("flushing output")?;
    result.context("execution stopped")?;

    let stats = vm.stats();
    info!(
        "halted after {} instructions (pc {:#010x}, memory {:#x})",
        stats.instructions, stats.pc, stats.end_mem
    );
    Ok(())
}
