// Copyright (C) 2025 Dayton Fishell
// Glulx virtual machine core
// This file is part of glulx-vm.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Glulx virtual machine core
//!
//! This library executes Glulx game images: memory and stack, instruction
//! decode and dispatch, call frames, the heap, and the save/undo
//! serialization engine. Display, input and files stay on the far side of
//! the [`IoBridge`] trait.

pub mod arith;
pub mod asm;
pub mod builder;
pub mod call;
pub mod config;
pub mod core;
pub mod error;
pub mod exec;
#[cfg(feature = "float")]
pub mod float;
pub mod heap;
pub mod image;
pub mod io;
pub mod opcodes;
pub mod operand;
pub mod output;
pub mod search;
pub mod serial;
pub mod vm;

// Re-export commonly used types
pub use builder::{BuiltImage, ImageBuilder};
pub use config::VmConfig;
pub use crate::core::{Memory, Stack};
pub use error::{SnapshotError, VmError, VmResult};
pub use image::Header;
pub use io::{IoBridge, MemoryIo, NullIo};
pub use output::{IoMode, IoSys};
pub use vm::{RunState, Vm, VmStats};
