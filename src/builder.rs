//! Assemble source into a complete, checksummed game image.

use std::collections::HashMap;

use crate::asm::{self, AsmError, CODE_START, align_page};
use crate::image::{self, MAGIC};

/// Format version written into built images.
pub const BUILD_VERSION: u32 = 0x0003_0103;

const DEFAULT_STACK_SIZE: u32 = 0x1000;
const DEFAULT_EXTRA_MEMORY: u32 = 0x100;

/// A finished image and the addresses of its labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub bytes: Vec<u8>,
    pub labels: HashMap<String, u32>,
}

/// Builder for test and demo images.
///
/// ```ignore
/// let image = ImageBuilder::new(source).stack_size(0x800).build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder<'a> {
    source: &'a str,
    stack_size: u32,
    extra_memory: u32,
    start: &'a str,
    string_table: Option<&'a str>,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            stack_size: DEFAULT_STACK_SIZE,
            extra_memory: DEFAULT_EXTRA_MEMORY,
            start: "main",
            string_table: None,
        }
    }

    /// Stack size, rounded up to a multiple of 256.
    pub fn stack_size(mut self, size: u32) -> Self {
        self.stack_size = align_page(size);
        self
    }

    /// Zeroed memory between EXTSTART and ENDMEM, rounded up to 256.
    pub fn extra_memory(mut self, len: u32) -> Self {
        self.extra_memory = align_page(len);
        self
    }

    /// Label of the start function (default `main`).
    pub fn start(mut self, label: &'a str) -> Self {
        self.start = label;
        self
    }

    /// Label of the string decoding table.
    pub fn string_table(mut self, label: &'a str) -> Self {
        self.string_table = Some(label);
        self
    }

    pub fn build(self) -> Result<BuiltImage, AsmError> {
        let assembly = asm::assemble(self.source)?;
        let label = |name: &str| {
            assembly
                .labels
                .get(name)
                .copied()
                .ok_or_else(|| AsmError::LabelNotFound {
                    name: name.to_string(),
                })
        };
        let start_func = label(self.start)?;
        let string_table = self.string_table.map(label).transpose()?.unwrap_or(0);

        let ram_start = assembly.ram_start;
        let ext_start = ram_start + align_page(assembly.ram.len() as u32);
        let end_mem = ext_start + self.extra_memory;

        let mut bytes = vec![0u8; ext_start as usize];
        for (at, word) in [
            (0, MAGIC),
            (4, BUILD_VERSION),
            (8, ram_start),
            (12, ext_start),
            (16, end_mem),
            (20, self.stack_size),
            (24, start_func),
            (28, string_table),
        ] {
            bytes[at..at + 4].copy_from_slice(&word.to_be_bytes());
        }
        let code = CODE_START as usize;
        bytes[code..code + assembly.rom.len()].copy_from_slice(&assembly.rom);
        let ram = ram_start as usize;
        bytes[ram..ram + assembly.ram.len()].copy_from_slice(&assembly.ram);
        image::seal(&mut bytes);

        Ok(BuiltImage {
            bytes,
            labels: assembly.labels,
        })
    }
}
